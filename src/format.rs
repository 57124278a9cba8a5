//! Versioned format tags for serialized sketches.
//!
//! Every serialized sketch starts with a single tag byte identifying the
//! layout of the bytes that follow. Parsers must reject tags they do not
//! recognize, so future formats fail loudly instead of being misread.

use crate::error::SketchError;

/// Serialization format of a sketch.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// [`PrivateLpcaSketch`](crate::PrivateLpcaSketch), version 1.
    PrivateLpcaV1 = 0,
    /// [`SfmSketch`](crate::SfmSketch), version 1.
    SfmV1 = 1,
}

impl Format {
    /// The leading byte identifying this format on the wire.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Resolve a tag byte read from a serialized sketch.
    pub fn from_tag(tag: u8) -> Result<Self, SketchError> {
        match tag {
            0 => Ok(Format::PrivateLpcaV1),
            1 => Ok(Format::SfmV1),
            _ => Err(SketchError::InvalidFormat(format!(
                "unknown format tag: {tag}"
            ))),
        }
    }
}

/// Read and check the leading tag of a serialized sketch.
pub(crate) fn expect_tag(tag: u8, expected: Format) -> Result<(), SketchError> {
    if Format::from_tag(tag)? != expected {
        return Err(SketchError::InvalidFormat(format!(
            "wrong format tag: expected {}, found {tag}",
            expected.tag()
        )));
    }
    Ok(())
}
