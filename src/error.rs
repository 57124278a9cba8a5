//! Error types shared by the sketches.

use thiserror::Error;

/// Failures surfaced by sketch constructors, combinators, and parsers.
///
/// All failures are immediate and synchronous: operations that can fail
/// validate their inputs before mutating any state, so an `Err` never leaves
/// a sketch half-updated. Bit positions outside a bitmap and probabilities
/// outside `[0, 1]` are programming errors and panic instead, matching the
/// bounds semantics of std slices.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SketchError {
    /// Malformed construction or combination parameters: a non-power-of-2
    /// bucket count, mismatched bitmap lengths, mismatched sketch dimensions,
    /// or an out-of-range privacy parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A serialized sketch that cannot be parsed: unknown or mismatched
    /// format tag, or a truncated byte buffer.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

impl From<std::io::Error> for SketchError {
    fn from(_: std::io::Error) -> Self {
        SketchError::InvalidFormat("unexpected end of serialized sketch".to_string())
    }
}
