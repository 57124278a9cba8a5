//! # Serde support for the sketches
//!
//! Enabled by the `with_serde` feature. Both sketch types serialize as their
//! versioned binary wire format (a byte sequence), so a sketch embedded in a
//! larger serde document carries exactly the bytes that
//! [`serialize`](crate::SfmSketch::serialize) would produce and is
//! revalidated on the way back in. Deserialization needs a randomization
//! strategy for the reconstructed sketch, so it is only implemented for
//! strategies with a `Default`.
//!
//! Refer to the serde documentation for details on custom serialization and
//! deserialization:
//! - [Serialization](https://serde.rs/impl-serialize.html)
//! - [Deserialization](https://serde.rs/impl-deserialize.html)

use serde::de::Error;
use serde::{Deserialize, Serialize};

use crate::lpca::PrivateLpcaSketch;
use crate::random::RandomizationStrategy;
use crate::sfm::SfmSketch;

impl<S: RandomizationStrategy> Serialize for PrivateLpcaSketch<S> {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        serializer.serialize_bytes(&self.serialize())
    }
}

impl<'de, S: RandomizationStrategy + Default> Deserialize<'de> for PrivateLpcaSketch<S> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        PrivateLpcaSketch::deserialize(&bytes, S::default())
            .map_err(|e| Error::custom(format!("{e}")))
    }
}

impl<S: RandomizationStrategy> Serialize for SfmSketch<S> {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        serializer.serialize_bytes(&self.serialize())
    }
}

impl<'de, S: RandomizationStrategy + Default> Deserialize<'de> for SfmSketch<S> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        SfmSketch::deserialize(&bytes, S::default()).map_err(|e| Error::custom(format!("{e}")))
    }
}
