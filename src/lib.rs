//! `private-cardinality-sketch` is a Rust crate for estimating the number of distinct elements
//! in a dataset under differential privacy.
//!
//! It provides two bitmap-based sketches perturbed by randomized response: [`PrivateLpcaSketch`],
//! a one-bit-per-bucket compression of an external HyperLogLog-style base sketch, and
//! [`SfmSketch`], a self-contained Sketch-Flip-Merge sketch supporting incremental inserts,
//! after-the-fact privacy, and privacy-preserving merges.
pub mod bitmap;
pub mod error;
pub mod format;
pub mod hll;
pub mod lpca;
pub mod random;
#[cfg(feature = "with_serde")]
mod serde;
pub mod sfm;

pub use bitmap::Bitmap;
pub use error::SketchError;
pub use format::Format;
pub use hll::HyperLogLog;
pub use lpca::PrivateLpcaSketch;
pub use random::{
    merge_randomized_response_probabilities, randomized_response_probability,
    DeterministicRandomizationStrategy, RandomizationStrategy, SecureRandomizationStrategy,
    SeededRandomizationStrategy,
};
pub use sfm::SfmSketch;
