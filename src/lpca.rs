//! Privacy-preserving linear probabilistic counting sketch.
//!
//! A [`PrivateLpcaSketch`] compresses a HyperLogLog-style base sketch into a
//! single bit per bucket: the bit says whether the bucket's counter exceeds
//! a threshold chosen once at construction. That thresholding is itself a
//! form of data minimization; differential privacy then comes from two
//! noise sources with separate budgets:
//!
//! - `epsilon_threshold` scales the Laplace noise added to the bucket mean
//!   when the threshold is selected, and
//! - `epsilon_randomized_response` sets the probability with which every bit
//!   is independently flipped before the sketch leaves the process.
//!
//! The cardinality estimate debiases the observed 1-bit proportion against
//! the known flip probability and then applies the classical linear
//! probabilistic counting (LPCA) formula.

use std::fmt::{Debug, Formatter};
use std::mem::size_of;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::bitmap::Bitmap;
use crate::error::SketchError;
use crate::format::{expect_tag, Format};
use crate::hll::HyperLogLog;
use crate::random::{
    randomized_response_probability, RandomizationStrategy, SecureRandomizationStrategy,
};

/// Empirical shift from the noisy bucket mean toward the bucket median.
/// Tunable; it compensates for the skew of the bucket-value distribution and
/// is not derived from the privacy analysis.
const MEAN_TO_MEDIAN_CORRECTION: f64 = 0.2;

pub struct PrivateLpcaSketch<S = SecureRandomizationStrategy>
where
    S: RandomizationStrategy,
{
    bitmap: Bitmap,
    threshold: i32,
    number_of_buckets: usize,
    epsilon_threshold: f64,
    epsilon_randomized_response: f64,
    randomization_strategy: S,
}

impl PrivateLpcaSketch<SecureRandomizationStrategy> {
    /// Build a private sketch from a base sketch using the production
    /// randomness source.
    pub fn with_secure_randomization(
        hll: &impl HyperLogLog,
        epsilon_threshold: f64,
        epsilon_randomized_response: f64,
    ) -> Result<Self, SketchError> {
        Self::new(
            hll,
            epsilon_threshold,
            epsilon_randomized_response,
            SecureRandomizationStrategy::new(),
        )
    }
}

impl<S: RandomizationStrategy> PrivateLpcaSketch<S> {
    /// Build a private sketch from a base sketch.
    ///
    /// The threshold is fixed here, once, from the noisy mean of the bucket
    /// values; every bucket's above/below-threshold bit is then perturbed by
    /// randomized response at
    /// `p = 1 / (e^epsilon_randomized_response + 1)`.
    pub fn new(
        hll: &impl HyperLogLog,
        epsilon_threshold: f64,
        epsilon_randomized_response: f64,
        mut randomization_strategy: S,
    ) -> Result<Self, SketchError> {
        let number_of_buckets = hll.number_of_buckets();
        validate_bucket_count(number_of_buckets)?;
        if hll.max_bucket_value() == 0 {
            return Err(SketchError::InvalidArgument(
                "base sketch must have a positive max bucket value".to_string(),
            ));
        }
        if epsilon_threshold.is_nan() || epsilon_threshold <= 0.0 {
            return Err(SketchError::InvalidArgument(format!(
                "epsilon_threshold must be positive: {epsilon_threshold}"
            )));
        }
        if epsilon_randomized_response.is_nan() || epsilon_randomized_response == 0.0 {
            return Err(SketchError::InvalidArgument(format!(
                "epsilon_randomized_response must be nonzero: {epsilon_randomized_response}"
            )));
        }

        let threshold = find_threshold(hll, epsilon_threshold, &mut randomization_strategy);
        let mut bitmap = Bitmap::new(number_of_buckets)?;
        hll.for_each_bucket(|index, value| {
            bitmap.set_bit(index, i64::from(value) > i64::from(threshold));
        });

        let mut sketch = Self {
            bitmap,
            threshold,
            number_of_buckets,
            epsilon_threshold,
            epsilon_randomized_response,
            randomization_strategy,
        };
        let p = sketch.flip_probability();
        sketch
            .bitmap
            .flip_all(p, &mut sketch.randomization_strategy);
        Ok(sketch)
    }

    /// Reconstruct a sketch from bytes produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8], randomization_strategy: S) -> Result<Self, SketchError> {
        let mut input = bytes;
        expect_tag(input.read_u8()?, Format::PrivateLpcaV1)?;

        let number_of_buckets = input.read_u32::<LittleEndian>()? as usize;
        if !number_of_buckets.is_power_of_two() || number_of_buckets < 8 {
            return Err(SketchError::InvalidFormat(format!(
                "number of buckets must be a power of 2 (at least 8): {number_of_buckets}"
            )));
        }
        let threshold = input.read_i32::<LittleEndian>()?;
        let epsilon_threshold = input.read_f64::<LittleEndian>()?;
        let epsilon_randomized_response = input.read_f64::<LittleEndian>()?;
        let bitmap = Bitmap::from_reader(&mut input, number_of_buckets)?;

        Ok(Self {
            bitmap,
            threshold,
            number_of_buckets,
            epsilon_threshold,
            epsilon_randomized_response,
            randomization_strategy,
        })
    }

    /// Serialized layout (little-endian):
    /// format tag | numberOfBuckets | threshold | epsilonThreshold |
    /// epsilonRandomizedResponse | bitmap
    pub fn serialize(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(self.estimated_serialized_size());
        output.push(Format::PrivateLpcaV1.tag());
        output.extend_from_slice(&(self.number_of_buckets as u32).to_le_bytes());
        output.extend_from_slice(&self.threshold.to_le_bytes());
        output.extend_from_slice(&self.epsilon_threshold.to_le_bytes());
        output.extend_from_slice(&self.epsilon_randomized_response.to_le_bytes());
        output.extend_from_slice(self.bitmap.to_bytes());
        output
    }

    pub fn estimated_serialized_size(&self) -> usize {
        size_of::<u8>() // format tag
            + size_of::<u32>() // number of buckets
            + size_of::<i32>() // threshold
            + 2 * size_of::<f64>() // epsilons
            + self.number_of_buckets / 8 // bitmap
    }

    /// Merge new data into the sketch.
    ///
    /// For every bucket of `hll` whose value exceeds the sketch's fixed
    /// threshold, the corresponding bit is set and a fresh single-bit
    /// randomized-response flip is applied. Bits already set are never
    /// cleared, and at-or-below-threshold buckets are not revisited, so the
    /// threshold never changes.
    pub fn update(&mut self, hll: &impl HyperLogLog) -> Result<(), SketchError> {
        if hll.number_of_buckets() != self.number_of_buckets {
            return Err(SketchError::InvalidArgument(format!(
                "cannot update sketch using a base sketch with a different number of buckets: {} vs {}",
                self.number_of_buckets,
                hll.number_of_buckets()
            )));
        }

        let p = self.flip_probability();
        let threshold = i64::from(self.threshold);
        let bitmap = &mut self.bitmap;
        let strategy = &mut self.randomization_strategy;
        hll.for_each_bucket(|index, value| {
            if i64::from(value) > threshold {
                bitmap.set_bit(index, true);
                bitmap.flip_bit_with_probability(index, p, strategy);
            }
        });
        Ok(())
    }

    /// Estimate the number of distinct elements.
    ///
    /// The observed 1-bit proportion `q` is first debiased against the flip
    /// probability `p` as `(q - p) / (1 - 2p)`, then run through the LPCA
    /// estimator `-2^threshold * ln(1 - q) * numberOfBuckets`. The debiased
    /// proportion is clamped to `[0, 1 - 1/numberOfBuckets]`: at the
    /// estimator's singularity (every bit set) the result saturates instead
    /// of diverging, and it can never surface NaN or infinity.
    pub fn cardinality(&self) -> u64 {
        let buckets = self.number_of_buckets as f64;
        let p = self.flip_probability();
        let debiased = (self.raw_bit_proportion() - p) / (1.0 - 2.0 * p);
        let proportion = debiased.clamp(0.0, 1.0 - 1.0 / buckets);
        let estimate = -2f64.powi(self.threshold) * (-proportion).ln_1p() * buckets;
        estimate.round() as u64
    }

    /// Proportion of 1-bits actually present in the (noisy) bitmap.
    pub fn raw_bit_proportion(&self) -> f64 {
        self.bitmap.bit_count() as f64 / self.number_of_buckets as f64
    }

    /// Per-bit flip probability implied by `epsilon_randomized_response`.
    pub fn flip_probability(&self) -> f64 {
        randomized_response_probability(self.epsilon_randomized_response)
    }

    pub fn number_of_buckets(&self) -> usize {
        self.number_of_buckets
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Memory retained by this sketch, for accounting only.
    pub fn retained_size_in_bytes(&self) -> usize {
        size_of::<Self>() + self.bitmap.retained_size_in_bytes() - size_of::<Bitmap>()
    }
}

impl<S: RandomizationStrategy + Clone> Clone for PrivateLpcaSketch<S> {
    fn clone(&self) -> Self {
        Self {
            bitmap: self.bitmap.clone(),
            threshold: self.threshold,
            number_of_buckets: self.number_of_buckets,
            epsilon_threshold: self.epsilon_threshold,
            epsilon_randomized_response: self.epsilon_randomized_response,
            randomization_strategy: self.randomization_strategy.clone(),
        }
    }
}

impl<S: RandomizationStrategy> Debug for PrivateLpcaSketch<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateLpcaSketch")
            .field("number_of_buckets", &self.number_of_buckets)
            .field("threshold", &self.threshold)
            .field("epsilon_threshold", &self.epsilon_threshold)
            .field(
                "epsilon_randomized_response",
                &self.epsilon_randomized_response,
            )
            .field("bits_set", &self.bitmap.bit_count())
            .finish()
    }
}

/// Pick the bucket-value threshold from the noisy mean.
///
/// Sensitivity of the mean to a single element is at most
/// `maxBucketValue / numberOfBuckets`, so Laplace noise at scale
/// `sensitivity / epsilon` makes the selection epsilon-DP. The result is
/// shifted by [`MEAN_TO_MEDIAN_CORRECTION`] and clamped to
/// `[0, maxBucketValue - 1]`.
fn find_threshold(
    hll: &impl HyperLogLog,
    epsilon: f64,
    strategy: &mut impl RandomizationStrategy,
) -> i32 {
    let buckets = hll.number_of_buckets() as f64;
    let mut sum = 0.0;
    hll.for_each_bucket(|_, value| sum += f64::from(value));
    let mean = sum / buckets;

    let sensitivity = f64::from(hll.max_bucket_value()) / buckets;
    let noise = strategy.next_laplace(sensitivity / epsilon);

    let threshold = (mean + noise - MEAN_TO_MEDIAN_CORRECTION).round();
    threshold.clamp(0.0, f64::from(hll.max_bucket_value()) - 1.0) as i32
}

fn validate_bucket_count(number_of_buckets: usize) -> Result<(), SketchError> {
    if !number_of_buckets.is_power_of_two() || number_of_buckets < 8 {
        return Err(SketchError::InvalidArgument(format!(
            "number of buckets must be a power of 2 (at least 8): {number_of_buckets}"
        )));
    }
    Ok(())
}
