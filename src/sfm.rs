//! Sketch-Flip-Merge cardinality sketch.
//!
//! An [`SfmSketch`] keeps `precision` bits per bucket. Inserting an item
//! hashes it to a bucket and a geometric level (the leading-zero rank used
//! by HyperLogLog) and sets the corresponding bit, so each bucket records
//! which levels have ever been hit. Privacy comes from randomized response
//! over the whole bitmap and can be enabled after the fact, tightened later,
//! and survives merging: two sketches with equal dimensions merge into one
//! whose flip probability is the algebraic composition of the inputs'
//! probabilities (Hehir, Ting, Cormode, <https://arxiv.org/pdf/2302.02056.pdf>).
//!
//! Estimation maximizes the Binomial likelihood of the observed per-level
//! bit counts, debiased against the known flip probability, so one code path
//! covers the private and non-private cases.

use std::fmt::{Debug, Formatter};
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};
use std::mem::size_of;

use byteorder::{LittleEndian, ReadBytesExt};
use wyhash::WyHash;

use crate::bitmap::Bitmap;
use crate::error::SketchError;
use crate::format::{expect_tag, Format};
use crate::random::{
    merge_randomized_response_probabilities, randomized_response_probability,
    RandomizationStrategy, SecureRandomizationStrategy,
};

/// Estimates are cut off here; beyond it the likelihood is flat in `n` for
/// any representable sketch and bisection would wander.
const MAX_ESTIMATE: f64 = 1e19;

/// Bisection iterations for the likelihood root. 64 halvings of any bracket
/// below [`MAX_ESTIMATE`] reach sub-integer width.
const BISECTION_STEPS: u32 = 64;

/// Probabilities are kept away from 0 and 1 in the likelihood so that a
/// level with an impossible observation contributes a large finite penalty
/// instead of NaN.
const LIKELIHOOD_CLAMP: f64 = 1e-12;

pub struct SfmSketch<S = SecureRandomizationStrategy>
where
    S: RandomizationStrategy,
{
    bitmap: Bitmap,
    number_of_buckets: usize,
    precision: usize,
    randomized_response_probability: f64,
    randomization_strategy: S,
    build_hasher: BuildHasherDefault<WyHash>,
}

impl SfmSketch<SecureRandomizationStrategy> {
    /// Epsilon sentinel meaning "no privacy": the implied flip probability
    /// is exactly 0.
    pub const NON_PRIVATE_EPSILON: f64 = f64::INFINITY;

    pub const MIN_PRECISION: usize = 8;
    pub const MAX_PRECISION: usize = 32;

    /// Create a non-private sketch using the production randomness source.
    pub fn with_secure_randomization(
        number_of_buckets: usize,
        precision: usize,
    ) -> Result<Self, SketchError> {
        Self::create(number_of_buckets, precision, SecureRandomizationStrategy::new())
    }
}

impl<S: RandomizationStrategy> SfmSketch<S> {
    /// Create an empty non-private sketch with `number_of_buckets * precision`
    /// bits, all zero.
    pub fn create(
        number_of_buckets: usize,
        precision: usize,
        randomization_strategy: S,
    ) -> Result<Self, SketchError> {
        validate_dimensions(number_of_buckets, precision).map_err(SketchError::InvalidArgument)?;
        Ok(Self {
            bitmap: Bitmap::new(number_of_buckets * precision)?,
            number_of_buckets,
            precision,
            randomized_response_probability: 0.0,
            randomization_strategy,
            build_hasher: BuildHasherDefault::default(),
        })
    }

    /// Reconstruct a sketch from bytes produced by [`serialize`](Self::serialize).
    pub fn deserialize(bytes: &[u8], randomization_strategy: S) -> Result<Self, SketchError> {
        let mut input = bytes;
        expect_tag(input.read_u8()?, Format::SfmV1)?;

        let number_of_buckets = input.read_u32::<LittleEndian>()? as usize;
        let precision = input.read_u32::<LittleEndian>()? as usize;
        validate_dimensions(number_of_buckets, precision).map_err(SketchError::InvalidFormat)?;

        let randomized_response_probability = input.read_f64::<LittleEndian>()?;
        if !(0.0..=1.0).contains(&randomized_response_probability) {
            return Err(SketchError::InvalidFormat(format!(
                "randomized response probability out of range: {randomized_response_probability}"
            )));
        }
        let bitmap = Bitmap::from_reader(&mut input, number_of_buckets * precision)?;

        Ok(Self {
            bitmap,
            number_of_buckets,
            precision,
            randomized_response_probability,
            randomization_strategy,
            build_hasher: BuildHasherDefault::default(),
        })
    }

    /// Serialized layout (little-endian):
    /// format tag | numberOfBuckets | precision |
    /// randomizedResponseProbability | bitmap
    pub fn serialize(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(self.estimated_serialized_size());
        output.push(Format::SfmV1.tag());
        output.extend_from_slice(&(self.number_of_buckets as u32).to_le_bytes());
        output.extend_from_slice(&(self.precision as u32).to_le_bytes());
        output.extend_from_slice(&self.randomized_response_probability.to_le_bytes());
        output.extend_from_slice(self.bitmap.to_bytes());
        output
    }

    pub fn estimated_serialized_size(&self) -> usize {
        size_of::<u8>() // format tag
            + 2 * size_of::<u32>() // number of buckets, precision
            + size_of::<f64>() // randomized response probability
            + self.number_of_buckets * self.precision / 8 // bitmap
    }

    /// Insert an item.
    #[inline]
    pub fn add<T: Hash + ?Sized>(&mut self, item: &T) {
        let mut hasher = self.build_hasher.build_hasher();
        item.hash(&mut hasher);
        self.add_hash(hasher.finish());
    }

    /// Insert a pre-computed 64-bit hash.
    ///
    /// The top `log2(numberOfBuckets)` bits select the bucket; the number of
    /// leading zeros among the remaining bits, capped at `precision - 1`,
    /// selects the level.
    #[inline]
    pub fn add_hash(&mut self, hash: u64) {
        let index_bit_length = self.number_of_buckets.trailing_zeros();
        let bucket = (hash >> (64 - index_bit_length)) as usize;
        let zeros = (hash << index_bit_length).leading_zeros() as usize;
        let level = zeros.min(self.precision - 1);
        self.bitmap.set_bit(self.bit_location(bucket, level), true);
    }

    /// Flat bitmap index of `(bucket, level)`. A bijection from
    /// `[0, numberOfBuckets) x [0, precision)` onto `[0, bitmap.length())`.
    #[inline]
    pub fn bit_location(&self, bucket: usize, level: usize) -> usize {
        bucket * self.precision + level
    }

    /// Make the sketch `epsilon`-differentially private, or noisier.
    ///
    /// The target flip probability is `1 / (e^epsilon + 1)`. If the sketch's
    /// current probability already meets or exceeds the target this is a
    /// no-op: noise already applied cannot be removed. Otherwise every bit is
    /// flipped independently with the incremental probability that raises the
    /// effective combined flip probability to the target (two independent
    /// flips compose as `p1 + p2 - 2*p1*p2`).
    pub fn enable_privacy(&mut self, epsilon: f64) -> Result<(), SketchError> {
        if epsilon.is_nan() || epsilon <= 0.0 {
            return Err(SketchError::InvalidArgument(format!(
                "epsilon must be positive: {epsilon}"
            )));
        }
        let target = randomized_response_probability(epsilon);
        let current = self.randomized_response_probability;
        if target <= current {
            return Ok(());
        }
        let incremental = (target - current) / (1.0 - 2.0 * current);
        self.bitmap
            .flip_all(incremental, &mut self.randomization_strategy);
        self.randomized_response_probability = target;
        Ok(())
    }

    /// Merge another sketch of the same dimensions into this one.
    ///
    /// The merged flip probability is
    /// [`merge_randomized_response_probabilities`] of the inputs'
    /// probabilities. The merged bitmap is distributed as the
    /// randomized-response perturbation, at that merged probability, of the
    /// OR of the two underlying raw bitmaps:
    ///
    /// - both non-private: the exact bitwise OR, no randomness drawn;
    /// - exactly one private: bits where the non-private sketch is 0 are
    ///   copied verbatim from the private one, bits where it is 1 get a
    ///   fresh flip at the private sketch's probability;
    /// - both private: each merged bit is drawn from a distribution,
    ///   conditioned on the observed bit pair, whose coefficients are chosen
    ///   so the result is exactly the perturbed-OR law above.
    pub fn merge_with(&mut self, other: &Self) -> Result<(), SketchError> {
        if self.number_of_buckets != other.number_of_buckets
            || self.precision != other.precision
        {
            return Err(SketchError::InvalidArgument(format!(
                "cannot merge sketches of different dimensions: {}x{} vs {}x{}",
                self.number_of_buckets, self.precision,
                other.number_of_buckets, other.precision
            )));
        }

        let p1 = self.randomized_response_probability;
        let p2 = other.randomized_response_probability;

        if p1 == 0.0 && p2 == 0.0 {
            self.bitmap = self.bitmap.or(&other.bitmap)?;
            return Ok(());
        }

        if p1 == 0.0 || p2 == 0.0 {
            let p = p1.max(p2);
            for i in 0..self.bitmap.length() {
                let (private_bit, non_private_bit) = if p1 == 0.0 {
                    (other.bitmap.get_bit(i), self.bitmap.get_bit(i))
                } else {
                    (self.bitmap.get_bit(i), other.bitmap.get_bit(i))
                };
                // A raw 1 dominates the OR, so the merged bit is a fresh
                // perturbation of 1; a raw 0 leaves the private observation
                // already correctly distributed.
                let merged = if non_private_bit {
                    self.randomization_strategy.next_boolean(1.0 - p)
                } else {
                    private_bit
                };
                self.bitmap.set_bit(i, merged);
            }
            self.randomized_response_probability = p;
            return Ok(());
        }

        let p_star = merge_randomized_response_probabilities(p1, p2);
        let s1 = 1.0 - 2.0 * p1;
        let s2 = 1.0 - 2.0 * p2;
        let s_star = 1.0 - 2.0 * p_star;
        // Coefficients of the conditional distribution
        // q(x, y) = alpha + beta*x + gamma*y + delta*x*y solving
        // E[q | raw bits] = pStar + sStar * 1{raw OR}. alpha is zero in
        // exact arithmetic and kept only to absorb rounding.
        let alpha = p_star - s_star * (p1 + p2 - 3.0 * p1 * p2) / (s1 * s2);
        let beta = s_star * (1.0 - p2) / (s1 * s2);
        let gamma = s_star * (1.0 - p1) / (s1 * s2);
        let delta = -s_star / (s1 * s2);

        for i in 0..self.bitmap.length() {
            let x = self.bitmap.get_bit(i);
            let y = other.bitmap.get_bit(i);
            let mut probability = alpha;
            if x {
                probability += beta;
            }
            if y {
                probability += gamma;
            }
            if x && y {
                probability += delta;
            }
            let merged = self
                .randomization_strategy
                .next_boolean(probability.clamp(0.0, 1.0));
            self.bitmap.set_bit(i, merged);
        }
        self.randomized_response_probability = p_star;
        Ok(())
    }

    /// Estimate the number of distinct items added across the sketch and
    /// everything merged into it.
    ///
    /// After `n` distinct insertions the bit at level `l` of any bucket is
    /// set with probability `c1 - c2 * q_l^n` where
    /// `q_l = 1 - 2^-(l+1) / numberOfBuckets`, `c1` is
    /// [`on_probability`](Self::on_probability) and
    /// `c2 = c1 - randomizedResponseProbability`. The estimate is the `n`
    /// maximizing the product of per-level Binomial likelihoods of the
    /// observed bit counts, found by bisecting the likelihood derivative.
    /// Everything runs in log space, so the estimator stays finite and
    /// monotonic far beyond 10^9.
    pub fn cardinality(&self) -> u64 {
        let buckets = self.number_of_buckets as f64;
        let p = self.randomized_response_probability;
        let c1 = 1.0 - p;
        let c2 = c1 - p;

        let mut observed_ones = vec![0.0; self.precision];
        let mut log_qs = vec![0.0; self.precision];
        for level in 0..self.precision {
            let mut ones = 0u32;
            for bucket in 0..self.number_of_buckets {
                if self.bitmap.get_bit(self.bit_location(bucket, level)) {
                    ones += 1;
                }
            }
            observed_ones[level] = f64::from(ones);
            // log(1 - 2^-(l+1) / buckets), stable even for large buckets
            log_qs[level] = (-(2f64.powi(-(level as i32 + 1))) / buckets).ln_1p();
        }

        // Derivative of the log likelihood in n.
        let score = |n: f64| -> f64 {
            let mut total = 0.0;
            for level in 0..self.precision {
                let log_q = log_qs[level];
                let q_pow_n = (n * log_q).exp();
                let on = (c1 - c2 * q_pow_n).clamp(LIKELIHOOD_CLAMP, 1.0 - LIKELIHOOD_CLAMP);
                let ones = observed_ones[level];
                let on_derivative = -c2 * q_pow_n * log_q;
                total += (ones / on - (buckets - ones) / (1.0 - on)) * on_derivative;
            }
            total
        };

        // The likelihood is unimodal: the score starts positive (unless the
        // maximum is at 0) and crosses zero once.
        if score(0.0) <= 0.0 {
            return 0;
        }
        let mut low = 0.0;
        let mut high = 1.0;
        while score(high) > 0.0 {
            low = high;
            high *= 2.0;
            if high >= MAX_ESTIMATE {
                return MAX_ESTIMATE as u64;
            }
        }
        for _ in 0..BISECTION_STEPS {
            let middle = (low + high) / 2.0;
            if score(middle) > 0.0 {
                low = middle;
            } else {
                high = middle;
            }
        }
        ((low + high) / 2.0).round() as u64
    }

    pub fn is_privacy_enabled(&self) -> bool {
        self.randomized_response_probability > 0.0
    }

    /// Current per-bit flip probability; 0 for a non-private sketch.
    pub fn randomized_response_probability(&self) -> f64 {
        self.randomized_response_probability
    }

    /// Probability that a raw 1-bit is observed as 1 under the current noise.
    pub fn on_probability(&self) -> f64 {
        1.0 - self.randomized_response_probability
    }

    pub fn number_of_buckets(&self) -> usize {
        self.number_of_buckets
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Memory retained by this sketch, for accounting only.
    pub fn retained_size_in_bytes(&self) -> usize {
        size_of::<Self>() + self.bitmap.retained_size_in_bytes() - size_of::<Bitmap>()
    }
}

impl<S: RandomizationStrategy + Clone> Clone for SfmSketch<S> {
    fn clone(&self) -> Self {
        Self {
            bitmap: self.bitmap.clone(),
            number_of_buckets: self.number_of_buckets,
            precision: self.precision,
            randomized_response_probability: self.randomized_response_probability,
            randomization_strategy: self.randomization_strategy.clone(),
            build_hasher: BuildHasherDefault::default(),
        }
    }
}

impl<S: RandomizationStrategy> Debug for SfmSketch<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SfmSketch")
            .field("number_of_buckets", &self.number_of_buckets)
            .field("precision", &self.precision)
            .field(
                "randomized_response_probability",
                &self.randomized_response_probability,
            )
            .field("bits_set", &self.bitmap.bit_count())
            .finish()
    }
}

fn validate_dimensions(number_of_buckets: usize, precision: usize) -> Result<(), String> {
    if !number_of_buckets.is_power_of_two() || number_of_buckets < 8 {
        return Err(format!(
            "number of buckets must be a power of 2 (at least 8): {number_of_buckets}"
        ));
    }
    if !(SfmSketch::MIN_PRECISION..=SfmSketch::MAX_PRECISION).contains(&precision) {
        return Err(format!(
            "precision must lie in [{}, {}]: {precision}",
            SfmSketch::MIN_PRECISION,
            SfmSketch::MAX_PRECISION
        ));
    }
    Ok(())
}
