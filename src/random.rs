//! Randomness used by the privacy mechanisms.
//!
//! Sketches never talk to an RNG directly; they go through the
//! [`RandomizationStrategy`] trait so that production code draws from a
//! cryptographically strong source while tests substitute deterministic or
//! seeded variants. The trait's only primitive is `next_double`; Bernoulli
//! trials and Laplace samples are derived from it, which keeps every
//! implementation consistent at the degenerate probability bounds.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Source of the random draws consumed by randomized response and noisy
/// threshold selection.
pub trait RandomizationStrategy {
    /// Uniform draw from `[0, 1)`.
    fn next_double(&mut self) -> f64;

    /// Bernoulli trial with the given probability.
    ///
    /// The bounds are exact: `probability <= 0` never succeeds and
    /// `probability >= 1` always succeeds, without consuming a draw.
    ///
    /// # Panics
    ///
    /// Panics if `probability` is NaN or outside `[0, 1]`.
    fn next_boolean(&mut self, probability: f64) -> bool {
        assert!(
            (0.0..=1.0).contains(&probability),
            "probability must lie in [0, 1]: {probability}"
        );
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.next_double() < probability
    }

    /// Sample from Laplace(0, `scale`) by inverting the CDF:
    /// `F^-1(u) = -scale * sign(u - 0.5) * ln(1 - 2|u - 0.5|)`.
    fn next_laplace(&mut self, scale: f64) -> f64 {
        if scale == 0.0 {
            return 0.0;
        }
        let u = self.next_double() - 0.5;
        // u == -0.5 would take ln(0); nudge to the smallest positive double
        let tail = (1.0 - 2.0 * u.abs()).max(f64::MIN_POSITIVE);
        -scale * u.signum() * tail.ln()
    }
}

/// Production strategy backed by a ChaCha20 generator seeded from OS entropy.
///
/// Each sketch should own its own instance; the trait takes `&mut self`, so
/// sharing one across sketches requires external synchronization by design.
#[derive(Debug)]
pub struct SecureRandomizationStrategy {
    rng: ChaCha20Rng,
}

impl SecureRandomizationStrategy {
    pub fn new() -> Self {
        Self {
            rng: ChaCha20Rng::from_entropy(),
        }
    }
}

impl Default for SecureRandomizationStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomizationStrategy for SecureRandomizationStrategy {
    fn next_double(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Reproducible strategy for tests: same seed, same stream.
#[derive(Clone, Debug)]
pub struct SeededRandomizationStrategy {
    rng: ChaCha20Rng,
}

impl SeededRandomizationStrategy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl RandomizationStrategy for SeededRandomizationStrategy {
    fn next_double(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Non-random strategy for tests: `next_double` always returns the midpoint,
/// so a probabilistic flip happens iff its probability exceeds 0.5.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicRandomizationStrategy;

impl DeterministicRandomizationStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl RandomizationStrategy for DeterministicRandomizationStrategy {
    fn next_double(&mut self) -> f64 {
        0.5
    }
}

/// Per-bit flip probability of randomized response under privacy budget
/// `epsilon`: `1 / (e^epsilon + 1)`. An infinite epsilon means no privacy
/// and yields exactly 0; epsilon 0 yields 1/2 (pure noise).
pub fn randomized_response_probability(epsilon: f64) -> f64 {
    1.0 / (epsilon.exp() + 1.0)
}

/// Flip probability of the merge of two randomized-response perturbations.
///
/// Symmetric, with 0 as identity. For positive probabilities the result is
/// `1 / (e^{eps*} + 1)` where
/// `eps* = -ln(e^-eps1 + e^-eps2 - e^-(eps1 + eps2))`
/// (Theorem 4.8 of <https://arxiv.org/pdf/2302.02056.pdf>): merged privacy
/// loss composes sub-additively, so the merge is strictly noisier than
/// either input. Computed in odds space (`t = e^-eps = p / (1 - p)`), where
/// the composition is simply `t* = t1 + t2 - t1 * t2`.
pub fn merge_randomized_response_probabilities(p1: f64, p2: f64) -> f64 {
    if p1 == 0.0 {
        return p2;
    }
    if p2 == 0.0 {
        return p1;
    }
    let t1 = p1 / (1.0 - p1);
    let t2 = p2 / (1.0 - p2);
    let t_star = t1 + t2 - t1 * t2;
    t_star / (1.0 + t_star)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_bounds_exact() {
        let mut seeded = SeededRandomizationStrategy::new(7);
        let mut deterministic = DeterministicRandomizationStrategy::new();
        for _ in 0..1000 {
            assert!(!seeded.next_boolean(0.0));
            assert!(seeded.next_boolean(1.0));
            assert!(!deterministic.next_boolean(0.0));
            assert!(deterministic.next_boolean(1.0));
        }
    }

    #[test]
    #[should_panic(expected = "probability must lie in [0, 1]")]
    fn test_probability_out_of_range() {
        SeededRandomizationStrategy::new(1).next_boolean(1.5);
    }

    #[test]
    fn test_seeded_reproducibility() {
        let mut a = SeededRandomizationStrategy::new(42);
        let mut b = SeededRandomizationStrategy::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_double(), b.next_double());
        }
    }

    #[test]
    fn test_next_double_range_and_mean() {
        let mut strategy = SeededRandomizationStrategy::new(1);
        let mut sum = 0.0;
        let draws = 10_000;
        for _ in 0..draws {
            let d = strategy.next_double();
            assert!((0.0..1.0).contains(&d));
            sum += d;
        }
        let mean = sum / f64::from(draws);
        assert!((mean - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_deterministic_midpoint() {
        let mut strategy = DeterministicRandomizationStrategy::new();
        assert_eq!(strategy.next_double(), 0.5);
        assert!(strategy.next_boolean(0.75));
        assert!(!strategy.next_boolean(0.25));
    }

    #[test]
    fn test_laplace_zero_scale() {
        let mut strategy = SeededRandomizationStrategy::new(3);
        for _ in 0..100 {
            assert_eq!(strategy.next_laplace(0.0), 0.0);
        }
    }

    #[test]
    fn test_laplace_mean_and_spread() {
        // Laplace(0, b) has mean 0 and standard deviation b * sqrt(2).
        let mut strategy = SeededRandomizationStrategy::new(5);
        let scale = 2.0;
        let draws = 10_000;
        let mut sum = 0.0;
        let mut abs_sum = 0.0;
        for _ in 0..draws {
            let x = strategy.next_laplace(scale);
            assert!(x.is_finite());
            sum += x;
            abs_sum += x.abs();
        }
        let n = f64::from(draws);
        assert!((sum / n).abs() < 0.15);
        // E|X| = scale
        assert!((abs_sum / n - scale).abs() < 0.15);
    }

    #[test]
    fn test_flip_probability_endpoints() {
        assert_eq!(randomized_response_probability(f64::INFINITY), 0.0);
        assert_eq!(randomized_response_probability(f64::NEG_INFINITY), 1.0);
        assert_eq!(randomized_response_probability(0.0), 0.5);
        let p = randomized_response_probability(2.0);
        assert!(p > 0.0 && p < 0.5);
    }

    #[test]
    fn test_merge_probabilities_algebra() {
        // symmetric
        assert_eq!(
            merge_randomized_response_probabilities(0.1, 0.2),
            merge_randomized_response_probabilities(0.2, 0.1)
        );

        // non-private is the identity
        assert_eq!(merge_randomized_response_probabilities(0.0, 0.1), 0.1);
        assert_eq!(merge_randomized_response_probabilities(0.15, 0.0), 0.15);
        assert_eq!(merge_randomized_response_probabilities(0.0, 0.0), 0.0);

        // matches the epsilon-space composition formula
        let epsilon1 = 1.2;
        let epsilon2 = 3.4;
        let p1 = randomized_response_probability(epsilon1);
        let p2 = randomized_response_probability(epsilon2);
        let epsilon_star =
            -((-epsilon1).exp() + (-epsilon2).exp() - (-(epsilon1 + epsilon2)).exp()).ln();
        let p_star = randomized_response_probability(epsilon_star);
        let merged = merge_randomized_response_probabilities(p1, p2);
        assert!((merged - p_star).abs() < 1e-6);

        // merging is strictly noisier than either input
        assert!(p_star > p1.max(p2));
    }
}
