//! End-to-end estimation accuracy through the public API.

use private_cardinality_sketch::{
    merge_randomized_response_probabilities, randomized_response_probability, HyperLogLog,
    PrivateLpcaSketch, RandomizationStrategy, SeededRandomizationStrategy, SfmSketch,
};
use test_case::test_case;

const BUCKETS: usize = 4096;
const PRECISION: usize = 24;

fn sfm_with_items(
    range: std::ops::Range<u64>,
    epsilon: f64,
    seed: u64,
) -> SfmSketch<SeededRandomizationStrategy> {
    let mut sketch =
        SfmSketch::create(BUCKETS, PRECISION, SeededRandomizationStrategy::new(seed)).unwrap();
    for item in range {
        sketch.add(&item);
    }
    sketch.enable_privacy(epsilon).unwrap();
    sketch
}

fn assert_relative_error(estimate: u64, actual: u64, bound: f64) {
    let difference = (estimate as f64 - actual as f64).abs();
    assert!(
        difference <= bound * actual as f64,
        "estimate {estimate} outside {}% of {actual}",
        bound * 100.0
    );
}

#[test_case(10_000)]
#[test_case(100_000)]
#[test_case(1_000_000)]
fn sfm_estimates_real_insertions(n: u64) {
    let sketch = sfm_with_items(0..n, SfmSketch::NON_PRIVATE_EPSILON, n);
    assert_relative_error(sketch.cardinality(), n, 0.1);
}

#[test_case(3.0)]
#[test_case(1.0)]
fn sfm_estimates_under_privacy(epsilon: f64) {
    let n = 500_000;
    let sketch = sfm_with_items(0..n, epsilon, 7);
    assert_relative_error(sketch.cardinality(), n, 0.15);
}

#[test_case(3.0, 3.0)]
#[test_case(3.0, 4.0)]
#[test_case(4.0, 3.0)]
#[test_case(3.0, f64::INFINITY)]
#[test_case(f64::INFINITY, 4.0)]
#[test_case(f64::INFINITY, f64::INFINITY)]
fn sfm_merged_estimates(epsilon1: f64, epsilon2: f64) {
    // overlapping ranges; the union has 450k distinct items
    let mut sketch1 = sfm_with_items(0..300_000, epsilon1, 11);
    let sketch2 = sfm_with_items(150_000..450_000, epsilon2, 13);
    sketch1.merge_with(&sketch2).unwrap();

    let expected_probability = merge_randomized_response_probabilities(
        randomized_response_probability(epsilon1),
        randomized_response_probability(epsilon2),
    );
    assert_eq!(
        sketch1.randomized_response_probability(),
        expected_probability
    );

    let bound = if expected_probability == 0.0 { 0.1 } else { 0.15 };
    assert_relative_error(sketch1.cardinality(), 450_000, bound);
}

/// Base sketch backed by a plain bucket array, simulating the per-bucket
/// max geometric rank an HLL would hold after `n` distinct insertions.
struct ArrayHll {
    values: Vec<u32>,
    max_bucket_value: u32,
}

impl ArrayHll {
    fn simulated(n: usize, buckets: usize, max_bucket_value: u32, seed: u64) -> Self {
        let mut strategy = SeededRandomizationStrategy::new(seed);
        let per_bucket = n / buckets;
        let values = (0..buckets)
            .map(|_| {
                let mut max_rank = 0u32;
                for _ in 0..per_bucket {
                    let uniform = strategy.next_double().max(f64::MIN_POSITIVE);
                    let rank = ((-uniform.log2()).floor() as u32 + 1).min(max_bucket_value);
                    max_rank = max_rank.max(rank);
                }
                max_rank
            })
            .collect();
        Self {
            values,
            max_bucket_value,
        }
    }
}

impl HyperLogLog for ArrayHll {
    fn number_of_buckets(&self) -> usize {
        self.values.len()
    }

    fn max_bucket_value(&self) -> u32 {
        self.max_bucket_value
    }

    fn for_each_bucket<F>(&self, mut f: F)
    where
        F: FnMut(usize, u32),
    {
        for (index, &value) in self.values.iter().enumerate() {
            f(index, value);
        }
    }
}

#[test_case(f64::INFINITY, f64::INFINITY; "no privacy")]
#[test_case(4.0, 4.0; "moderate privacy")]
fn lpca_estimates_simulated_base_sketch(epsilon_threshold: f64, epsilon_randomized_response: f64) {
    let n = 200_000;
    let hll = ArrayHll::simulated(n, 1024, 64, 17);
    let sketch = PrivateLpcaSketch::new(
        &hll,
        epsilon_threshold,
        epsilon_randomized_response,
        SeededRandomizationStrategy::new(19),
    )
    .unwrap();
    assert_relative_error(sketch.cardinality(), n as u64, 0.2);
}

#[test]
fn lpca_update_absorbs_new_data() {
    let hll1 = ArrayHll::simulated(100_000, 1024, 64, 23);
    let hll2 = ArrayHll::simulated(100_000, 1024, 64, 29);
    let mut sketch = PrivateLpcaSketch::new(
        &hll1,
        f64::INFINITY,
        f64::INFINITY,
        SeededRandomizationStrategy::new(31),
    )
    .unwrap();
    let before = sketch.cardinality();
    sketch.update(&hll2).unwrap();
    // disjoint simulated populations roughly double the estimate
    assert_relative_error(sketch.cardinality(), 2 * before, 0.25);
}
