//! Interface to the non-private base sketch.
//!
//! The privacy layer never constructs or hashes into a HyperLogLog itself;
//! it only reads per-bucket max-leading-zero-run counters from one. Modeling
//! the base sketch as a trait keeps the layer independent of any concrete
//! HLL implementation or hashing scheme, and lets tests drive it with
//! synthetic bucket arrays.

/// Read-only view of a HyperLogLog-style base sketch: a power-of-two number
/// of buckets, each holding a small non-negative counter.
pub trait HyperLogLog {
    /// Number of buckets; a power of two, fixed for the sketch's lifetime.
    fn number_of_buckets(&self) -> usize;

    /// Largest value a bucket can structurally hold (not the largest value
    /// currently observed).
    fn max_bucket_value(&self) -> u32;

    /// Visit every bucket in index order.
    fn for_each_bucket<F>(&self, f: F)
    where
        F: FnMut(usize, u32);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::HyperLogLog;
    use crate::random::{RandomizationStrategy, SeededRandomizationStrategy};

    /// Synthetic base sketch backed by a plain bucket array.
    pub(crate) struct ArrayHll {
        pub(crate) values: Vec<u32>,
        pub(crate) max_bucket_value: u32,
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

    /// Simulate the bucket array of an HLL after `n` distinct insertions:
    /// each bucket keeps the max rank (leading zeros + 1) over `n / buckets`
    /// geometric draws.
    pub(crate) fn simulated_hll(n: usize, buckets: usize, max_bucket_value: u32, seed: u64) -> ArrayHll {
        let mut strategy = SeededRandomizationStrategy::new(seed);
        let per_bucket = n / buckets;
        let values = (0..buckets)
            .map(|_| {
                let mut max_rank = 0u32;
                for _ in 0..per_bucket {
                    let u = strategy.next_double().max(f64::MIN_POSITIVE);
                    let rank = ((-u.log2()).floor() as u32 + 1).min(max_bucket_value);
                    max_rank = max_rank.max(rank);
                }
                max_rank
            })
            .collect();
        ArrayHll {
            values,
            max_bucket_value,
        }
    }
}
