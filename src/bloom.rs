//! Bloom filter pre-check for definite-miss short-circuiting
//!
//! A fixed-size probabilistic membership set sized from the expected element
//! count and target false-positive rate. Negative answers are authoritative
//! and let managers skip the storage read entirely; positive answers are
//! advisory and the read proceeds.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{CacheError, CacheResult};

const LN_2: f64 = std::f64::consts::LN_2;

/// Sizing parameters for a [`BloomFilter`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomConfig {
    /// Number of distinct keys the filter is sized for
    pub expected_elements: usize,
    /// Target false-positive probability in (0, 1)
    pub false_positive_rate: f64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_elements: 10_000,
            false_positive_rate: 0.01,
        }
    }
}

/// Point-in-time filter statistics
#[derive(Debug, Clone, PartialEq)]
pub struct BloomStats {
    /// Bit array size in bits
    pub size: usize,
    /// Number of hash functions
    pub hash_count: u32,
    /// Number of `add` calls observed
    pub element_count: usize,
    /// Empirical false-positive rate `(1 - e^(-k*n/m))^k` at the current
    /// element count
    pub false_positive_rate: f64,
    /// Fraction of bits currently set
    pub load_factor: f64,
}

/// Fixed-size Bloom filter shared by all callers of a manager.
///
/// `add` only ever ORs bits in, so concurrent adds are benign; the bit
/// array sits behind a short mutex and the element counter is advisory.
pub struct BloomFilter {
    bits: Mutex<Vec<u64>>,
    size: usize,
    hash_count: u32,
    elements: AtomicUsize,
}

impl BloomFilter {
    /// Build a filter sized for the given configuration.
    ///
    /// Bit-array size is `m = ceil(-n * ln p / (ln 2)^2)` and the hash count
    /// is `k = ceil((m / n) * ln 2)`.
    pub fn new(config: BloomConfig) -> CacheResult<Self> {
        if config.expected_elements == 0 {
            return Err(CacheError::Config(
                "bloom filter expected_elements must be greater than zero".to_string(),
            ));
        }
        if !(config.false_positive_rate > 0.0 && config.false_positive_rate < 1.0) {
            return Err(CacheError::Config(format!(
                "bloom filter false_positive_rate must be in (0, 1), got {}",
                config.false_positive_rate
            )));
        }

        let n = config.expected_elements as f64;
        let size = (-n * config.false_positive_rate.ln() / (LN_2 * LN_2)).ceil() as usize;
        let size = size.max(1);
        let hash_count = ((size as f64 / n) * LN_2).ceil().max(1.0) as u32;
        let words = size.div_ceil(64);

        Ok(Self {
            bits: Mutex::new(vec![0u64; words]),
            size,
            hash_count,
            elements: AtomicUsize::new(0),
        })
    }

    /// Record a key as present
    pub fn add(&self, key: &str) {
        let mut bits = self.bits.lock();
        for seed in 0..self.hash_count {
            let bit = self.bit_index(key, seed);
            bits[bit / 64] |= 1u64 << (bit % 64);
        }
        drop(bits);
        self.elements.fetch_add(1, Ordering::Relaxed);
    }

    /// Membership test: `false` means the key was definitely never added,
    /// `true` means it may have been
    pub fn might_contain(&self, key: &str) -> bool {
        let bits = self.bits.lock();
        (0..self.hash_count).all(|seed| {
            let bit = self.bit_index(key, seed);
            bits[bit / 64] & (1u64 << (bit % 64)) != 0
        })
    }

    /// Zero the bit array and the element counter
    pub fn clear(&self) {
        let mut bits = self.bits.lock();
        bits.iter_mut().for_each(|word| *word = 0);
        drop(bits);
        self.elements.store(0, Ordering::Relaxed);
    }

    /// Current filter statistics
    pub fn stats(&self) -> BloomStats {
        let element_count = self.elements.load(Ordering::Relaxed);
        let set_bits: u32 = self.bits.lock().iter().map(|word| word.count_ones()).sum();

        let k = f64::from(self.hash_count);
        let n = element_count as f64;
        let m = self.size as f64;
        let false_positive_rate = (1.0 - (-k * n / m).exp()).powf(k);

        BloomStats {
            size: self.size,
            hash_count: self.hash_count,
            element_count,
            false_positive_rate,
            load_factor: f64::from(set_bits) / m,
        }
    }

    /// The `seed`-th bit position for `key`: a multiplicative string hash
    /// folded over the bytes, re-seeded per hash index
    fn bit_index(&self, key: &str, seed: u32) -> usize {
        let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ (u64::from(seed).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        for byte in key.bytes() {
            hash = hash.wrapping_mul(0x0100_0000_01b3) ^ u64::from(byte);
        }
        (hash % self.size as u64) as usize
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("size", &self.size)
            .field("hash_count", &self.hash_count)
            .field("elements", &self.elements.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_filter() -> BloomFilter {
        BloomFilter::new(BloomConfig {
            expected_elements: 1_000,
            false_positive_rate: 0.01,
        })
        .unwrap()
    }

    #[test]
    fn test_sizing_formulas() {
        let filter = BloomFilter::new(BloomConfig {
            expected_elements: 10_000,
            false_positive_rate: 0.01,
        })
        .unwrap();

        // m = ceil(-10000 * ln(0.01) / (ln 2)^2) = 95851, k = ceil(m/n * ln 2) = 7
        assert_eq!(filter.size, 95_851);
        assert_eq!(filter.hash_count, 7);
    }

    #[test]
    fn test_added_keys_are_reported() {
        let filter = small_filter();
        filter.add("alpha");
        filter.add("beta");
        assert!(filter.might_contain("alpha"));
        assert!(filter.might_contain("beta"));
    }

    #[test]
    fn test_clear_resets_filter() {
        let filter = small_filter();
        filter.add("alpha");
        filter.clear();
        assert!(!filter.might_contain("alpha"));
        assert_eq!(filter.stats().element_count, 0);
        assert_eq!(filter.stats().load_factor, 0.0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(BloomFilter::new(BloomConfig {
            expected_elements: 0,
            false_positive_rate: 0.01,
        })
        .is_err());
        assert!(BloomFilter::new(BloomConfig {
            expected_elements: 100,
            false_positive_rate: 1.5,
        })
        .is_err());
    }

    #[test]
    fn test_stats_track_elements() {
        let filter = small_filter();
        for i in 0..100 {
            filter.add(&format!("key-{i}"));
        }

        let stats = filter.stats();
        assert_eq!(stats.element_count, 100);
        assert!(stats.load_factor > 0.0);
        assert!(stats.false_positive_rate < 0.01);
    }

    proptest! {
        // Negative answers must be authoritative: anything added is found.
        #[test]
        fn prop_no_false_negatives(keys in proptest::collection::vec("[a-z0-9:]{1,32}", 1..200)) {
            let filter = small_filter();
            for key in &keys {
                filter.add(key);
            }
            for key in &keys {
                prop_assert!(filter.might_contain(key));
            }
        }
    }
}
