//! Bloom filters guarding table reads.
//!
//! One filter is written per table over every user key it holds. A point
//! read that misses the filter skips the table without touching its index
//! or data blocks.

pub mod builder;
pub mod policy;

use bytes::{Buf, BufMut};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

pub use builder::BloomFilterBuilder;
pub use policy::{BloomFilterPolicy, FilterPolicy};

/// `[probes u32][bit count u32]` ahead of the bit words.
const FILTER_HEADER: usize = 8;

/// Smallest bit array handed out, so tiny tables still filter usefully.
const MIN_BITS: u32 = 64;

/// A fixed-size bit array probed `k` times per key.
///
/// The `k` probe positions come from one 128-bit xxh3 hash split into two
/// halves `a` and `b`: probe `i` lands on `(a + i * b) % bits`. A clear bit
/// on any probe proves absence; all bits set means "maybe present".
pub struct BloomFilter {
    words: Vec<u64>,
    probes: u32,
    bit_count: u32,
}

impl BloomFilter {
    /// Sizes the filter for `expected_keys` at `bits_per_key` bits each.
    /// The probe count is `bits_per_key * ln 2`, the optimum for that ratio.
    pub fn with_bits_per_key(expected_keys: usize, bits_per_key: f64) -> Self {
        let bits_per_key = bits_per_key.max(1.0);
        let wanted = (expected_keys.max(1) as f64 * bits_per_key).ceil();
        let bit_count = (wanted.min(u32::MAX as f64) as u32).max(MIN_BITS);
        let probes = ((bits_per_key * std::f64::consts::LN_2).round() as u32).clamp(1, 30);
        Self {
            words: vec![0; (bit_count as usize).div_ceil(64)],
            probes,
            bit_count,
        }
    }

    /// Sizes the filter for a target false positive rate in `(0, 1)`,
    /// spending `-log2(rate) / ln 2` bits per key.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let rate = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let bits_per_key = -rate.log2() / std::f64::consts::LN_2;
        Self::with_bits_per_key(expected_keys, bits_per_key)
    }

    pub fn insert(&mut self, key: &[u8]) {
        let bits: Vec<usize> = self.positions(key).collect();
        for bit in bits {
            self.words[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    /// false → the key was never inserted.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.positions(key)
            .all(|bit| self.words[bit / 64] & (1u64 << (bit % 64)) != 0)
    }

    pub fn num_hashes(&self) -> u32 {
        self.probes
    }

    pub fn num_bits(&self) -> u32 {
        self.bit_count
    }

    /// Encodes the filter as stored in a table's filter block.
    ///
    /// ```text
    /// ┌────────────┬───────────────┬─────────────────────────┐
    /// │ probes u32 │ bit count u32 │ bit words (u64 LE each) │
    /// └────────────┴───────────────┴─────────────────────────┘
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FILTER_HEADER + self.words.len() * 8);
        out.put_u32_le(self.probes);
        out.put_u32_le(self.bit_count);
        self.words.iter().for_each(|w| out.put_u64_le(*w));
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < FILTER_HEADER {
            return Err(Error::corruption("bloom filter too short"));
        }
        let mut input = data;
        let probes = input.get_u32_le();
        let bit_count = input.get_u32_le();
        let word_count = (bit_count as usize).div_ceil(64);
        if probes == 0 || bit_count == 0 || input.len() != word_count * 8 {
            return Err(Error::corruption(format!(
                "bloom filter header ({probes} probes, {bit_count} bits) does not match {} payload bytes",
                input.len()
            )));
        }
        let words = (0..word_count).map(|_| input.get_u64_le()).collect();
        Ok(Self {
            words,
            probes,
            bit_count,
        })
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let hash = xxh3_128(key);
        let a = hash as u64;
        let b = (hash >> 64) as u64;
        let bits = u64::from(self.bit_count);
        (0..u64::from(self.probes)).map(move |i| (a.wrapping_add(i.wrapping_mul(b)) % bits) as usize)
    }
}
