use crate::bloom::BloomFilter;

/// Collects keys while an SSTable is being written, then sizes and fills
/// the filter once the final key count is known.
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    bits_per_key: f64,
}

impl BloomFilterBuilder {
    pub fn new(bits_per_key: f64) -> Self {
        Self {
            keys: Vec::new(),
            bits_per_key,
        }
    }

    /// Add a key to the bloom filter being built. Consecutive duplicates
    /// (several versions of one user key) are recorded once.
    pub fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().map(Vec::as_slice) != Some(key) {
            self.keys.push(key.to_vec());
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Finalize and return the bloom filter.
    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::with_bits_per_key(self.keys.len().max(1), self.bits_per_key);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}
