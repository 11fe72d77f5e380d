use crate::bloom::{BloomFilter, BloomFilterBuilder};

/// Builds and probes the per-table membership filter.
///
/// The policy name is stored in each table; a filter written under another
/// name is ignored on read rather than misinterpreted.
pub trait FilterPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8>;

    /// false → the key is definitely absent. Malformed filters answer true.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct BloomFilterPolicy {
    bits_per_key: f64,
}

impl BloomFilterPolicy {
    /// 10 bits per key gives roughly a 1% false positive rate.
    pub fn new(bits_per_key: usize) -> Self {
        Self {
            bits_per_key: bits_per_key as f64,
        }
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "lsmkv.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8> {
        let mut builder = BloomFilterBuilder::new(self.bits_per_key);
        for key in keys {
            builder.add_key(key);
        }
        builder.build().serialize()
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        match BloomFilter::deserialize(filter) {
            Ok(bf) => bf.may_contain(key),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_filters_absent_keys() {
        let policy = BloomFilterPolicy::new(10);
        let keys: Vec<Vec<u8>> = (0..100).map(|i| format!("key{i}").into_bytes()).collect();
        let filter = policy.create_filter(&keys);
        for key in &keys {
            assert!(policy.key_may_match(key, &filter));
        }
        let misses = (0..1000)
            .filter(|i| policy.key_may_match(format!("other{i}").as_bytes(), &filter))
            .count();
        assert!(misses < 50, "{misses} false positives out of 1000");
    }

    #[test]
    fn garbage_filter_never_excludes() {
        let policy = BloomFilterPolicy::new(10);
        assert!(policy.key_may_match(b"x", b"junk"));
    }
}
