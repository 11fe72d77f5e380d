// Bloom filter + filter policy tests
// Tests for membership answers, false positive rates and the stored filter format.

use lsmkv::bloom::{BloomFilter, BloomFilterBuilder};
use lsmkv::{BloomFilterPolicy, FilterPolicy};

fn keys(prefix: &str, range: std::ops::Range<usize>) -> Vec<Vec<u8>> {
    range.map(|i| format!("{prefix}{i}").into_bytes()).collect()
}

fn false_positive_rate(policy: &dyn FilterPolicy, filter: &[u8], probes: &[Vec<u8>]) -> f64 {
    let hits = probes.iter().filter(|k| policy.key_may_match(k, filter)).count();
    hits as f64 / probes.len() as f64
}

// =============================================================================
// Test 1: A filter with nothing inserted excludes everything
// =============================================================================
#[test]
fn test_empty_filter_excludes_all() {
    let bf = BloomFilter::with_bits_per_key(100, 10.0);
    assert!(!bf.may_contain(b"any_key"));
    assert!(!bf.may_contain(b""));
}

// =============================================================================
// Test 2: No false negatives, including odd keys
// =============================================================================
#[test]
fn test_inserted_keys_always_match() {
    let mut bf = BloomFilter::with_bits_per_key(16, 10.0);
    let large = vec![7u8; 256 * 1024];
    let binary = vec![0x00, 0x01, 0xFF, 0xFE];
    for key in [b"".as_slice(), b"apple", &large, &binary] {
        bf.insert(key);
        bf.insert(key);
    }
    for key in [b"".as_slice(), b"apple", &large, &binary] {
        assert!(bf.may_contain(key));
    }
}

// =============================================================================
// Test 3: Policy at 10 bits/key stays near 1% false positives
// =============================================================================
#[test]
fn test_policy_false_positive_rate() {
    let policy = BloomFilterPolicy::new(10);
    let present = keys("key_", 0..10_000);
    let filter = policy.create_filter(&present);

    assert!(present.iter().all(|k| policy.key_may_match(k, &filter)));
    let rate = false_positive_rate(&policy, &filter, &keys("key_", 10_000..20_000));
    assert!(rate < 0.02, "false positive rate {rate}");
}

// =============================================================================
// Test 4: More bits per key, fewer false positives
// =============================================================================
#[test]
fn test_bits_per_key_trades_space_for_accuracy() {
    let present = keys("k", 0..5_000);
    let absent = keys("k", 5_000..15_000);

    let loose = BloomFilterPolicy::new(4);
    let tight = BloomFilterPolicy::new(16);
    let loose_filter = loose.create_filter(&present);
    let tight_filter = tight.create_filter(&present);

    assert!(tight_filter.len() > loose_filter.len());
    let loose_rate = false_positive_rate(&loose, &loose_filter, &absent);
    let tight_rate = false_positive_rate(&tight, &tight_filter, &absent);
    assert!(tight_rate < loose_rate, "{tight_rate} vs {loose_rate}");
    assert!(tight_rate < 0.005);
}

// =============================================================================
// Test 5: Target-rate constructor honours the requested rate
// =============================================================================
#[test]
fn test_target_rate_constructor() {
    for target in [0.1, 0.01, 0.001] {
        let n = 5_000;
        let mut bf = BloomFilter::new(n, target);
        for i in 0..n {
            bf.insert(format!("t_{i}").as_bytes());
        }
        let hits = (n..n * 2).filter(|i| bf.may_contain(format!("t_{i}").as_bytes())).count();
        let rate = hits as f64 / n as f64;
        assert!(rate < target * 3.0, "target {target}, got {rate}");
    }
}

// =============================================================================
// Test 6: Builder records consecutive duplicates once
// =============================================================================
#[test]
fn test_builder_dedups_versions_of_one_key() {
    let mut builder = BloomFilterBuilder::new(10.0);
    for key in [b"a".as_slice(), b"a", b"a", b"b", b"b", b"c"] {
        builder.add_key(key);
    }
    assert_eq!(builder.len(), 3);
    let bf = builder.build();
    for key in [b"a", b"b", b"c"] {
        assert!(bf.may_contain(key));
    }
}

// =============================================================================
// Test 7: Stored filter decodes to identical answers
// =============================================================================
#[test]
fn test_serialized_filter_answers_the_same() {
    let mut bf = BloomFilter::with_bits_per_key(500, 10.0);
    for i in 0..500 {
        bf.insert(format!("k{i}").as_bytes());
    }
    let restored = BloomFilter::deserialize(&bf.serialize()).unwrap();
    assert_eq!(restored.num_hashes(), bf.num_hashes());
    assert_eq!(restored.num_bits(), bf.num_bits());
    for i in 0..1000 {
        let key = format!("k{i}");
        assert_eq!(restored.may_contain(key.as_bytes()), bf.may_contain(key.as_bytes()));
    }
}

// =============================================================================
// Test 8: Damaged filters are rejected, and the policy then never excludes
// =============================================================================
#[test]
fn test_damaged_filter_rejected() {
    assert!(BloomFilter::deserialize(&[1, 2, 3]).is_err());

    let policy = BloomFilterPolicy::new(10);
    let mut filter = policy.create_filter(&keys("x", 0..10));
    filter.truncate(filter.len() - 3);
    assert!(policy.key_may_match(b"never-inserted", &filter));
}
