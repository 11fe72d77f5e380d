// MemTable with internal keys
// Tests for versioned entries, tombstones, snapshots and concurrent readers.

use std::sync::Arc;
use std::thread;

use lsmkv::BytewiseComparator;
use lsmkv::iterator::StorageIterator;
use lsmkv::lookup::LookupState;
use lsmkv::memtable::MemTable;
use lsmkv::types::{ValueType, parse_internal_key};

fn new_table(limit: usize) -> Arc<MemTable> {
    Arc::new(MemTable::new(1, limit, Arc::new(BytewiseComparator)))
}

fn get(mt: &MemTable, key: &[u8], seq: u64) -> Option<Vec<u8>> {
    let mut state = LookupState::new(key, seq);
    mt.get(&mut state).unwrap();
    state.finish().unwrap()
}

// =============================================================================
// Test 1: Basic put and get
// =============================================================================
#[test]
fn put_then_get_returns_value() {
    let mt = new_table(1024 * 1024);
    mt.insert(1, ValueType::Put, b"key", b"value");
    assert_eq!(get(&mt, b"key", 1), Some(b"value".to_vec()));
}

// =============================================================================
// Test 2: Missing key is unresolved
// =============================================================================
#[test]
fn get_nonexistent_is_not_found() {
    let mt = new_table(1024 * 1024);
    mt.insert(1, ValueType::Put, b"a", b"1");
    let mut state = LookupState::new(b"missing", 10);
    assert!(!mt.get(&mut state).unwrap());
    assert!(!state.is_done());
    assert_eq!(state.finish().unwrap(), None);
}

// =============================================================================
// Test 3: Tombstone resolves the lookup as deleted
// =============================================================================
#[test]
fn delete_shadows_put() {
    let mt = new_table(1024 * 1024);
    mt.insert(1, ValueType::Put, b"key", b"value");
    mt.insert(2, ValueType::Delete, b"key", b"");

    let mut state = LookupState::new(b"key", 2);
    assert!(mt.get(&mut state).unwrap());
    assert_eq!(state.finish().unwrap(), None);
    assert_eq!(get(&mt, b"key", 2), None);
}

// =============================================================================
// Test 4: Older sequences still see older versions
// =============================================================================
#[test]
fn lookup_respects_sequence() {
    let mt = new_table(1024 * 1024);
    mt.insert(1, ValueType::Put, b"key", b"v1");
    mt.insert(5, ValueType::Delete, b"key", b"");
    mt.insert(9, ValueType::Put, b"key", b"v9");

    assert_eq!(get(&mt, b"key", 1), Some(b"v1".to_vec()));
    assert_eq!(get(&mt, b"key", 4), Some(b"v1".to_vec()));
    assert_eq!(get(&mt, b"key", 5), None);
    assert_eq!(get(&mt, b"key", 100), Some(b"v9".to_vec()));

    let mut before = LookupState::new(b"key", 0);
    assert!(!mt.get(&mut before).unwrap());
}

// =============================================================================
// Test 5: Prefix keys do not leak into each other
// =============================================================================
#[test]
fn neighbouring_user_keys_stay_separate() {
    let mt = new_table(1024 * 1024);
    mt.insert(1, ValueType::Put, b"ab", b"x");
    mt.insert(2, ValueType::Put, b"a", b"y");
    mt.insert(3, ValueType::Put, b"abc", b"z");
    assert_eq!(get(&mt, b"a", 10), Some(b"y".to_vec()));
    assert_eq!(get(&mt, b"ab", 10), Some(b"x".to_vec()));
    assert_eq!(get(&mt, b"abc", 10), Some(b"z".to_vec()));
    assert_eq!(get(&mt, b"b", 10), None);
}

// =============================================================================
// Test 6: Full threshold
// =============================================================================
#[test]
fn is_full_after_limit() {
    let mt = new_table(100);
    assert!(!mt.is_full());
    for i in 0..10u64 {
        mt.insert(i + 1, ValueType::Put, format!("key{i}").as_bytes(), &[0u8; 16]);
    }
    assert!(mt.is_full());
    assert!(mt.size() >= 100);
}

// =============================================================================
// Test 7: Iterator yields every version, newest first per key
// =============================================================================
#[test]
fn iterator_includes_every_version() {
    let mt = new_table(1024 * 1024);
    mt.insert(1, ValueType::Put, b"b", b"b1");
    mt.insert(2, ValueType::Put, b"a", b"a2");
    mt.insert(3, ValueType::Delete, b"b", b"");
    mt.insert(4, ValueType::Merge, b"a", b"a4");

    let mut iter = mt.iter();
    let mut seen = Vec::new();
    while iter.is_valid() {
        let parsed = parse_internal_key(iter.key()).unwrap();
        seen.push((parsed.user_key.to_vec(), parsed.sequence, parsed.value_type));
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), 4, ValueType::Merge),
            (b"a".to_vec(), 2, ValueType::Put),
            (b"b".to_vec(), 3, ValueType::Delete),
            (b"b".to_vec(), 1, ValueType::Put),
        ]
    );
    assert_eq!(mt.len(), 4);
    assert_eq!(mt.largest_sequence(), 4);
}

// =============================================================================
// Test 8: Freeze flag
// =============================================================================
#[test]
fn freeze_marks_immutable() {
    let mt = new_table(1024);
    assert!(!mt.is_frozen());
    mt.freeze();
    assert!(mt.is_frozen());
    assert_eq!(mt.id(), 1);
}

// =============================================================================
// Test 9: Concurrent readers alongside a writer
// =============================================================================
#[test]
fn readers_and_writer_concurrent() {
    let mt = new_table(16 * 1024 * 1024);
    mt.insert(1, ValueType::Put, b"stable", b"value");

    let writer = {
        let mt = Arc::clone(&mt);
        thread::spawn(move || {
            for i in 0..500u64 {
                mt.insert(i + 2, ValueType::Put, format!("key{i:04}").as_bytes(), b"v");
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mt = Arc::clone(&mt);
            thread::spawn(move || {
                for _ in 0..200 {
                    assert_eq!(get(&mt, b"stable", u64::MAX >> 8), Some(b"value".to_vec()));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(mt.len(), 501);
    assert_eq!(get(&mt, b"key0499", 1000), Some(b"v".to_vec()));
}
