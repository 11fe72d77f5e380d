// SSTable builder, reader and iterator tests
// Tests for writing tables of internal keys and reading them back.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use lsmkv::bloom::{BloomFilterPolicy, FilterPolicy};
use lsmkv::iterator::StorageIterator;
use lsmkv::lookup::LookupState;
use lsmkv::sstable::{CompressionType, SSTable, SSTableBuilder, TableBuilderOptions, TableReadOptions};
use lsmkv::types::{ValueType, encode_internal_key, extract_user_key};
use lsmkv::{Comparator, Error};
use tempfile::tempdir;

fn user_key(i: u32) -> Vec<u8> {
    format!("key_{i:05}").into_bytes()
}

fn build(path: &Path, n: u32, options: TableBuilderOptions) -> lsmkv::sstable::BuiltTable {
    let mut builder = SSTableBuilder::new(path, options).unwrap();
    for i in 0..n {
        let ikey = encode_internal_key(&user_key(i), u64::from(i) + 1, ValueType::Put);
        builder.add(&ikey, format!("val_{i:05}").as_bytes()).unwrap();
    }
    builder.finish().unwrap()
}

fn open(path: &Path) -> Arc<SSTable> {
    Arc::new(SSTable::open(1, path, &TableReadOptions::default()).unwrap())
}

fn get(table: &Arc<SSTable>, key: &[u8]) -> Option<Vec<u8>> {
    let mut state = LookupState::new(key, 1 << 40);
    table.get(&mut state, true).unwrap();
    state.finish().unwrap()
}

// =============================================================================
// Test 1: Write 1000 entries across many blocks, read all back
// =============================================================================
#[test]
fn read_1000_entries_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    let built = build(&path, 1000, TableBuilderOptions::default());

    assert_eq!(built.num_entries, 1000);
    assert_eq!(built.file_size, fs::metadata(&path).unwrap().len());
    assert_eq!(extract_user_key(&built.smallest), user_key(0).as_slice());
    assert_eq!(extract_user_key(&built.largest), user_key(999).as_slice());

    let table = open(&path);
    assert!(table.properties().num_data_blocks > 1);
    assert_eq!(table.properties().num_entries, 1000);
    for i in 0..1000 {
        assert_eq!(get(&table, &user_key(i)), Some(format!("val_{i:05}").into_bytes()));
    }
}

// =============================================================================
// Test 2: Missing keys before, between and after
// =============================================================================
#[test]
fn missing_keys_return_none() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    build(&path, 10, TableBuilderOptions::default());
    let table = open(&path);

    assert_eq!(get(&table, b"aaa"), None);
    assert_eq!(get(&table, b"key_00003x"), None);
    assert_eq!(get(&table, b"zzz"), None);
}

// =============================================================================
// Test 3: Lookups below an entry's sequence do not see it
// =============================================================================
#[test]
fn lookup_respects_sequence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    let mut builder = SSTableBuilder::new(&path, TableBuilderOptions::default()).unwrap();
    builder.add(&encode_internal_key(b"k", 20, ValueType::Delete), b"").unwrap();
    builder.add(&encode_internal_key(b"k", 10, ValueType::Put), b"old").unwrap();
    builder.finish().unwrap();
    let table = open(&path);

    let at = |seq| {
        let mut state = LookupState::new(b"k", seq);
        table.get(&mut state, false).unwrap();
        state.finish().unwrap()
    };
    assert_eq!(at(25), None);
    assert_eq!(at(15), Some(b"old".to_vec()));
    assert_eq!(at(5), None);
}

// =============================================================================
// Test 4: Forward and backward iteration, seek
// =============================================================================
#[test]
fn iterate_and_seek_across_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    build(
        &path,
        300,
        TableBuilderOptions {
            block_size: 256,
            ..TableBuilderOptions::default()
        },
    );
    let table = open(&path);

    let mut iter = table.iter(false);
    iter.seek_to_first().unwrap();
    let mut count = 0;
    while iter.is_valid() {
        assert_eq!(extract_user_key(iter.key()), user_key(count).as_slice());
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 300);

    iter.seek_to_last().unwrap();
    let mut count = 300;
    while iter.is_valid() {
        count -= 1;
        assert_eq!(extract_user_key(iter.key()), user_key(count).as_slice());
        iter.prev().unwrap();
    }
    assert_eq!(count, 0);

    iter.seek(&encode_internal_key(b"key_00150x", 1 << 40, ValueType::Merge)).unwrap();
    assert_eq!(extract_user_key(iter.key()), user_key(151).as_slice());
    iter.seek(&encode_internal_key(b"zzz", 1 << 40, ValueType::Merge)).unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 5: Compressed tables read back identically
// =============================================================================
#[test]
fn lz4_table_round_trip() {
    let dir = tempdir().unwrap();
    let write = |path: &Path, compression| {
        let mut builder = SSTableBuilder::new(
            path,
            TableBuilderOptions {
                compression,
                ..TableBuilderOptions::default()
            },
        )
        .unwrap();
        for i in 0..500 {
            let ikey = encode_internal_key(&user_key(i), u64::from(i) + 1, ValueType::Put);
            builder.add(&ikey, "payload-".repeat(12).as_bytes()).unwrap();
        }
        builder.finish().unwrap()
    };
    let plain = write(&dir.path().join("000002.sst"), CompressionType::None);
    let path = dir.path().join("000001.sst");
    let packed = write(&path, CompressionType::Lz4);
    assert!(packed.file_size < plain.file_size);

    let table = open(&path);
    assert_eq!(table.properties().compression, "lz4");
    for i in (0..500).step_by(7) {
        assert_eq!(get(&table, &user_key(i)), Some("payload-".repeat(12).into_bytes()));
    }
}

// =============================================================================
// Test 6: Filter excludes absent keys, keeps present ones
// =============================================================================
#[test]
fn filter_block_skips_absent_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    let policy: Arc<dyn FilterPolicy> = Arc::new(BloomFilterPolicy::new(10));
    build(
        &path,
        200,
        TableBuilderOptions {
            filter_policy: Some(Arc::clone(&policy)),
            ..TableBuilderOptions::default()
        },
    );
    let options = TableReadOptions {
        filter_policy: Some(policy),
        ..TableReadOptions::default()
    };
    let table = Arc::new(SSTable::open(1, &path, &options).unwrap());
    assert_eq!(table.properties().filter_policy, "lsmkv.BuiltinBloomFilter");
    for i in 0..200 {
        assert!(table.may_contain(&user_key(i)));
    }
    let misses = (0..1000)
        .filter(|i| table.may_contain(format!("absent_{i}").as_bytes()))
        .count();
    assert!(misses < 50, "{misses} false positives");
}

// =============================================================================
// Test 7: Damaged files are rejected
// =============================================================================
#[test]
fn open_nonexistent_or_corrupted_file_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    assert!(SSTable::open(1, &path, &TableReadOptions::default()).is_err());

    fs::write(&path, b"short").unwrap();
    assert!(SSTable::open(1, &path, &TableReadOptions::default()).unwrap_err().is_corruption());

    build(&path, 10, TableBuilderOptions::default());
    let mut raw = fs::read(&path).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0xff;
    fs::write(&path, &raw).unwrap();
    assert!(SSTable::open(1, &path, &TableReadOptions::default()).is_err());
}

// =============================================================================
// Test 8: Opening under a different comparator fails
// =============================================================================
struct ReverseComparator;

impl Comparator for ReverseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        b.cmp(a)
    }

    fn name(&self) -> &str {
        "test.Reverse"
    }
}

#[test]
fn comparator_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    build(&path, 5, TableBuilderOptions::default());
    let options = TableReadOptions {
        comparator: Arc::new(ReverseComparator),
        ..TableReadOptions::default()
    };
    let err = SSTable::open(1, &path, &options).err().unwrap();
    assert!(matches!(err, Error::ComparatorMismatch { .. }));
}

// =============================================================================
// Test 9: Offsets grow with key position
// =============================================================================
#[test]
fn approximate_offsets_are_monotonic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    build(
        &path,
        1000,
        TableBuilderOptions {
            block_size: 512,
            ..TableBuilderOptions::default()
        },
    );
    let table = open(&path);
    let at = |k: &[u8]| table.approximate_offset_of(&encode_internal_key(k, 1 << 40, ValueType::Merge));
    assert_eq!(at(b"a"), 0);
    assert!(at(&user_key(500)) > 0);
    assert!(at(&user_key(500)) < at(&user_key(900)));
    assert_eq!(at(b"zzz"), table.properties().data_size);
}

// =============================================================================
// Test 10: Empty values survive
// =============================================================================
#[test]
fn empty_value_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.sst");
    let mut builder = SSTableBuilder::new(&path, TableBuilderOptions::default()).unwrap();
    builder.add(&encode_internal_key(b"empty", 1, ValueType::Put), b"").unwrap();
    builder.finish().unwrap();
    assert_eq!(get(&open(&path), b"empty"), Some(Vec::new()));
}
