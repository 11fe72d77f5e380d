// DB iterator tests
// Tests for the merged user-key view over memtables and tables.

use lsmkv::{DB, FlushOptions, Options, ReadOptions, StorageIterator};
use tempfile::tempdir;

fn test_options() -> Options {
    Options {
        create_if_missing: true,
        ..Options::default()
    }
}

fn collect_forward(db: &DB, opts: &ReadOptions) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = db.iter(opts).unwrap();
    iter.seek_to_first().unwrap();
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    out
}

fn kv(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}

// =============================================================================
// Test 1: Empty database
// =============================================================================
#[test]
fn empty_database_yields_nothing() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    assert!(!iter.is_valid());
    iter.seek_to_first().unwrap();
    assert!(!iter.is_valid());
    iter.seek_to_last().unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 2: Newest value per key, tombstones hidden, sources merged
// =============================================================================
#[test]
fn merges_memtable_and_tables() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();

    db.put(b"b", b"old").unwrap();
    db.put(b"d", b"gone").unwrap();
    db.flush(&FlushOptions::default()).unwrap();
    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.delete(b"d").unwrap();
    db.put(b"c", b"3").unwrap();

    assert_eq!(
        collect_forward(&db, &ReadOptions::default()),
        vec![kv("a", "1"), kv("b", "2"), kv("c", "3")]
    );
}

// =============================================================================
// Test 3: Backward iteration and direction changes
// =============================================================================
#[test]
fn reverse_and_direction_switch() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    for k in ["a", "b", "c", "d"] {
        db.put(k.as_bytes(), k.to_uppercase().as_bytes()).unwrap();
    }
    db.put(b"b", b"B2").unwrap();
    db.delete(b"c").unwrap();

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    iter.seek_to_last().unwrap();
    let mut backward = Vec::new();
    while iter.is_valid() {
        backward.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.prev().unwrap();
    }
    assert_eq!(backward, vec![kv("d", "D"), kv("b", "B2"), kv("a", "A")]);

    iter.seek(b"b").unwrap();
    assert_eq!(iter.key(), b"b");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"d");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"b");
    assert_eq!(iter.value(), b"B2");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"a");
    iter.next().unwrap();
    assert_eq!(iter.key(), b"b");
}

// =============================================================================
// Test 4: Seek lands on the first live key at or after the target
// =============================================================================
#[test]
fn seek_skips_deleted_and_missing() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..50 {
        db.put(format!("key{i:02}").as_bytes(), b"v").unwrap();
    }
    db.flush(&FlushOptions::default()).unwrap();
    db.delete(b"key10").unwrap();

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    iter.seek(b"key10").unwrap();
    assert_eq!(iter.key(), b"key11");
    iter.seek(b"key255").unwrap();
    assert_eq!(iter.key(), b"key26");
    iter.seek(b"zzz").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 5: An iterator reads a stable view despite later writes
// =============================================================================
#[test]
fn iterator_is_isolated_from_later_writes() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();

    let mut iter = db.iter(&ReadOptions::default()).unwrap();
    db.put(b"a", b"changed").unwrap();
    db.put(b"c", b"new").unwrap();
    db.delete(b"b").unwrap();
    db.flush(&FlushOptions::default()).unwrap();

    iter.seek_to_first().unwrap();
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![kv("a", "1"), kv("b", "2")]);
}

// =============================================================================
// Test 6: Iterating through a snapshot
// =============================================================================
#[test]
fn iterator_at_snapshot() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    db.put(b"x", b"1").unwrap();
    let snap = db.snapshot();
    db.put(b"x", b"2").unwrap();
    db.put(b"y", b"3").unwrap();

    let opts = ReadOptions {
        snapshot: Some(snap),
        ..ReadOptions::default()
    };
    assert_eq!(collect_forward(&db, &opts), vec![kv("x", "1")]);
    assert_eq!(
        collect_forward(&db, &ReadOptions::default()),
        vec![kv("x", "2"), kv("y", "3")]
    );
}

// =============================================================================
// Test 7: Full scan across many tables and levels
// =============================================================================
#[test]
fn full_scan_after_compaction() {
    let dir = tempdir().unwrap();
    let db = DB::open(
        dir.path(),
        Options {
            write_buffer_size: 8 * 1024,
            ..test_options()
        },
    )
    .unwrap();
    for i in (0..2000).rev() {
        db.put(format!("key{i:05}").as_bytes(), format!("v{i}").as_bytes()).unwrap();
    }
    db.compact_range(None, None).unwrap();

    let entries = collect_forward(&db, &ReadOptions::default());
    assert_eq!(entries.len(), 2000);
    for (i, (k, v)) in entries.iter().enumerate() {
        assert_eq!(k, format!("key{i:05}").as_bytes());
        assert_eq!(v, format!("v{i}").as_bytes());
    }
}

// =============================================================================
// Test 8: A prefix bound limits iteration in both directions
// =============================================================================
#[test]
fn prefix_bounds_iteration() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    for key in ["app", "apple:1", "apple:2", "apple:3", "apricot", "banana"] {
        db.put(key.as_bytes(), key.as_bytes()).unwrap();
    }
    db.flush(&FlushOptions::default()).unwrap();
    db.delete(b"apple:3").unwrap();
    db.put(b"apple:0", b"late").unwrap();

    let opts = ReadOptions {
        prefix: Some(b"apple:".to_vec()),
        ..ReadOptions::default()
    };
    assert_eq!(
        collect_forward(&db, &opts),
        vec![kv("apple:0", "late"), kv("apple:1", "apple:1"), kv("apple:2", "apple:2")]
    );

    let mut iter = db.iter(&opts).unwrap();
    iter.seek_to_last().unwrap();
    assert_eq!(iter.key(), b"apple:2");
    iter.prev().unwrap();
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"apple:0");
    iter.prev().unwrap();
    assert!(!iter.is_valid());

    // Seeks before the prefix start at it; seeks past it find nothing.
    iter.seek(b"a").unwrap();
    assert_eq!(iter.key(), b"apple:0");
    iter.seek(b"apple:15").unwrap();
    assert_eq!(iter.key(), b"apple:2");
    iter.next().unwrap();
    assert!(!iter.is_valid());
    iter.seek(b"b").unwrap();
    assert!(!iter.is_valid());

    let none = ReadOptions {
        prefix: Some(b"cherry".to_vec()),
        ..ReadOptions::default()
    };
    assert!(collect_forward(&db, &none).is_empty());
    let mut iter = db.iter(&none).unwrap();
    iter.seek_to_last().unwrap();
    assert!(!iter.is_valid());

    // Point reads are not bounded.
    assert_eq!(db.get_opt(&opts, b"banana").unwrap(), Some(b"banana".to_vec()));
}
