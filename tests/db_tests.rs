// DB API tests
// Tests for point writes and reads, batches, and open-time checks.

use lsmkv::filename::{list_wal_files, wal_file_name};
use lsmkv::{DB, Error, FlushOptions, Options, ReadOptions, WriteBatch, WriteOptions};
use tempfile::tempdir;

fn test_options() -> Options {
    Options {
        create_if_missing: true,
        ..Options::default()
    }
}

// =============================================================================
// Test 1: Put, get, overwrite, delete
// =============================================================================
#[test]
fn put_get_overwrite_delete() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();

    db.put(b"name", b"alice").unwrap();
    assert_eq!(db.get(b"name").unwrap(), Some(b"alice".to_vec()));

    db.put(b"name", b"bob").unwrap();
    assert_eq!(db.get(b"name").unwrap(), Some(b"bob".to_vec()));

    db.delete(b"name").unwrap();
    assert_eq!(db.get(b"name").unwrap(), None);
    assert_eq!(db.get(b"never-written").unwrap(), None);
}

// =============================================================================
// Test 2: Deleting a missing key is fine, empty keys and values work
// =============================================================================
#[test]
fn edge_case_keys_and_values() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();

    db.delete(b"ghost").unwrap();
    db.put(b"", b"empty key").unwrap();
    db.put(b"empty value", b"").unwrap();
    assert_eq!(db.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(db.get(b"empty value").unwrap(), Some(Vec::new()));
}

// =============================================================================
// Test 3: A batch applies atomically with consecutive sequences
// =============================================================================
#[test]
fn write_batch_applies_all_operations() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    db.put(b"stale", b"x").unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1");
    batch.put(b"b", b"2");
    batch.delete(b"stale");
    batch.put(b"a", b"3");
    assert_eq!(batch.count(), 4);
    db.write(batch).unwrap();

    assert_eq!(db.get(b"a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get(b"stale").unwrap(), None);
    assert_eq!(db.property("lsmkv.last-sequence").as_deref(), Some("5"));

    // An empty batch consumes no sequence.
    db.write(WriteBatch::new()).unwrap();
    assert_eq!(db.stats().last_sequence, 5);
}

// =============================================================================
// Test 4: multi_get reads every key at one sequence
// =============================================================================
#[test]
fn multi_get_returns_each_key() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    db.put(b"k1", b"v1").unwrap();
    db.put(b"k3", b"v3").unwrap();

    let values = db
        .multi_get(&ReadOptions::default(), &[b"k1".as_slice(), b"k2", b"k3"])
        .unwrap();
    assert_eq!(values, vec![Some(b"v1".to_vec()), None, Some(b"v3".to_vec())]);
}

// =============================================================================
// Test 5: Reads span the memtable and flushed tables
// =============================================================================
#[test]
fn reads_after_flush() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..200 {
        db.put(format!("key{i:03}").as_bytes(), format!("old{i}").as_bytes()).unwrap();
    }
    db.flush(&FlushOptions::default()).unwrap();
    for i in (0..200).step_by(2) {
        db.put(format!("key{i:03}").as_bytes(), format!("new{i}").as_bytes()).unwrap();
    }
    db.delete(b"key001").unwrap();

    let files: usize = db.stats().levels.iter().map(|l| l.files).sum();
    assert_eq!(files, 1);
    assert_eq!(db.get(b"key000").unwrap(), Some(b"new0".to_vec()));
    assert_eq!(db.get(b"key003").unwrap(), Some(b"old3".to_vec()));
    assert_eq!(db.get(b"key001").unwrap(), None);
}

// =============================================================================
// Test 6: Data survives close and reopen
// =============================================================================
#[test]
fn data_persists_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        db.put(b"flushed", b"1").unwrap();
        db.flush(&FlushOptions::default()).unwrap();
        db.put(b"logged", b"2").unwrap();
        db.put_opt(&WriteOptions { sync: true, ..WriteOptions::default() }, b"synced", b"3")
            .unwrap();
        db.close().unwrap();
    }
    let db = DB::open(dir.path(), test_options()).unwrap();
    assert_eq!(db.get(b"flushed").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"logged").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.get(b"synced").unwrap(), Some(b"3".to_vec()));
    assert_eq!(db.stats().last_sequence, 3);

    // New writes continue after the recovered sequence.
    db.put(b"after", b"4").unwrap();
    assert_eq!(db.stats().last_sequence, 4);
}

// =============================================================================
// Test 7: create_if_missing / error_if_exists
// =============================================================================
#[test]
fn open_flags_are_enforced() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let err = DB::open(&path, Options::default()).err().unwrap();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!path.exists());

    DB::open(&path, test_options()).unwrap().close().unwrap();

    let exclusive = Options {
        error_if_exists: true,
        ..test_options()
    };
    let err = DB::open(&path, exclusive).err().unwrap();
    assert!(matches!(err, Error::InvalidArgument(_)));

    DB::open(&path, Options::default()).unwrap();
}

// =============================================================================
// Test 8: Inconsistent options are rejected before touching disk
// =============================================================================
#[test]
fn invalid_options_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let bad = Options {
        level0_slowdown_writes_trigger: 20,
        level0_stop_writes_trigger: 10,
        ..test_options()
    };
    let err = DB::open(&path, bad).err().unwrap();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!path.exists());
}

// =============================================================================
// Test 9: Writes that skip the WAL are visible until restart
// =============================================================================
#[test]
fn disable_wal_writes_are_readable() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    let opts = WriteOptions {
        disable_wal: true,
        ..WriteOptions::default()
    };
    db.put_opt(&opts, b"volatile", b"v").unwrap();
    assert_eq!(db.get(b"volatile").unwrap(), Some(b"v".to_vec()));

    // A flush makes them durable.
    db.flush(&FlushOptions::default()).unwrap();
    db.close().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    assert_eq!(db.get(b"volatile").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Test 10: Many writers on one handle
// =============================================================================
#[test]
fn concurrent_writers() {
    let dir = tempdir().unwrap();
    let db = std::sync::Arc::new(
        DB::open(
            dir.path(),
            Options {
                write_buffer_size: 16 * 1024,
                ..test_options()
            },
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = std::sync::Arc::clone(&db);
            std::thread::spawn(move || {
                for i in 0..500 {
                    db.put(format!("t{t}-{i:04}").as_bytes(), format!("{t}:{i}").as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(db.stats().last_sequence, 2000);
    for t in 0..4 {
        for i in (0..500).step_by(37) {
            assert_eq!(
                db.get(format!("t{t}-{i:04}").as_bytes()).unwrap(),
                Some(format!("{t}:{i}").into_bytes())
            );
        }
    }
}

// =============================================================================
// Test 11: A synced batch is readable after reopen
// =============================================================================
#[test]
fn synced_batch_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"x", b"1");
        batch.put(b"y", b"2");
        batch.delete(b"x");
        db.write_opt(&WriteOptions { sync: true, ..WriteOptions::default() }, batch)
            .unwrap();
        db.close().unwrap();
    }

    let db = DB::open(dir.path(), test_options()).unwrap();
    assert_eq!(db.get(b"x").unwrap(), None);
    assert_eq!(db.get(b"y").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.property("lsmkv.last-sequence").as_deref(), Some("3"));
}

// =============================================================================
// Test 12: A batch whose WAL write fails never shows up, even after reopen
// =============================================================================
#[cfg(target_os = "linux")]
#[test]
fn failed_wal_write_is_never_applied() {
    let dir = tempdir().unwrap();
    let link;
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        db.put(b"before", b"1").unwrap();

        // The next segment writes to /dev/full, so every append fails.
        let (active, _) = list_wal_files(dir.path()).unwrap().pop().unwrap();
        link = wal_file_name(dir.path(), active + 1);
        std::os::unix::fs::symlink("/dev/full", &link).unwrap();
        db.flush(&FlushOptions::default()).unwrap();

        let err = db.put(b"lost", b"x").unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
        assert_eq!(db.get(b"lost").unwrap(), None);

        // The failed batch still used up its sequence number.
        db.put(b"after", b"2").unwrap();
        assert_eq!(db.stats().last_sequence, 3);
        assert_eq!(db.get(b"lost").unwrap(), None);
        db.close().unwrap();
    }
    let _ = std::fs::remove_file(&link);

    let db = DB::open(dir.path(), test_options()).unwrap();
    assert_eq!(db.get(b"before").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"lost").unwrap(), None);
    assert_eq!(db.get(b"after").unwrap(), Some(b"2".to_vec()));
    assert_eq!(db.stats().last_sequence, 3);
}
