// Snapshot tests
// Tests for point-in-time reads through memtables, flushes and compactions.

use lsmkv::{DB, FlushOptions, Options, ReadOptions, Snapshot};
use tempfile::tempdir;

fn test_options() -> Options {
    Options {
        create_if_missing: true,
        ..Options::default()
    }
}

fn read_at(db: &DB, snapshot: &Snapshot, key: &[u8]) -> Option<Vec<u8>> {
    let opts = ReadOptions {
        snapshot: Some(snapshot.clone()),
        ..ReadOptions::default()
    };
    db.get_opt(&opts, key).unwrap()
}

// =============================================================================
// Test 1: A snapshot keeps seeing the value a later delete removed
// =============================================================================
#[test]
fn snapshot_survives_delete() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();

    db.put(b"a", b"1").unwrap();
    db.put(b"a", b"2").unwrap();
    let snap = db.snapshot();
    assert_eq!(snap.sequence(), 2);
    db.delete(b"a").unwrap();

    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(read_at(&db, &snap, b"a"), Some(b"2".to_vec()));
}

// =============================================================================
// Test 2: Keys written after the snapshot are invisible to it
// =============================================================================
#[test]
fn later_writes_invisible() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    let empty = db.snapshot();
    db.put(b"k", b"v").unwrap();

    assert_eq!(read_at(&db, &empty, b"k"), None);
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Test 3: Snapshot reads hold across flush and full compaction
// =============================================================================
#[test]
fn snapshot_pins_versions_through_compaction() {
    let dir = tempdir().unwrap();
    let db = DB::open(
        dir.path(),
        Options {
            max_mem_compaction_level: 0,
            ..test_options()
        },
    )
    .unwrap();

    for i in 0..100 {
        db.put(format!("key{i:03}").as_bytes(), b"v1").unwrap();
    }
    let snap = db.snapshot();
    db.flush(&FlushOptions::default()).unwrap();
    for i in 0..100 {
        if i % 2 == 0 {
            db.delete(format!("key{i:03}").as_bytes()).unwrap();
        } else {
            db.put(format!("key{i:03}").as_bytes(), b"v2").unwrap();
        }
    }
    db.flush(&FlushOptions::default()).unwrap();
    db.compact_range(None, None).unwrap();

    for i in 0..100 {
        let key = format!("key{i:03}");
        assert_eq!(read_at(&db, &snap, key.as_bytes()), Some(b"v1".to_vec()), "{key}");
        let latest = if i % 2 == 0 { None } else { Some(b"v2".to_vec()) };
        assert_eq!(db.get(key.as_bytes()).unwrap(), latest, "{key}");
    }
}

// =============================================================================
// Test 4: Snapshot count follows clones and releases
// =============================================================================
#[test]
fn snapshots_are_counted_until_dropped() {
    let dir = tempdir().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    db.put(b"x", b"1").unwrap();

    let first = db.snapshot();
    let copy = first.clone();
    db.put(b"x", b"2").unwrap();
    let second = db.snapshot();
    assert_eq!(db.stats().snapshots, 2);
    assert_eq!(db.property("lsmkv.num-snapshots").as_deref(), Some("2"));

    drop(first);
    assert_eq!(db.stats().snapshots, 2, "a clone still pins the sequence");
    db.release_snapshot(copy);
    assert_eq!(db.stats().snapshots, 1);
    drop(second);
    assert_eq!(db.stats().snapshots, 0);
}

// =============================================================================
// Test 5: Without snapshots compaction drops shadowed versions
// =============================================================================
#[test]
fn compaction_drops_unpinned_versions() {
    let dir = tempdir().unwrap();
    let db = DB::open(
        dir.path(),
        Options {
            max_mem_compaction_level: 0,
            ..test_options()
        },
    )
    .unwrap();

    for round in 0..3 {
        for i in 0..200 {
            db.put(format!("key{i:03}").as_bytes(), format!("round{round}").as_bytes())
                .unwrap();
        }
        db.flush(&FlushOptions::default()).unwrap();
    }
    let before: u64 = db.stats().levels.iter().map(|l| l.bytes).sum();
    db.compact_range(None, None).unwrap();
    let after: u64 = db.stats().levels.iter().map(|l| l.bytes).sum();

    assert!(after < before, "compaction should shrink {before} -> {after}");
    assert_eq!(db.get(b"key000").unwrap(), Some(b"round2".to_vec()));
}
