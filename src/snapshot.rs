//! Sequence numbers and the snapshots that pin them.
//!
//! Writers take the next sequence under the commit lock and publish the
//! batch's last sequence once it is applied to the memtable. Readers without
//! a snapshot read at the published value. A snapshot pins a sequence until
//! its last clone is dropped; compaction never discards a version still
//! visible at the oldest pinned sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::SequenceNumber;

/// Registry of pinned sequence numbers, with a count per sequence.
#[derive(Default)]
pub struct SnapshotList {
    pinned: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    fn release(&self, sequence: SequenceNumber) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&sequence);
            }
        }
    }

    /// Oldest pinned sequence, if any snapshot is open.
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.pinned.lock().keys().next().copied()
    }

    /// Number of open snapshots.
    pub fn len(&self) -> usize {
        self.pinned.lock().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.lock().is_empty()
    }
}

struct SnapshotInner {
    sequence: SequenceNumber,
    list: Arc<SnapshotList>,
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

/// A consistent read view. Cloning shares the pin; the sequence is released
/// when the last clone is dropped.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("sequence", &self.inner.sequence).finish()
    }
}

/// Single linear sequence counter plus the snapshot registry.
pub struct SequenceManager {
    last_sequence: AtomicU64,
    snapshots: Arc<SnapshotList>,
}

impl SequenceManager {
    pub fn new(last_sequence: SequenceNumber) -> Self {
        Self {
            last_sequence: AtomicU64::new(last_sequence),
            snapshots: Arc::new(SnapshotList::default()),
        }
    }

    /// Highest sequence whose batch is fully applied and visible.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// First sequence for the next batch. Only meaningful under the commit lock.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.last_sequence() + 1
    }

    /// Makes every sequence up to `sequence` visible to new readers.
    pub fn set_last_sequence(&self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence());
        self.last_sequence.store(sequence, Ordering::Release);
    }

    pub fn create_snapshot(&self) -> Snapshot {
        // Read and pin under the registry lock so a concurrent
        // smallest_snapshot() never misses this pin.
        let sequence = {
            let mut pinned = self.snapshots.pinned.lock();
            let sequence = self.last_sequence();
            *pinned.entry(sequence).or_insert(0) += 1;
            sequence
        };
        Snapshot {
            inner: Arc::new(SnapshotInner {
                sequence,
                list: Arc::clone(&self.snapshots),
            }),
        }
    }

    /// Garbage-collection floor: the oldest pinned sequence, or the latest
    /// sequence when nothing is pinned.
    pub fn smallest_snapshot(&self) -> SequenceNumber {
        let pinned = self.snapshots.pinned.lock();
        pinned.keys().next().copied().unwrap_or_else(|| self.last_sequence())
    }

    pub fn num_snapshots(&self) -> usize {
        self.snapshots.len()
    }
}
