pub mod skiplist;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::lookup::LookupState;
use crate::types::{SequenceNumber, ValueType, encode_internal_key, parse_internal_key};
use skiplist::SkipList;

/// In-memory sorted buffer for writes. Wraps a SkipList keyed by internal keys.
///
/// Every write goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// Deletes are stored as tombstone entries, not removals: older versions of
/// the key may still live in SSTables on disk.
///
/// A memtable's id is the id of the WAL segment that logs its writes; the
/// segment can be retired once this memtable is flushed.
pub struct MemTable {
    id: u64,
    data: RwLock<SkipList>,
    size_limit: usize,
    cmp: InternalKeyComparator,
    frozen: AtomicBool,
    largest_sequence: AtomicU64,
}

impl MemTable {
    /// Create a new empty memtable with given size limit.
    pub fn new(id: u64, size_limit: usize, user_cmp: Arc<dyn Comparator>) -> Self {
        let cmp = InternalKeyComparator::new(user_cmp);
        MemTable {
            id,
            data: RwLock::new(SkipList::with_comparator(Arc::new(cmp.clone()))),
            size_limit,
            cmp,
            frozen: AtomicBool::new(false),
            largest_sequence: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Add one internal entry. Writers are serialized above this call.
    pub fn insert(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        debug_assert!(!self.is_frozen(), "insert into frozen memtable {}", self.id);
        let ikey = encode_internal_key(key, sequence, value_type);
        self.data.write().insert(ikey, value.to_vec());
        self.largest_sequence.fetch_max(sequence, Ordering::AcqRel);
    }

    /// Feeds every version of the state's user key visible at its sequence
    /// to the state, newest first. Returns true once the lookup is resolved.
    pub fn get(&self, state: &mut LookupState) -> Result<bool> {
        let data = self.data.read();
        let mut node = data.seek(state.lookup_key());
        while let Some(idx) = node {
            let (ikey, value) = data.entry(idx);
            let parsed = parse_internal_key(ikey)?;
            if self.cmp.compare_user(parsed.user_key, state.user_key()) != std::cmp::Ordering::Equal {
                break;
            }
            if state.add(parsed.value_type, value) {
                return Ok(true);
            }
            node = data.next_of(idx);
        }
        Ok(false)
    }

    /// Return a sorted iterator over all internal entries (including tombstones).
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        let mut iter = MemTableIterator {
            table: Arc::clone(self),
            node: None,
            key: Vec::new(),
            value: Vec::new(),
        };
        let first = self.data.read().first();
        iter.load(first);
        iter
    }

    /// Marks the memtable immutable. New writes must go to a fresh table.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Current memory usage in bytes.
    pub fn size(&self) -> usize {
        self.data.read().size_bytes()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if memtable has reached the flush threshold.
    pub fn is_full(&self) -> bool {
        self.size() >= self.size_limit
    }

    pub fn largest_sequence(&self) -> SequenceNumber {
        self.largest_sequence.load(Ordering::Acquire)
    }
}

/// Owning cursor over a memtable.
///
/// Holds the table alive through an `Arc` and copies the current entry out
/// of the read lock on every step, so writers are only blocked for the
/// duration of a single move.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    node: Option<usize>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn load(&mut self, node: Option<usize>) {
        self.node = node;
        self.key.clear();
        self.value.clear();
        if let Some(idx) = node {
            let data = self.table.data.read();
            let (k, v) = data.entry(idx);
            self.key.extend_from_slice(k);
            self.value.extend_from_slice(v);
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }

    fn is_valid(&self) -> bool {
        self.node.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(idx) = self.node {
            let next = self.table.data.read().next_of(idx);
            self.load(next);
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(idx) = self.node {
            let prev = self.table.data.read().prev_of(idx);
            self.load(prev);
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let node = self.table.data.read().seek(key);
        self.load(node);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let node = self.table.data.read().first();
        self.load(node);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let node = self.table.data.read().last();
        self.load(node);
        Ok(())
    }
}
