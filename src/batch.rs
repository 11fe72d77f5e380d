//! Atomic, ordered groups of writes.
//!
//! ```text
//! ┌──────────────┬─────────────┬─────────────────────────────┐
//! │ sequence u64 │ count u32   │ records...                  │
//! └──────────────┴─────────────┴─────────────────────────────┘
//! record := type u8 | varint klen | key [| varint vlen | value]
//! ```
//!
//! The encoded batch is exactly what goes into a WAL record, so replay
//! decodes the same bytes the commit applied.

use bytes::{Buf, BufMut};

use crate::coding::{get_length_prefixed_slice, put_length_prefixed_slice};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValueType};

const HEADER_SIZE: usize = 12;

/// Receives the operations of a batch in order.
pub trait BatchHandler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    fn merge(&mut self, key: &[u8], value: &[u8]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch {
            rep: vec![0; HEADER_SIZE],
        }
    }

    /// Wraps bytes produced by `data`, checking that every record parses.
    pub fn from_data(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption("write batch too small"));
        }
        let batch = WriteBatch { rep: data };
        let mut counter = CountingHandler::default();
        batch.iterate(&mut counter)?;
        Ok(batch)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.push(ValueType::Put, key, Some(value));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.push(ValueType::Delete, key, None);
    }

    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.push(ValueType::Merge, key, Some(value));
    }

    fn push(&mut self, value_type: ValueType, key: &[u8], value: Option<&[u8]>) {
        self.set_count(self.count() + 1);
        self.rep.push(value_type as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        if let Some(value) = value {
            put_length_prefixed_slice(&mut self.rep, value);
        }
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(HEADER_SIZE, 0);
    }

    /// Number of operations in the batch.
    pub fn count(&self) -> u32 {
        (&self.rep[8..HEADER_SIZE]).get_u32_le()
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Sequence of the first operation; zero until committed.
    pub fn sequence(&self) -> SequenceNumber {
        (&self.rep[..8]).get_u64_le()
    }

    pub(crate) fn set_sequence(&mut self, seq: SequenceNumber) {
        let mut header = &mut self.rep[..8];
        header.put_u64_le(seq);
    }

    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    pub fn has_merge(&self) -> bool {
        let mut finder = MergeFinder(false);
        // Batches built through the API always parse.
        self.iterate(&mut finder).is_ok() && finder.0
    }

    /// Replays the operations, in order, into `handler`.
    pub fn iterate(&self, handler: &mut dyn BatchHandler) -> Result<()> {
        let mut input = &self.rep[HEADER_SIZE..];
        let mut found = 0u32;
        while !input.is_empty() {
            let value_type = ValueType::from_u8(input[0])?;
            input = &input[1..];
            let (key, n) = get_length_prefixed_slice(input)?;
            input = &input[n..];
            match value_type {
                ValueType::Delete => handler.delete(key),
                ValueType::Put | ValueType::Merge => {
                    let (value, n) = get_length_prefixed_slice(input)?;
                    input = &input[n..];
                    if value_type == ValueType::Put {
                        handler.put(key, value);
                    } else {
                        handler.merge(key, value);
                    }
                }
            }
            found += 1;
        }
        if found != self.count() {
            return Err(Error::corruption(format!(
                "write batch has {found} records, header says {}",
                self.count()
            )));
        }
        Ok(())
    }

    /// Applies the batch to a memtable, numbering operations from `sequence()`.
    pub(crate) fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut inserter = MemTableInserter {
            sequence: self.sequence(),
            mem,
        };
        self.iterate(&mut inserter)
    }

    /// Appends every operation of `other` to this batch.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[HEADER_SIZE..]);
    }
}

struct MemTableInserter<'a> {
    sequence: SequenceNumber,
    mem: &'a MemTable,
}

impl BatchHandler for MemTableInserter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.insert(self.sequence, ValueType::Put, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.insert(self.sequence, ValueType::Delete, key, &[]);
        self.sequence += 1;
    }

    fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.mem.insert(self.sequence, ValueType::Merge, key, value);
        self.sequence += 1;
    }
}

#[derive(Default)]
struct CountingHandler(u32);

impl BatchHandler for CountingHandler {
    fn put(&mut self, _: &[u8], _: &[u8]) {
        self.0 += 1;
    }
    fn delete(&mut self, _: &[u8]) {
        self.0 += 1;
    }
    fn merge(&mut self, _: &[u8], _: &[u8]) {
        self.0 += 1;
    }
}

struct MergeFinder(bool);

impl BatchHandler for MergeFinder {
    fn put(&mut self, _: &[u8], _: &[u8]) {}
    fn delete(&mut self, _: &[u8]) {}
    fn merge(&mut self, _: &[u8], _: &[u8]) {
        self.0 = true;
    }
}
