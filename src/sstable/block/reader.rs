use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Buf;

use crate::coding::get_varint32;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;

/// A decoded, immutable block. See `BlockBuilder` for the layout.
pub struct Block {
    data: Vec<u8>,
    restarts_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Validate the restart trailer of raw block bytes.
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block too short for restart count"));
        }
        let num_restarts = (&data[data.len() - 4..]).get_u32_le() as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts == 0 || num_restarts > max_restarts {
            return Err(Error::corruption(format!(
                "bad restart count {num_restarts} for {} byte block",
                data.len()
            )));
        }
        let restarts_offset = data.len() - 4 - num_restarts * 4;
        let block = Block {
            data,
            restarts_offset,
            num_restarts,
        };
        for i in 0..num_restarts {
            if block.restart_point(i) > restarts_offset {
                return Err(Error::corruption("restart point past entry data"));
            }
        }
        Ok(block)
    }

    /// Encoded size in bytes; the block cache weighs entries by this.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, i: usize) -> usize {
        let at = self.restarts_offset + i * 4;
        (&self.data[at..at + 4]).get_u32_le() as usize
    }

    /// Bytewise iterator positioned at the first entry.
    pub fn iter(self: &Arc<Self>) -> BlockIterator {
        let mut iter = self.iter_with(Arc::new(BytewiseComparator));
        // A corrupt first entry leaves the iterator invalid.
        let _ = iter.seek_to_first();
        iter
    }

    /// Unpositioned iterator ordering keys with `cmp`.
    pub fn iter_with(self: &Arc<Self>, cmp: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator {
            block: Arc::clone(self),
            cmp,
            current: self.restarts_offset,
            next_offset: self.restarts_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value: (0, 0),
        }
    }
}

struct EntryHeader {
    shared: usize,
    non_shared: usize,
    value_len: usize,
    header_len: usize,
}

fn decode_entry(data: &[u8]) -> Result<EntryHeader> {
    let (shared, a) = get_varint32(data)?;
    let (non_shared, b) = get_varint32(&data[a..])?;
    let (value_len, c) = get_varint32(&data[a + b..])?;
    let header = EntryHeader {
        shared: shared as usize,
        non_shared: non_shared as usize,
        value_len: value_len as usize,
        header_len: a + b + c,
    };
    if header.header_len + header.non_shared + header.value_len > data.len() {
        return Err(Error::corruption("block entry overruns block"));
    }
    Ok(header)
}

/// Cursor over one block. Moves backwards by rescanning from the nearest
/// restart point, since prefix-compressed entries only decode forwards.
pub struct BlockIterator {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    /// Offset of the current entry; `restarts_offset` when invalid.
    current: usize,
    next_offset: usize,
    restart_index: usize,
    key: Vec<u8>,
    value: (usize, usize),
}

impl BlockIterator {
    fn invalidate(&mut self) {
        self.current = self.block.restarts_offset;
        self.next_offset = self.block.restarts_offset;
        self.restart_index = self.block.num_restarts;
        self.key.clear();
        self.value = (0, 0);
    }

    fn seek_to_restart(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        self.next_offset = self.block.restart_point(index);
    }

    /// Decodes the entry at `next_offset`. Ok(false) at the end of the block.
    fn parse_next(&mut self) -> Result<bool> {
        self.current = self.next_offset;
        let limit = self.block.restarts_offset;
        if self.current >= limit {
            self.invalidate();
            return Ok(false);
        }

        let data = &self.block.data[self.current..limit];
        let header = match decode_entry(data) {
            Ok(h) if h.shared <= self.key.len() => h,
            Ok(_) => {
                self.invalidate();
                return Err(Error::corruption("block entry shares more than the previous key"));
            }
            Err(e) => {
                self.invalidate();
                return Err(e);
            }
        };

        let key_start = header.header_len;
        let value_start = key_start + header.non_shared;
        self.key.truncate(header.shared);
        self.key.extend_from_slice(&data[key_start..value_start]);
        self.value = (
            self.current + value_start,
            self.current + value_start + header.value_len,
        );
        self.next_offset = self.value.1;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        Ok(true)
    }

    fn key_at_restart(&self, index: usize) -> Result<&[u8]> {
        let offset = self.block.restart_point(index);
        let data = &self.block.data[offset..self.block.restarts_offset];
        let header = decode_entry(data)?;
        if header.shared != 0 {
            return Err(Error::corruption("restart entry has a shared prefix"));
        }
        Ok(&data[header.header_len..header.header_len + header.non_shared])
    }

    fn compare_at_restart(&self, index: usize, target: &[u8]) -> Result<Ordering> {
        Ok(self.cmp.compare(self.key_at_restart(index)?, target))
    }
}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.block.data[self.value.0..self.value.1]
    }

    fn is_valid(&self) -> bool {
        self.current < self.block.restarts_offset
    }

    fn next(&mut self) -> Result<()> {
        if self.is_valid() {
            self.parse_next()?;
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.invalidate();
                return Ok(());
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart(self.restart_index);
        while self.parse_next()? && self.next_offset < original {}
        Ok(())
    }

    /// Binary search over restart points, then a linear scan.
    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let mut left = 0;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            let ordering = match self.compare_at_restart(mid, target) {
                Ok(ordering) => ordering,
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };
            if ordering == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart(left);
        while self.parse_next()? {
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return Ok(());
            }
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to_restart(0);
        self.parse_next()?;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.seek_to_restart(self.block.num_restarts - 1);
        while self.parse_next()? && self.next_offset < self.block.restarts_offset {}
        Ok(())
    }
}
