use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::BlockIterator;
use crate::sstable::footer::BlockHandle;
use crate::sstable::reader::SSTable;

/// Two-level cursor over a table: the index block picks a data block, the
/// data block iterator walks entries. Empty or exhausted data blocks are
/// skipped in the direction of travel.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    index: BlockIterator,
    data: Option<BlockIterator>,
    fill_cache: bool,
}

impl SSTableIterator {
    pub fn new(table: Arc<SSTable>, fill_cache: bool) -> Self {
        let cmp = Arc::new(table.internal_comparator().clone());
        let index = table.index_block().iter_with(cmp);
        SSTableIterator {
            table,
            index,
            data: None,
            fill_cache,
        }
    }

    /// Opens the data block the index iterator points at.
    fn load_data_block(&mut self) -> Result<()> {
        if !self.index.is_valid() {
            self.data = None;
            return Ok(());
        }
        let handle = BlockHandle::decode(self.index.value())?;
        let block = self.table.read_block(handle, self.fill_cache)?;
        let cmp = Arc::new(self.table.internal_comparator().clone());
        self.data = Some(block.iter_with(cmp));
        Ok(())
    }

    fn skip_empty_forward(&mut self) -> Result<()> {
        while self.data.as_ref().is_none_or(|d| !d.is_valid()) {
            if !self.index.is_valid() {
                self.data = None;
                return Ok(());
            }
            self.index.next()?;
            self.load_data_block()?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_empty_backward(&mut self) -> Result<()> {
        while self.data.as_ref().is_none_or(|d| !d.is_valid()) {
            if !self.index.is_valid() {
                self.data = None;
                return Ok(());
            }
            self.index.prev()?;
            self.load_data_block()?;
            if let Some(data) = self.data.as_mut() {
                data.seek_to_last()?;
            }
        }
        Ok(())
    }

    pub fn table(&self) -> &Arc<SSTable> {
        &self.table
    }
}

impl StorageIterator for SSTableIterator {
    fn key(&self) -> &[u8] {
        self.data.as_ref().map_or(&[][..], |d| d.key())
    }

    fn value(&self) -> &[u8] {
        self.data.as_ref().map_or(&[][..], |d| d.value())
    }

    fn is_valid(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.next()?;
        }
        self.skip_empty_forward()
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(data) = self.data.as_mut() {
            data.prev()?;
        }
        self.skip_empty_backward()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.index.seek(key)?;
        self.load_data_block()?;
        if let Some(data) = self.data.as_mut() {
            data.seek(key)?;
        }
        self.skip_empty_forward()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index.seek_to_first()?;
        self.load_data_block()?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_first()?;
        }
        self.skip_empty_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index.seek_to_last()?;
        self.load_data_block()?;
        if let Some(data) = self.data.as_mut() {
            data.seek_to_last()?;
        }
        self.skip_empty_backward()
    }
}
