use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::TableCache;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::SSTableIterator;
use crate::version::TableFile;

/// Concatenates the tables of one sorted level (L ≥ 1). Files are disjoint
/// and ordered, so only one table is open at a time; it is opened lazily
/// through the table cache when the cursor enters it.
pub struct LevelIterator {
    files: Vec<Arc<TableFile>>,
    tables: Arc<TableCache>,
    icmp: InternalKeyComparator,
    fill_cache: bool,
    index: usize,
    current: Option<SSTableIterator>,
}

impl LevelIterator {
    pub fn new(
        files: Vec<Arc<TableFile>>,
        tables: Arc<TableCache>,
        icmp: InternalKeyComparator,
        fill_cache: bool,
    ) -> Self {
        Self {
            index: files.len(),
            files,
            tables,
            icmp,
            fill_cache,
            current: None,
        }
    }

    fn open(&mut self, index: usize) -> Result<()> {
        self.index = index;
        if index >= self.files.len() {
            self.current = None;
            return Ok(());
        }
        let table = self.tables.find_table(self.files[index].number())?;
        self.current = Some(table.iter(self.fill_cache));
        Ok(())
    }

    fn skip_forward(&mut self) -> Result<()> {
        while self.current.as_ref().is_some_and(|t| !t.is_valid()) {
            self.open(self.index + 1)?;
            if let Some(t) = self.current.as_mut() {
                t.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_backward(&mut self) -> Result<()> {
        while self.current.as_ref().is_some_and(|t| !t.is_valid()) {
            if self.index == 0 {
                self.current = None;
                return Ok(());
            }
            self.open(self.index - 1)?;
            if let Some(t) = self.current.as_mut() {
                t.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for LevelIterator {
    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |t| t.key())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |t| t.value())
    }

    fn is_valid(&self) -> bool {
        self.current.as_ref().is_some_and(|t| t.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(t) = self.current.as_mut() {
            t.next()?;
        }
        self.skip_forward()
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(t) = self.current.as_mut() {
            t.prev()?;
        }
        self.skip_backward()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        // First file whose largest key is >= key.
        let index = self
            .files
            .partition_point(|f| self.icmp.compare(f.largest(), key) == Ordering::Less);
        self.open(index)?;
        if let Some(t) = self.current.as_mut() {
            t.seek(key)?;
        }
        self.skip_forward()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.open(0)?;
        if let Some(t) = self.current.as_mut() {
            t.seek_to_first()?;
        }
        self.skip_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.files.is_empty() {
            self.current = None;
            return Ok(());
        }
        self.open(self.files.len() - 1)?;
        if let Some(t) = self.current.as_mut() {
            t.seek_to_last()?;
        }
        self.skip_backward()
    }
}
