pub mod db_iter;
pub mod level;
pub mod merge;

use crate::error::Result;

pub use db_iter::DBIterator;
pub use level::LevelIterator;
pub use merge::MergingIterator;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (skip list, memtable, block, SSTable, level,
/// merged view) implements this trait. This enables composability:
/// MergingIterator takes `Vec<Box<dyn StorageIterator>>` and merges them.
///
/// Below the DB iterator, keys are encoded internal keys.
pub trait StorageIterator: Send {
    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Steps back to the previous entry; becomes invalid before the first.
    fn prev(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    fn seek_to_first(&mut self) -> Result<()>;

    fn seek_to_last(&mut self) -> Result<()>;
}

impl<I: StorageIterator + ?Sized> StorageIterator for Box<I> {
    fn key(&self) -> &[u8] {
        (**self).key()
    }

    fn value(&self) -> &[u8] {
        (**self).value()
    }

    fn is_valid(&self) -> bool {
        (**self).is_valid()
    }

    fn next(&mut self) -> Result<()> {
        (**self).next()
    }

    fn prev(&mut self) -> Result<()> {
        (**self).prev()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        (**self).seek(key)
    }

    fn seek_to_first(&mut self) -> Result<()> {
        (**self).seek_to_first()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        (**self).seek_to_last()
    }
}
