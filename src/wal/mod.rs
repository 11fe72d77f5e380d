pub mod archive;
pub mod reader;
pub mod record;
pub mod writer;

pub use archive::WalArchive;
pub use reader::WALReader;
pub use record::WALRecord;
pub use writer::{WALManager, WALWriter};

/// When the active WAL segment is forced to stable storage.
///
/// Any policy can be overridden per commit with `WriteOptions::sync`.
/// Between syncs, committed batches live in the OS page cache and a
/// machine crash (not a process crash) can lose them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Sync after each record.
    EveryWrite,
    /// Sync once every N records.
    EveryNWrites(usize),
    /// fsync when at least N milliseconds passed since the last one.
    EveryNMillis(u64),
    /// Never fsync on its own.
    #[default]
    Manual,
}
