//! The engine: ties the WAL, memtables, versions and background jobs
//! together behind the `DB` handle.
//!
//! ## Shared state
//! ```text
//!   writer mutex ──► WAL segment, poisoned flag       (commit path only)
//!   state RwLock ──► Arc<DbState { mem, imms, version }>  (copy-on-write)
//!   versions mutex ► VersionSet (manifest, file numbers)
//! ```
//! Readers clone the `Arc<DbState>` and work without further locking.
//! Flushes and compactions build their output without any lock, then take
//! the versions mutex to log the edit and swap a new `DbState` in.
//!
//! Lock order: writer, then versions, then state. The state lock is only
//! ever held for the duration of a clone or a swap.

mod compact;
mod flush;
mod management;
mod open;
mod properties;
mod read;
mod repair;
mod write;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info};

use crate::batch::WriteBatch;
use crate::cache::TableCache;
use crate::cleaner::FileCleaner;
use crate::comparator::InternalKeyComparator;
use crate::compaction::{Job, JobQueue, Scheduler};
use crate::compaction::scheduler::JobRunner;
use crate::error::{Error, Result};
use crate::iterator::DBIterator;
use crate::memtable::MemTable;
use crate::options::{FlushOptions, Options, ReadOptions, WriteOptions};
use crate::snapshot::{SequenceManager, Snapshot};
use crate::version::{Version, VersionSet};
use crate::wal::WALManager;

pub use properties::{LevelStats, Stats};

/// How often background workers wake up without being asked.
const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound on one backpressure wait before the writer re-checks.
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(100);

/// What a reader needs: the active memtable, the frozen ones still waiting
/// for a flush (newest first) and the current table layout.
pub(crate) struct DbState {
    pub mem: Arc<MemTable>,
    pub imms: Vec<Arc<MemTable>>,
    pub version: Arc<Version>,
}

impl DbState {
    fn with_version(&self, version: Arc<Version>) -> Self {
        Self {
            mem: Arc::clone(&self.mem),
            imms: self.imms.clone(),
            version,
        }
    }
}

/// Commit-path state, guarded by the writer mutex.
pub(crate) struct WriteState {
    wal: WALManager,
    /// Set after a failed append; the next commit starts a new segment.
    wal_poisoned: bool,
}

pub(crate) struct DbInner {
    dir: PathBuf,
    options: Arc<Options>,
    icmp: InternalKeyComparator,
    state: RwLock<Arc<DbState>>,
    versions: Mutex<VersionSet>,
    writer: Mutex<WriteState>,
    /// Signalled whenever a flush or compaction installs a new version.
    bg_cv: Condvar,
    seq: SequenceManager,
    tables: Arc<TableCache>,
    cleaner: Arc<FileCleaner>,
    jobs: JobQueue,
    flush_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
    flush_scheduled: AtomicBool,
    compaction_scheduled: AtomicBool,
    shutting_down: AtomicBool,
    stats: Mutex<properties::EngineStats>,
}

impl DbInner {
    pub(crate) fn current_state(&self) -> Arc<DbState> {
        Arc::clone(&self.state.read())
    }

    /// Swaps in the version the version set just installed. Callers hold
    /// the versions mutex so installs are applied in manifest order.
    fn install_version(&self, version: Arc<Version>) {
        let mut state = self.state.write();
        *state = Arc::new(state.with_version(version));
    }

    fn maybe_schedule_flush(&self) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        if !self.flush_scheduled.swap(true, Ordering::AcqRel) && !self.jobs.schedule(Job::Flush) {
            self.flush_scheduled.store(false, Ordering::Release);
        }
    }

    pub(crate) fn maybe_schedule_compaction(&self) {
        if self.options.disable_auto_compactions || self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let version = self.current_state().version.clone();
        if version.compaction_score() < 1.0 && version.file_to_compact().is_none() {
            return;
        }
        if !self.compaction_scheduled.swap(true, Ordering::AcqRel) && !self.jobs.schedule(Job::Compaction) {
            self.compaction_scheduled.store(false, Ordering::Release);
        }
    }
}

/// Shutdown interrupts are expected; anything else goes back to the
/// scheduler, which logs it. The next trigger or tick retries.
fn interrupted_ok(job: Job, result: Result<()>) -> Result<()> {
    match result {
        Err(Error::ShutdownInProgress) => {
            debug!(?job, "background job interrupted by shutdown");
            Ok(())
        }
        other => other,
    }
}

impl JobRunner for DbInner {
    fn run_job(&self, job: Job) -> Result<()> {
        let result = match job {
            Job::Flush => {
                self.flush_scheduled.store(false, Ordering::Release);
                self.flush_memtables(false)
            }
            Job::Compaction => {
                self.compaction_scheduled.store(false, Ordering::Release);
                self.background_compaction().map(|_| ())
            }
        };
        interrupted_ok(job, result)?;
        self.maybe_schedule_compaction();
        Ok(())
    }

    fn tick(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Ok(());
        }
        let pending = self.current_state().imms.len();
        if pending >= self.options.min_write_buffer_number_to_merge {
            self.maybe_schedule_flush();
        }
        self.maybe_schedule_compaction();
        Ok(())
    }
}

/// An open database.
///
/// All methods take `&self`; the handle can be shared across threads
/// behind an `Arc`. Dropping it stops the background workers.
pub struct DB {
    inner: Arc<DbInner>,
    scheduler: Scheduler,
    closed: AtomicBool,
}

impl DB {
    /// Opens (or creates) the database at `path`, replaying any WAL
    /// segments the manifest has not yet absorbed.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<DB> {
        let scheduler = Scheduler::new();
        let inner = Arc::new(DbInner::open(path.as_ref(), options, scheduler.queue())?);
        let runner: Arc<dyn JobRunner> = inner.clone();
        scheduler.start(runner, inner.options.background_threads, TICK_INTERVAL)?;
        inner.maybe_schedule_compaction();
        Ok(DB {
            inner,
            scheduler,
            closed: AtomicBool::new(false),
        })
    }

    /// Stops background work and syncs the active WAL segment.
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.bg_cv.notify_all();
        self.scheduler.shutdown();
        let mut writer = self.inner.writer.lock();
        let synced = writer.wal.active_writer().sync();
        info!(dir = %self.inner.dir.display(), "closed database");
        synced
    }

    /// Deletes every file the engine owns under `path`.
    pub fn destroy(path: impl AsRef<Path>, options: &Options) -> Result<()> {
        management::destroy(path.as_ref(), options)
    }

    /// Rebuilds a manifest from whatever tables and WAL records survive.
    pub fn repair(path: impl AsRef<Path>, options: &Options) -> Result<()> {
        repair::repair(path.as_ref(), options)
    }

    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_opt(&WriteOptions::default(), key, value)
    }

    pub fn put_opt(&self, opts: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.inner.write(opts, batch)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_opt(&WriteOptions::default(), key)
    }

    pub fn delete_opt(&self, opts: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.inner.write(opts, batch)
    }

    /// Records a merge operand for `key`. Fails with `InvalidArgument`
    /// unless a merge operator is configured.
    pub fn merge(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.merge_opt(&WriteOptions::default(), key, value)
    }

    pub fn merge_opt(&self, opts: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge(key, value);
        self.inner.write(opts, batch)
    }

    /// Commits every operation of `batch` atomically.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.inner.write(&WriteOptions::default(), batch)
    }

    pub fn write_opt(&self, opts: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.inner.write(opts, batch)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(&ReadOptions::default(), key)
    }

    pub fn get_opt(&self, opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(opts, key)
    }

    /// Point reads of several keys, all at the same sequence.
    pub fn multi_get(&self, opts: &ReadOptions, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        self.inner.multi_get(opts, keys)
    }

    /// A cursor over user keys, unpositioned until a seek.
    pub fn iter(&self, opts: &ReadOptions) -> Result<DBIterator> {
        self.inner.iter(opts)
    }

    /// Pins the current sequence. Reads through the snapshot ignore every
    /// later write until it is released or dropped.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.seq.create_snapshot()
    }

    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// Flushes the active memtable to a table.
    pub fn flush(&self, opts: &FlushOptions) -> Result<()> {
        self.inner.flush(opts)
    }

    /// Compacts every level overlapping the user-key range `[begin, end]`
    /// (unbounded where `None`) down to the deepest level holding data.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.inner.compact_range(begin, end)
    }

    /// Named engine property, or `None` for unknown names.
    pub fn property(&self, name: &str) -> Option<String> {
        self.inner.property(name)
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats()
    }

    /// Approximate on-disk bytes for each user-key range `[start, limit)`.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        self.inner.approximate_sizes(ranges)
    }

    /// Parks obsolete tables and retired WAL segments instead of deleting
    /// them. Calls nest.
    pub fn disable_file_deletions(&self) {
        self.inner.cleaner.disable();
    }

    /// Undoes one `disable_file_deletions` (or all of them with `force`).
    /// Parked files are removed once the count reaches zero.
    pub fn enable_file_deletions(&self, force: bool) {
        self.inner.cleaner.enable(force);
    }

    /// Files a backup must copy, relative to the database directory, plus
    /// the number of manifest bytes that are valid.
    pub fn live_files(&self, flush_memtable: bool) -> Result<(Vec<String>, u64)> {
        self.inner.live_files(flush_memtable)
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "error while closing database");
        }
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB").field("dir", &self.inner.dir).finish()
    }
}
