//! Open and crash recovery.
//!
//! 1. Validate options and the directory against `create_if_missing` /
//!    `error_if_exists`.
//! 2. Rebuild the version set from the manifest named by CURRENT.
//! 3. Replay every WAL segment at or after the recorded log number into
//!    level-0 tables.
//! 4. Start a new WAL segment, write a fresh manifest recording the
//!    recovered tables, then retire the replayed segments. A segment whose
//!    replay stopped at corruption goes to `<db>/lost/` instead.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{info, warn};

use crate::batch::WriteBatch;
use crate::cache::{TableCache, new_block_cache};
use crate::cleaner::FileCleaner;
use crate::comparator::InternalKeyComparator;
use crate::compaction::JobQueue;
use crate::db::flush::{build_table, memtables_iter};
use crate::db::management::{move_to_lost, remove_obsolete_files};
use crate::db::properties::EngineStats;
use crate::db::{DbInner, DbState, WriteState};
use crate::error::{Error, Result};
use crate::filename::{current_file_name, list_wal_files};
use crate::memtable::MemTable;
use crate::options::Options;
use crate::snapshot::SequenceManager;
use crate::sstable::TableReadOptions;
use crate::types::SequenceNumber;
use crate::version::{VersionEdit, VersionSet};
use crate::wal::{WALManager, WALReader, WalArchive};

impl DbInner {
    pub(crate) fn open(dir: &Path, options: Options, jobs: JobQueue) -> Result<Self> {
        options.validate()?;
        let exists = prepare_dir(dir, &options)?;
        let options = Arc::new(options);

        let block_cache = (options.block_cache_capacity > 0).then(|| new_block_cache(options.block_cache_capacity));
        let read_options = TableReadOptions {
            comparator: Arc::clone(&options.comparator),
            filter_policy: options.filter_policy.clone(),
            block_cache,
        };
        let tables = Arc::new(TableCache::new(dir, read_options, options.max_open_files));
        let archive = WalArchive::new(dir, options.wal_ttl_seconds, options.wal_size_limit_mb);
        let cleaner = Arc::new(FileCleaner::new(dir, Arc::clone(&tables), archive));

        let mut versions = VersionSet::new(dir, Arc::clone(&options), Some(Arc::clone(&cleaner)));
        if exists {
            versions.recover()?;
        }

        let log_number = versions.log_number();
        let wals: Vec<_> = list_wal_files(dir)?
            .into_iter()
            .filter(|(id, _)| *id >= log_number)
            .collect();
        let mut edit = VersionEdit::new();
        let mut last_sequence = versions.last_sequence();
        let mut cut_short = Vec::new();
        for (_, path) in &wals {
            let replay = recover_wal(dir, path, &options, &tables, &mut versions, &mut edit)?;
            last_sequence = last_sequence.max(replay.max_sequence);
            if !replay.complete {
                cut_short.push(path);
            }
        }

        let next_wal = wals.last().map_or(log_number, |(id, _)| id + 1).max(1);
        let wal = WALManager::open(dir, options.wal_sync_policy, next_wal, options.use_fsync)?;
        let active_id = wal.active_id();

        versions.set_last_sequence(last_sequence);
        edit.log_number = Some(active_id);
        edit.last_sequence = Some(last_sequence);
        versions.write_new_manifest()?;
        versions.log_and_apply(&mut edit)?;
        // What follows the corruption may still be salvageable by hand.
        for path in cut_short {
            warn!(wal = %path.display(), "moving partially replayed WAL segment to lost/");
            move_to_lost(dir, path)?;
        }
        remove_obsolete_files(dir, &versions, &cleaner, active_id)?;

        let version = versions.current();
        info!(
            dir = %dir.display(),
            created = !exists,
            replayed_wals = wals.len(),
            last_sequence,
            wal = active_id,
            levels = %version.level_summary(),
            "opened database"
        );

        let mem = Arc::new(MemTable::new(
            active_id,
            options.write_buffer_size,
            Arc::clone(&options.comparator),
        ));
        let state = DbState {
            mem,
            imms: Vec::new(),
            version,
        };
        Ok(DbInner {
            dir: dir.to_path_buf(),
            icmp: InternalKeyComparator::new(Arc::clone(&options.comparator)),
            state: RwLock::new(Arc::new(state)),
            versions: Mutex::new(versions),
            writer: Mutex::new(WriteState {
                wal,
                wal_poisoned: false,
            }),
            bg_cv: Condvar::new(),
            seq: SequenceManager::new(last_sequence),
            tables,
            cleaner,
            jobs,
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            flush_scheduled: AtomicBool::new(false),
            compaction_scheduled: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            stats: Mutex::new(EngineStats::new(options.num_levels)),
            options,
        })
    }
}

/// Applies `create_if_missing` / `error_if_exists`. Returns whether a
/// database already lives at `dir`.
fn prepare_dir(dir: &Path, options: &Options) -> Result<bool> {
    let exists = current_file_name(dir).exists();
    if exists && options.error_if_exists {
        return Err(Error::invalid_argument(format!("{}: database exists", dir.display())));
    }
    if !exists {
        if !options.create_if_missing {
            return Err(Error::invalid_argument(format!(
                "{}: database does not exist (create_if_missing is false)",
                dir.display()
            )));
        }
        fs::create_dir_all(dir)?;
    }
    Ok(exists)
}

/// What replaying one WAL segment recovered.
pub(crate) struct WalReplay {
    pub max_sequence: SequenceNumber,
    /// False when corruption ended replay before the end of the segment.
    pub complete: bool,
}

/// Replays one WAL segment into level-0 tables recorded in `edit`.
/// Mid-log corruption fails with `Corruption` when `paranoid_checks` is
/// set, and otherwise ends the segment with a warning.
pub(crate) fn recover_wal(
    dir: &Path,
    path: &Path,
    options: &Options,
    tables: &TableCache,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
) -> Result<WalReplay> {
    let reader = WALReader::new(path)?;
    let mut mem = new_memtable(options);
    let mut max_sequence = 0;
    let mut records = 0u64;
    let mut complete = true;

    for record in reader.iter() {
        let batch = match record.and_then(|r| WriteBatch::from_data(r.payload)) {
            Ok(batch) => batch,
            Err(e) if e.is_corruption() && !options.paranoid_checks => {
                warn!(wal = %path.display(), records, error = %e, "stopping WAL replay at corruption");
                complete = false;
                break;
            }
            Err(e) => return Err(e),
        };
        if batch.is_empty() {
            continue;
        }
        batch.insert_into(&mem)?;
        max_sequence = max_sequence.max(batch.sequence() + u64::from(batch.count()) - 1);
        records += 1;
        if mem.is_full() {
            flush_recovered(dir, &mem, options, tables, versions, edit)?;
            mem = new_memtable(options);
        }
    }
    flush_recovered(dir, &mem, options, tables, versions, edit)?;
    info!(wal = %path.display(), records, max_sequence, complete, "replayed WAL segment");
    Ok(WalReplay { max_sequence, complete })
}

fn new_memtable(options: &Options) -> Arc<MemTable> {
    Arc::new(MemTable::new(0, options.write_buffer_size, Arc::clone(&options.comparator)))
}

fn flush_recovered(
    dir: &Path,
    mem: &Arc<MemTable>,
    options: &Options,
    tables: &TableCache,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
) -> Result<()> {
    if mem.is_empty() {
        return Ok(());
    }
    let number = versions.new_file_number();
    let mut iter = memtables_iter(std::slice::from_ref(mem), options);
    if let Some(meta) = build_table(dir, number, &mut iter, options, tables)? {
        edit.add_file(0, meta);
    }
    Ok(())
}
