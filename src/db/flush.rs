//! Memtable flush: immutable memtables → one sorted table.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::cache::TableCache;
use crate::comparator::InternalKeyComparator;
use crate::db::{DbInner, DbState};
use crate::error::Result;
use crate::filename::{table_file_name, wal_file_name};
use crate::iterator::{MergingIterator, StorageIterator};
use crate::memtable::MemTable;
use crate::options::{FlushOptions, Options};
use crate::sstable::SSTableBuilder;
use crate::types::extract_user_key;
use crate::version::{FileMetaData, VersionEdit};

/// Writes everything `iter` yields to table `number`. Returns `None` (and
/// leaves no file behind) when the iterator is empty.
pub(crate) fn build_table(
    dir: &Path,
    number: u64,
    iter: &mut dyn StorageIterator,
    options: &Options,
    tables: &TableCache,
) -> Result<Option<FileMetaData>> {
    iter.seek_to_first()?;
    if !iter.is_valid() {
        return Ok(None);
    }
    let path = table_file_name(dir, number);
    let mut builder = SSTableBuilder::new(&path, options.table_options(0))?;
    if let Err(e) = copy_entries(iter, &mut builder) {
        let _ = builder.abandon();
        return Err(e);
    }
    let built = builder.finish()?;
    if let Err(e) = tables.find_table(number) {
        warn!(table = number, error = %e, "flushed table unreadable");
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }
    Ok(Some(FileMetaData {
        number,
        file_size: built.file_size,
        smallest: built.smallest,
        largest: built.largest,
        largest_seq: built.largest_seq,
    }))
}

fn copy_entries(iter: &mut dyn StorageIterator, builder: &mut SSTableBuilder) -> Result<()> {
    while iter.is_valid() {
        builder.add(iter.key(), iter.value())?;
        iter.next()?;
    }
    Ok(())
}

/// Merged view of several memtables, newest first.
pub(crate) fn memtables_iter(mems: &[Arc<MemTable>], options: &Options) -> MergingIterator {
    let children: Vec<Box<dyn StorageIterator>> = mems
        .iter()
        .map(|m| Box::new(m.iter()) as Box<dyn StorageIterator>)
        .collect();
    let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
    MergingIterator::new(children, Arc::new(icmp))
}

impl DbInner {
    /// Explicit flush: freezes a non-empty active memtable, then either
    /// flushes everything queued or leaves it to the background.
    pub(crate) fn flush(&self, opts: &FlushOptions) -> Result<()> {
        {
            let mut writer = self.writer.lock();
            if !self.current_state().mem.is_empty() {
                self.make_room_for_write(&mut writer, true)?;
            }
        }
        if opts.wait {
            self.flush_memtables(true)
        } else {
            self.maybe_schedule_flush();
            Ok(())
        }
    }

    /// Writes every queued immutable memtable into one table and installs
    /// it. Without `force`, waits until enough memtables have queued up.
    pub(crate) fn flush_memtables(&self, force: bool) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        let state = self.current_state();
        if state.imms.is_empty() {
            return Ok(());
        }
        if !force && state.imms.len() < self.options.min_write_buffer_number_to_merge {
            return Ok(());
        }
        let start = Instant::now();
        let flushing: Vec<Arc<MemTable>> = state.imms.clone();
        drop(state);

        let number = self.versions.lock().new_file_number();
        let mut iter = memtables_iter(&flushing, &self.options);
        let meta = build_table(&self.dir, number, &mut iter, &self.options, &self.tables)?;

        // Placing the table below level 0 must not race a compaction
        // writing to the same levels.
        let compacting = self.compaction_lock.try_lock();
        let mut edit = VersionEdit::new();
        let mut versions = self.versions.lock();
        let mut level = 0;
        if let Some(meta) = &meta {
            if compacting.is_some() {
                level = versions.current().pick_level_for_memtable_output(
                    extract_user_key(&meta.smallest),
                    extract_user_key(&meta.largest),
                    &self.options,
                );
            }
            edit.add_file(level, meta.clone());
        }
        let remaining_log = {
            let state = self.state.read();
            state
                .imms
                .iter()
                .filter(|m| !flushing.iter().any(|f| Arc::ptr_eq(f, m)))
                .map(|m| m.id())
                .fold(state.mem.id(), u64::min)
        };
        edit.log_number = Some(remaining_log);
        edit.last_sequence = Some(self.seq.last_sequence());
        if let Err(e) = versions.log_and_apply(&mut edit) {
            if let Some(meta) = &meta {
                let _ = std::fs::remove_file(table_file_name(&self.dir, meta.number));
            }
            return Err(e);
        }
        {
            let mut guard = self.state.write();
            let imms = guard
                .imms
                .iter()
                .filter(|m| !flushing.iter().any(|f| Arc::ptr_eq(f, m)))
                .cloned()
                .collect();
            *guard = Arc::new(DbState {
                mem: Arc::clone(&guard.mem),
                imms,
                version: versions.current(),
            });
        }
        drop(versions);
        drop(compacting);

        for mem in &flushing {
            self.cleaner.retire_wal(wal_file_name(&self.dir, mem.id()));
        }
        let bytes = meta.as_ref().map_or(0, |m| m.file_size);
        {
            let mut stats = self.stats.lock();
            stats.flushes += 1;
            stats.record(level, 0, bytes, start.elapsed());
        }
        info!(
            table = meta.as_ref().map(|m| m.number),
            level,
            memtables = flushing.len(),
            bytes,
            log_number = remaining_log,
            "flushed memtables"
        );
        self.bg_cv.notify_all();
        self.maybe_schedule_compaction();
        Ok(())
    }
}
