//! Commit path: sequence assignment, WAL append, memtable apply.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::MutexGuard;
use tracing::{debug, warn};

use crate::batch::WriteBatch;
use crate::db::{BACKPRESSURE_WAIT, DbInner, DbState, WriteState};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::options::WriteOptions;
use crate::types::MAX_SEQUENCE_NUMBER;
use crate::wal::WALRecord;

impl DbInner {
    /// Commits `batch` as one unit: either every operation becomes visible
    /// or none does.
    pub(crate) fn write(&self, opts: &WriteOptions, mut batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.options.merge_operator.is_none() && batch.has_merge() {
            return Err(Error::invalid_argument(
                "merge requires a merge operator in Options",
            ));
        }

        let mut writer = self.writer.lock();
        self.make_room_for_write(&mut writer, false)?;

        let first = self.seq.next_sequence();
        let last = first + u64::from(batch.count()) - 1;
        if last > MAX_SEQUENCE_NUMBER {
            return Err(Error::invalid_argument("sequence numbers exhausted"));
        }
        batch.set_sequence(first);

        if !opts.disable_wal {
            let record = WALRecord::new(batch.data().to_vec());
            if let Err(e) = writer.wal.active_writer().append_with_sync(&record, opts.sync) {
                warn!(error = %e, first, last, "WAL append failed, batch not applied");
                writer.wal_poisoned = true;
                // Burn the range so no later batch reuses these sequences.
                self.seq.set_last_sequence(last);
                return Err(e);
            }
        }

        let mem = Arc::clone(&self.current_state().mem);
        batch.insert_into(&mem)?;
        self.seq.set_last_sequence(last);
        Ok(())
    }

    /// Applies level-0 backpressure and makes sure the active memtable can
    /// take another batch, switching to a fresh one (and a fresh WAL
    /// segment) when it is full. `force` switches even if there is room.
    pub(crate) fn make_room_for_write(
        &self,
        writer: &mut MutexGuard<'_, WriteState>,
        force: bool,
    ) -> Result<()> {
        let mut allow_delay = !force;
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::ShutdownInProgress);
            }
            let state = self.current_state();
            let level0 = state.version.num_files(0);

            // Explicit flushes go through even at the stop trigger; they
            // are what drains level 0 when auto compactions are off.
            if !force && level0 >= self.options.level0_stop_writes_trigger {
                self.stats.lock().write_stops += 1;
                debug!(level0, "too many level-0 files, writer waiting");
                self.maybe_schedule_compaction();
                self.bg_cv.wait_for(writer, BACKPRESSURE_WAIT);
                continue;
            }

            if allow_delay && level0 >= self.options.level0_slowdown_writes_trigger {
                // Hand the compaction thread a little time, once per write.
                self.stats.lock().write_slowdowns += 1;
                MutexGuard::unlocked(writer, || std::thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
                continue;
            }

            if !force && !writer.wal_poisoned && !state.mem.is_full() {
                return Ok(());
            }

            if state.imms.len() + 1 >= self.options.max_write_buffer_number {
                debug!(imms = state.imms.len(), "memtables full, writer waiting for flush");
                self.maybe_schedule_flush();
                self.bg_cv.wait_for(writer, BACKPRESSURE_WAIT);
                continue;
            }

            return self.switch_memtable(writer, &state);
        }
    }

    /// Freezes the active memtable and starts a new one on a new WAL segment.
    fn switch_memtable(&self, writer: &mut MutexGuard<'_, WriteState>, state: &DbState) -> Result<()> {
        let old = if writer.wal_poisoned {
            writer.wal.roll()?
        } else {
            writer.wal.rotate()?
        };
        writer.wal_poisoned = false;
        let new_id = writer.wal.active_id();
        debug!(old = %old.display(), new_id, "switched memtable");

        let mem = Arc::new(MemTable::new(
            new_id,
            self.options.write_buffer_size,
            Arc::clone(&self.options.comparator),
        ));
        state.mem.freeze();
        {
            let mut guard = self.state.write();
            let mut imms = Vec::with_capacity(guard.imms.len() + 1);
            imms.push(Arc::clone(&guard.mem));
            imms.extend(guard.imms.iter().cloned());
            *guard = Arc::new(DbState {
                mem,
                imms,
                version: Arc::clone(&guard.version),
            });
        }
        self.maybe_schedule_flush();
        Ok(())
    }
}
