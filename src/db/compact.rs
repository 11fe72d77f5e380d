//! Background and manual compactions, and their installation.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::info;

use crate::compaction::{Compaction, CompactionJob, pick_compaction, range_compaction};
use crate::db::DbInner;
use crate::error::{Error, Result};
use crate::filename::table_file_name;
use crate::options::FlushOptions;
use crate::version::VersionEdit;

impl DbInner {
    /// Runs one automatically picked compaction. Returns false when there
    /// was nothing to do.
    pub(crate) fn background_compaction(&self) -> Result<bool> {
        if self.options.disable_auto_compactions {
            return Ok(false);
        }
        let _compacting = self.compaction_lock.lock();
        let version = self.versions.lock().current();
        let Some(c) = pick_compaction(&version, &self.options) else {
            return Ok(false);
        };
        self.run_compaction(c)?;
        Ok(true)
    }

    /// Compacts `[begin, end]` level by level, down to the deepest level
    /// that overlaps it. The active memtable is flushed first.
    pub(crate) fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.flush(&FlushOptions { wait: true })?;

        let max_level_with_files = self.versions.lock().current().max_level_with_files().max(1);

        for level in 0..max_level_with_files {
            loop {
                if self.shutting_down.load(Ordering::Acquire) {
                    return Err(Error::ShutdownInProgress);
                }
                let _compacting = self.compaction_lock.lock();
                let version = self.versions.lock().current();
                let Some(c) = range_compaction(&version, &self.options, level, begin, end) else {
                    break;
                };
                self.run_compaction(c)?;
            }
        }
        Ok(())
    }

    /// Executes `c` and installs its result. Callers hold the compaction lock.
    fn run_compaction(&self, mut c: Compaction) -> Result<()> {
        let start = Instant::now();
        let mut edit = VersionEdit::new();

        if c.is_trivial_move() {
            let f = &c.inputs(0)[0];
            edit.delete_file(c.level(), f.number());
            edit.add_file(c.output_level(), f.meta().clone());
            self.install_edit(&mut edit)?;
            info!(
                table = f.number(),
                from = c.level(),
                to = c.output_level(),
                bytes = f.file_size(),
                "moved table"
            );
            return Ok(());
        }

        let smallest_snapshot = self.seq.smallest_snapshot();
        let allocate = || self.versions.lock().new_file_number();
        let job = CompactionJob::new(
            &self.dir,
            &self.options,
            &self.tables,
            smallest_snapshot,
            &allocate,
            &self.shutting_down,
        );
        let output = job.run(&mut c)?;

        c.add_input_deletions(&mut edit);
        for meta in &output.files {
            edit.add_file(c.output_level(), meta.clone());
        }
        if let Err(e) = self.install_edit(&mut edit) {
            for meta in &output.files {
                let _ = std::fs::remove_file(table_file_name(&self.dir, meta.number));
            }
            return Err(e);
        }
        self.stats.lock().record(
            c.output_level(),
            output.bytes_read,
            output.bytes_written,
            start.elapsed(),
        );
        info!(
            levels = %self.current_state().version.level_summary(),
            "installed compaction"
        );
        Ok(())
    }

    /// Logs `edit` to the manifest and publishes the resulting version.
    fn install_edit(&self, edit: &mut VersionEdit) -> Result<()> {
        let mut versions = self.versions.lock();
        edit.last_sequence = Some(self.seq.last_sequence());
        versions.log_and_apply(edit)?;
        self.install_version(versions.current());
        drop(versions);
        self.bg_cv.notify_all();
        Ok(())
    }
}
