//! Physical deletion of obsolete files.
//!
//! Tables become deletable when their last `TableFile` handle drops; WAL
//! segments when their memtable has been flushed. While deletions are
//! disabled (a backup copying live files) both kinds are parked and removed
//! when deletions are enabled again.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::TableCache;
use crate::error::Result;
use crate::filename::table_file_name;
use crate::wal::WalArchive;

enum Obsolete {
    Table(u64),
    Wal(PathBuf),
}

#[derive(Default)]
struct CleanerState {
    disabled: usize,
    pending: Vec<Obsolete>,
}

pub struct FileCleaner {
    dir: PathBuf,
    tables: Arc<TableCache>,
    archive: WalArchive,
    state: Mutex<CleanerState>,
}

impl FileCleaner {
    pub fn new(dir: &Path, tables: Arc<TableCache>, archive: WalArchive) -> Self {
        Self {
            dir: dir.to_path_buf(),
            tables,
            archive,
            state: Mutex::new(CleanerState::default()),
        }
    }

    /// Deletes table `number`, or parks it while deletions are disabled.
    pub fn remove_table(&self, number: u64) {
        self.tables.evict(number);
        let mut state = self.state.lock();
        if state.disabled > 0 {
            state.pending.push(Obsolete::Table(number));
            return;
        }
        drop(state);
        self.delete(Obsolete::Table(number));
    }

    /// Retires a flushed WAL segment (delete or archive).
    pub fn retire_wal(&self, path: PathBuf) {
        let mut state = self.state.lock();
        if state.disabled > 0 {
            state.pending.push(Obsolete::Wal(path));
            return;
        }
        drop(state);
        self.delete(Obsolete::Wal(path));
    }

    /// Nested: every call needs a matching `enable`.
    pub fn disable(&self) {
        self.state.lock().disabled += 1;
    }

    /// Undoes one `disable` (all of them with `force`). Parked files are
    /// removed once the count reaches zero.
    pub fn enable(&self, force: bool) {
        let pending = {
            let mut state = self.state.lock();
            state.disabled = if force { 0 } else { state.disabled.saturating_sub(1) };
            if state.disabled > 0 {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        for file in pending {
            self.delete(file);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().disabled == 0
    }

    pub fn archive(&self) -> &WalArchive {
        &self.archive
    }

    fn delete(&self, file: Obsolete) {
        match file {
            Obsolete::Table(number) => {
                let path = table_file_name(&self.dir, number);
                match fs::remove_file(&path) {
                    Ok(()) => debug!(table = number, "deleted obsolete table"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(table = number, error = %e, "failed to delete obsolete table"),
                }
            }
            Obsolete::Wal(path) => {
                if let Err(e) = self.retire(&path) {
                    warn!(wal = %path.display(), error = %e, "failed to retire WAL segment");
                }
            }
        }
    }

    fn retire(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        self.archive.retire(path)
    }
}
