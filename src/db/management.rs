//! File management: backups, obsolete-file collection, destroy.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::cleaner::FileCleaner;
use crate::db::DbInner;
use crate::error::Result;
use crate::filename::{ARCHIVE_DIR, CURRENT, FileType, LOST_DIR, list_files, manifest_file_name, table_file_name};
use crate::options::{FlushOptions, Options};
use crate::version::VersionSet;

impl DbInner {
    pub(crate) fn live_files(&self, flush_memtable: bool) -> Result<(Vec<String>, u64)> {
        if flush_memtable {
            self.flush(&FlushOptions { wait: true })?;
        }
        let versions = self.versions.lock();
        let mut files = vec![CURRENT.to_string()];
        if let Some(number) = versions.manifest_number() {
            files.push(relative_name(&manifest_file_name(Path::new(""), number)));
        }
        for f in versions.current().live_files() {
            files.push(relative_name(&table_file_name(Path::new(""), f.number())));
        }
        let manifest_size = versions.manifest_size()?;
        Ok((files, manifest_size))
    }
}

fn relative_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Sets `path` aside under `<db>/lost/`, keeping its file name.
pub(crate) fn move_to_lost(dir: &Path, path: &Path) -> Result<()> {
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    let lost = dir.join(LOST_DIR);
    fs::create_dir_all(&lost)?;
    fs::rename(path, lost.join(name))?;
    Ok(())
}

/// Removes whatever the recovered state no longer refers to: stale
/// manifests, scratch files, tables missing from the current version, and
/// WAL segments older than `log_number`.
pub(crate) fn remove_obsolete_files(
    dir: &Path,
    versions: &VersionSet,
    cleaner: &FileCleaner,
    log_number: u64,
) -> Result<()> {
    let live: HashSet<u64> = versions.current().live_files().map(|f| f.number()).collect();
    let manifest = versions.manifest_number();
    for (kind, number, path) in list_files(dir)? {
        match kind {
            FileType::Table if !live.contains(&number) => cleaner.remove_table(number),
            FileType::Wal if number < log_number => cleaner.retire_wal(path),
            FileType::Manifest if Some(number) != manifest => remove_quietly(&path)?,
            FileType::Temp => remove_quietly(&path)?,
            _ => {}
        }
    }
    Ok(())
}

fn remove_quietly(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(file = %path.display(), "deleted obsolete file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Deletes every engine file under `dir`, then the directory itself if
/// nothing else is left in it.
pub(crate) fn destroy(dir: &Path, _options: &Options) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let files = list_files(dir)?;
    let count = files.len();
    for (_, _, path) in files {
        remove_quietly(&path)?;
    }
    let archive = dir.join(ARCHIVE_DIR);
    if archive.exists() {
        fs::remove_dir_all(&archive)?;
    }
    // Foreign files keep the directory alive.
    let _ = fs::remove_dir(dir);
    info!(dir = %dir.display(), files = count, "destroyed database");
    Ok(())
}
