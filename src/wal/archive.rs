use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::error::Result;
use crate::filename::{ARCHIVE_DIR, FileType, parse_file_name};

/// Where retired WAL segments go.
///
/// With neither a TTL nor a size limit, retired segments are deleted. With
/// either one set, they move to `<db>/archive/` and `purge` trims the
/// archive: expired segments first, then the oldest until the total fits.
#[derive(Debug, Clone)]
pub struct WalArchive {
    dir: PathBuf,
    ttl: Option<Duration>,
    size_limit: Option<u64>,
}

impl WalArchive {
    pub fn new(db_dir: &Path, ttl_seconds: u64, size_limit_mb: u64) -> Self {
        WalArchive {
            dir: db_dir.join(ARCHIVE_DIR),
            ttl: (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds)),
            size_limit: (size_limit_mb > 0).then(|| size_limit_mb * 1024 * 1024),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some() || self.size_limit.is_some()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes a segment from the live directory, archiving it if enabled.
    pub fn retire(&self, path: &Path) -> Result<()> {
        if !self.is_enabled() {
            fs::remove_file(path)?;
            debug!(wal = %path.display(), "deleted WAL segment");
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let Some(name) = path.file_name() else {
            return Ok(());
        };
        let target = self.dir.join(name);
        fs::rename(path, &target)?;
        debug!(wal = %target.display(), "archived WAL segment");
        self.purge()
    }

    /// Archived segments, oldest first, with size and modification time.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf, u64, SystemTime)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((FileType::Wal, id)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            let meta = entry.metadata()?;
            out.push((id, entry.path(), meta.len(), meta.modified()?));
        }
        out.sort_by_key(|(id, ..)| *id);
        Ok(out)
    }

    pub fn purge(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let now = SystemTime::now();
        let mut kept = Vec::new();
        for (id, path, size, modified) in self.list()? {
            let expired = match self.ttl {
                Some(ttl) => now.duration_since(modified).unwrap_or_default() > ttl,
                None => false,
            };
            if expired {
                fs::remove_file(&path)?;
                debug!(wal = id, "purged expired archived WAL");
            } else {
                kept.push((id, path, size));
            }
        }

        if let Some(limit) = self.size_limit {
            let mut total: u64 = kept.iter().map(|(_, _, size)| size).sum();
            for (id, path, size) in kept {
                if total <= limit {
                    break;
                }
                fs::remove_file(&path)?;
                total -= size;
                debug!(wal = id, "purged archived WAL over size limit");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_archive_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let wal = dir.path().join("000001.wal");
        fs::write(&wal, b"x").unwrap();
        let archive = WalArchive::new(dir.path(), 0, 0);
        archive.retire(&wal).unwrap();
        assert!(!wal.exists());
        assert!(!archive.dir().exists());
    }

    #[test]
    fn size_limit_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = WalArchive::new(dir.path(), 0, 1);
        let chunk = vec![0u8; 600 * 1024];
        for id in 1..=3u64 {
            let wal = dir.path().join(format!("{id:06}.wal"));
            fs::write(&wal, &chunk).unwrap();
            archive.retire(&wal).unwrap();
        }
        let ids: Vec<u64> = archive.list().unwrap().into_iter().map(|(id, ..)| id).collect();
        assert_eq!(ids, vec![3]);
    }
}
