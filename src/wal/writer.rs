use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;
use crate::filename::{list_wal_files, sync_dir, wal_file_name};
use crate::wal::SyncPolicy;
use crate::wal::record::WALRecord;

/// Writes WAL records to a file on disk.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
pub struct WALWriter {
    writer: BufWriter<File>,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
    last_sync: Instant,
    use_fsync: bool,
}

impl WALWriter {
    /// Create a new WAL writer at the given path.
    pub fn new(path: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();

        Ok(WALWriter {
            writer: BufWriter::new(file),
            offset,
            sync_policy,
            writes_since_sync: 0,
            last_sync: Instant::now(),
            use_fsync: true,
        })
    }

    /// `false` syncs file data only (`sync_data`), skipping metadata.
    pub fn with_fsync(mut self, use_fsync: bool) -> Self {
        self.use_fsync = use_fsync;
        self
    }

    /// Append a record to the WAL and return the log offset just past it.
    /// Depending on SyncPolicy, may fsync after this write.
    pub fn append(&mut self, record: &WALRecord) -> Result<u64> {
        self.append_with_sync(record, false)
    }

    /// Like `append`, but `force_sync` syncs regardless of the policy.
    ///
    /// A failed write or sync cuts the segment back to where the record
    /// started and drops whatever is still buffered, so the record cannot
    /// come back on replay.
    pub fn append_with_sync(&mut self, record: &WALRecord, force_sync: bool) -> Result<u64> {
        let start = self.offset;
        let written = self.write_record(record, force_sync);
        if written.is_err() {
            self.discard_from(start);
        }
        written
    }

    fn write_record(&mut self, record: &WALRecord, force_sync: bool) -> Result<u64> {
        let encoded = record.encode();

        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        self.writes_since_sync += 1;

        let due = force_sync
            || match self.sync_policy {
                SyncPolicy::EveryWrite => true,
                SyncPolicy::EveryNWrites(n) => self.writes_since_sync >= n,
                SyncPolicy::EveryNMillis(ms) => self.last_sync.elapsed() >= Duration::from_millis(ms),
                SyncPolicy::Manual => false,
            };
        if due {
            self.sync()?;
        }

        Ok(self.offset)
    }

    /// Truncates the segment to `offset` and empties the write buffer.
    fn discard_from(&mut self, offset: u64) {
        self.offset = offset;
        let file = match self.writer.get_ref().try_clone() {
            Ok(file) => file,
            Err(e) => {
                warn!(offset, error = %e, "could not reopen WAL segment to discard a failed record");
                return;
            }
        };
        // `into_parts` hands back the unwritten bytes instead of flushing them.
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (_file, _unwritten) = stale.into_parts();
        if let Err(e) = self.writer.get_ref().set_len(offset) {
            warn!(offset, error = %e, "could not truncate WAL segment after a failed append");
        }
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.use_fsync {
            self.writer.get_ref().sync_all()?;
        } else {
            self.writer.get_ref().sync_data()?;
        }
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Records appended since the last fsync.
    pub fn writes_since_sync(&self) -> usize {
        self.writes_since_sync
    }
}

/// Manages WAL file rotation.
///
/// When a memtable is frozen:
/// 1. Create new WAL for the new active memtable
/// 2. Keep old WAL until its memtable's SSTable is written and installed
/// 3. Retire (delete or archive) the old WAL
///
/// CRITICAL INVARIANT: Old WAL is only retired AFTER its SSTable is
/// fully written and fsync'd. Violating this loses data.
pub struct WALManager {
    dir: PathBuf,
    active_writer: WALWriter,
    active_id: u64,
    sync_policy: SyncPolicy,
    use_fsync: bool,
}

impl WALManager {
    /// Create a WAL manager for the given directory, starting a fresh
    /// segment after any that already exist.
    pub fn new(dir: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        Self::open(dir, sync_policy, 1, true)
    }

    /// Like `new`, but the first segment id is at least `min_id`.
    pub fn open(dir: &Path, sync_policy: SyncPolicy, min_id: u64, use_fsync: bool) -> Result<Self> {
        let next_existing = list_wal_files(dir)?.last().map_or(1, |(id, _)| id + 1);
        let active_id = next_existing.max(min_id);
        let active_writer = Self::create_segment(dir, active_id, sync_policy, use_fsync)?;
        Ok(WALManager {
            dir: dir.to_path_buf(),
            active_writer,
            active_id,
            sync_policy,
            use_fsync,
        })
    }

    fn create_segment(dir: &Path, id: u64, policy: SyncPolicy, use_fsync: bool) -> Result<WALWriter> {
        let path = wal_file_name(dir, id);
        let writer = WALWriter::new(&path, policy)?.with_fsync(use_fsync);
        sync_dir(dir)?;
        debug!(wal = %path.display(), "created WAL segment");
        Ok(writer)
    }

    /// Rotate: seal the current WAL, create a new one.
    /// Returns the path of the old WAL (retired after its SSTable is installed).
    pub fn rotate(&mut self) -> Result<PathBuf> {
        self.active_writer.sync()?;
        self.roll()
    }

    /// Switches to a new segment without syncing the current one. Used after
    /// a failed append, when the current segment ends in a partial record.
    pub fn roll(&mut self) -> Result<PathBuf> {
        let old_path = self.active_path();
        let next_id = self.active_id + 1;
        self.active_writer = Self::create_segment(&self.dir, next_id, self.sync_policy, self.use_fsync)?;
        self.active_id = next_id;
        Ok(old_path)
    }

    pub fn active_writer(&mut self) -> &mut WALWriter {
        &mut self.active_writer
    }

    pub fn active_id(&self) -> u64 {
        self.active_id
    }

    pub fn active_path(&self) -> PathBuf {
        wal_file_name(&self.dir, self.active_id)
    }

    /// Delete an old WAL file (safe only after SSTable is fsync'd).
    pub fn delete_wal(path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        debug!(wal = %path.display(), "deleted WAL segment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WALReader;

    fn payloads(path: &Path) -> Vec<Vec<u8>> {
        WALReader::new(path)
            .unwrap()
            .iter()
            .map(|r| r.unwrap().payload)
            .collect()
    }

    #[test]
    fn discarded_record_is_cut_from_the_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.wal");
        let mut writer = WALWriter::new(&path, SyncPolicy::Manual).unwrap();
        let kept = writer.append(&WALRecord::new(b"kept".to_vec())).unwrap();
        writer.append(&WALRecord::new(b"failed".to_vec())).unwrap();

        writer.discard_from(kept);
        assert_eq!(writer.offset(), kept);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), kept);

        writer.append(&WALRecord::new(b"next".to_vec())).unwrap();
        writer.sync().unwrap();
        assert_eq!(payloads(&path), vec![b"kept".to_vec(), b"next".to_vec()]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_append_leaves_offset_unchanged() {
        // Every write to /dev/full fails with ENOSPC once it reaches the device.
        let mut writer = WALWriter::new(Path::new("/dev/full"), SyncPolicy::Manual).unwrap();
        let before = writer.offset();
        assert!(writer.append_with_sync(&WALRecord::new(vec![7; 64]), true).is_err());
        assert_eq!(writer.offset(), before);
        assert_eq!(writer.writes_since_sync(), 0);
    }
}
