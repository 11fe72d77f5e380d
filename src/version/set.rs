use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::cleaner::FileCleaner;
use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::filename::{manifest_file_name, read_current_file, set_current_file};
use crate::options::Options;
use crate::types::SequenceNumber;
use crate::version::{Manifest, Version, VersionBuilder, VersionEdit};

/// Owner of the current version, the manifest and the persisted counters.
///
/// Callers serialize access (the engine keeps it behind a mutex); the
/// current version itself is shared freely as an `Arc`.
pub struct VersionSet {
    dir: PathBuf,
    options: Arc<Options>,
    cleaner: Option<Arc<FileCleaner>>,
    current: Arc<Version>,
    manifest: Option<Manifest>,
    next_file_number: u64,
    log_number: u64,
    last_sequence: SequenceNumber,
}

impl VersionSet {
    pub fn new(dir: &Path, options: Arc<Options>, cleaner: Option<Arc<FileCleaner>>) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let current = Arc::new(Version::new(options.num_levels, icmp));
        Self {
            dir: dir.to_path_buf(),
            options,
            cleaner,
            current,
            manifest: None,
            next_file_number: 1,
            log_number: 0,
            last_sequence: 0,
        }
    }

    /// Rebuilds the current version from the manifest named by CURRENT.
    pub fn recover(&mut self) -> Result<()> {
        let number = read_current_file(&self.dir)?;
        let path = manifest_file_name(&self.dir, number);
        let edits = Manifest::read_edits(&path)?;

        let mut builder = VersionBuilder::new(&self.current);
        let mut log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;
        for edit in &edits {
            if let Some(name) = &edit.comparator {
                let ours = self.options.comparator.name();
                if name != ours {
                    return Err(Error::ComparatorMismatch {
                        expected: name.clone(),
                        found: ours.to_string(),
                    });
                }
            }
            builder.apply(edit);
            log_number = edit.log_number.or(log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
        }

        let Some(next_file_number) = next_file_number else {
            return Err(Error::corruption(format!(
                "{}: no next file number recorded",
                path.display()
            )));
        };

        let (version, _) = builder.finish(self.cleaner.as_ref(), &self.options);
        self.current = Arc::new(version);
        self.log_number = log_number.unwrap_or(0);
        self.last_sequence = last_sequence.unwrap_or(0);
        // Never hand out the manifest's own number again.
        self.next_file_number = next_file_number.max(number + 1);

        info!(
            manifest = number,
            edits = edits.len(),
            log_number = self.log_number,
            last_sequence = self.last_sequence,
            levels = %self.current.level_summary(),
            "recovered version set"
        );
        Ok(())
    }

    /// Starts a fresh manifest holding a snapshot of the current state and
    /// points CURRENT at it.
    pub fn write_new_manifest(&mut self) -> Result<()> {
        let number = self.new_file_number();
        let path = manifest_file_name(&self.dir, number);
        let mut manifest = Manifest::create(&path, number, self.options.use_fsync)?;
        manifest.add_record(&self.snapshot_edit())?;
        set_current_file(&self.dir, number)?;
        self.manifest = Some(manifest);
        Ok(())
    }

    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit {
            comparator: Some(self.options.comparator.name().to_string()),
            log_number: Some(self.log_number),
            next_file_number: Some(self.next_file_number),
            last_sequence: Some(self.last_sequence),
            ..VersionEdit::default()
        };
        for level in 0..self.current.num_levels() {
            for f in self.current.files(level) {
                edit.add_file(level, f.meta().clone());
            }
        }
        edit
    }

    /// Persists `edit` and installs the resulting version. Tables the edit
    /// removes are marked obsolete; they are deleted once no older version
    /// or iterator holds them.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        let log_number = edit.log_number.unwrap_or(self.log_number);
        if log_number < self.log_number {
            return Err(Error::invalid_argument(format!(
                "log number moved backwards: {log_number} < {}",
                self.log_number
            )));
        }
        edit.log_number = Some(log_number);
        edit.next_file_number = Some(self.next_file_number);
        let last_sequence = edit.last_sequence.unwrap_or(self.last_sequence).max(self.last_sequence);
        edit.last_sequence = Some(last_sequence);

        let mut builder = VersionBuilder::new(&self.current);
        builder.apply(edit);
        let (version, removed) = builder.finish(self.cleaner.as_ref(), &self.options);

        let Some(manifest) = self.manifest.as_mut() else {
            return Err(Error::invalid_argument("version set has no open manifest"));
        };
        manifest.add_record(edit)?;

        self.current = Arc::new(version);
        self.log_number = log_number;
        self.last_sequence = last_sequence;
        for handle in removed {
            handle.mark_obsolete();
        }
        Ok(())
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Makes sure `number` is never allocated again.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        self.last_sequence = self.last_sequence.max(sequence);
    }

    pub fn manifest_number(&self) -> Option<u64> {
        self.manifest.as_ref().map(Manifest::number)
    }

    pub fn manifest_size(&self) -> Result<u64> {
        match &self.manifest {
            Some(m) => m.size(),
            None => Ok(0),
        }
    }

    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    pub fn icmp(&self) -> &InternalKeyComparator {
        self.current.icmp()
    }
}
