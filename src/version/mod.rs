//! Versions: immutable snapshots of which tables live at which level.
//!
//! A new version is built from the current one plus a `VersionEdit` and
//! swapped in atomically. Readers and iterators hold an `Arc<Version>`, so
//! they keep seeing the table set they started with. Each table is shared
//! between versions through a `TableFile` handle; once a table has been
//! edited out and the last version referencing it is gone, the handle's drop
//! deletes the file.

pub mod edit;
pub mod manifest;
pub mod set;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::TableCache;
use crate::cleaner::FileCleaner;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::lookup::LookupState;
use crate::options::Options;
use crate::types::{SequenceNumber, extract_user_key};

pub use edit::VersionEdit;
pub use manifest::Manifest;
pub use set::VersionSet;

/// Minimum number of seeks a table absorbs before it is worth compacting.
const MIN_ALLOWED_SEEKS: i64 = 100;
/// One seek costs about as much as compacting this many bytes.
const BYTES_PER_SEEK: u64 = 16 * 1024;

/// Persisted description of one table. Keys are encoded internal keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
    /// Newest sequence number the table holds. Orders level 0 for reads.
    #[serde(default)]
    pub largest_seq: SequenceNumber,
}

/// Shared handle to a live table.
pub struct TableFile {
    meta: FileMetaData,
    allowed_seeks: AtomicI64,
    obsolete: AtomicBool,
    cleaner: Option<Arc<FileCleaner>>,
}

impl TableFile {
    pub fn new(meta: FileMetaData, cleaner: Option<Arc<FileCleaner>>) -> Self {
        let allowed = (meta.file_size / BYTES_PER_SEEK) as i64;
        Self {
            meta,
            allowed_seeks: AtomicI64::new(allowed.max(MIN_ALLOWED_SEEKS)),
            obsolete: AtomicBool::new(false),
            cleaner,
        }
    }

    pub fn meta(&self) -> &FileMetaData {
        &self.meta
    }

    pub fn number(&self) -> u64 {
        self.meta.number
    }

    pub fn file_size(&self) -> u64 {
        self.meta.file_size
    }

    pub fn smallest(&self) -> &[u8] {
        &self.meta.smallest
    }

    pub fn largest(&self) -> &[u8] {
        &self.meta.largest
    }

    pub fn smallest_user_key(&self) -> &[u8] {
        extract_user_key(&self.meta.smallest)
    }

    pub fn largest_user_key(&self) -> &[u8] {
        extract_user_key(&self.meta.largest)
    }

    pub fn largest_seq(&self) -> SequenceNumber {
        self.meta.largest_seq
    }

    /// The file is deleted when the last handle drops.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(AtomicOrdering::Acquire)
    }

    /// Charges one wasted seek. Returns true when the budget ran out.
    fn charge_seek(&self) -> bool {
        self.allowed_seeks.fetch_sub(1, AtomicOrdering::Relaxed) <= 1
    }
}

impl Drop for TableFile {
    fn drop(&mut self) {
        if self.is_obsolete() {
            if let Some(cleaner) = &self.cleaner {
                cleaner.remove_table(self.meta.number);
            }
        }
    }
}

impl std::fmt::Debug for TableFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableFile")
            .field("number", &self.meta.number)
            .field("file_size", &self.meta.file_size)
            .finish()
    }
}

pub fn total_file_size(files: &[Arc<TableFile>]) -> u64 {
    files.iter().map(|f| f.file_size()).sum()
}

/// Result of a point lookup against the tables of a version.
#[derive(Debug, Default, Clone, Copy)]
pub struct LookupStats {
    /// The lookup was resolved by a table.
    pub done: bool,
    /// A table ran out of allowed seeks and became a compaction candidate.
    pub seek_compaction: bool,
}

pub struct Version {
    levels: Vec<Vec<Arc<TableFile>>>,
    icmp: InternalKeyComparator,
    /// Highest size score across levels, and its level.
    compaction_score: f64,
    compaction_level: usize,
    /// Seek-triggered candidate: (level, table).
    file_to_compact: Mutex<Option<(usize, Arc<TableFile>)>>,
}

impl Version {
    pub fn new(num_levels: usize, icmp: InternalKeyComparator) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
            icmp,
            compaction_score: 0.0,
            compaction_level: 0,
            file_to_compact: Mutex::new(None),
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn files(&self, level: usize) -> &[Arc<TableFile>] {
        &self.levels[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.levels[level])
    }

    pub fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    pub fn file_to_compact(&self) -> Option<(usize, Arc<TableFile>)> {
        self.file_to_compact.lock().clone()
    }

    /// Every live table number.
    pub fn live_files(&self) -> impl Iterator<Item = &Arc<TableFile>> {
        self.levels.iter().flatten()
    }

    /// Deepest level holding at least one table.
    pub fn max_level_with_files(&self) -> usize {
        self.levels.iter().rposition(|files| !files.is_empty()).unwrap_or(0)
    }

    /// Feeds the lookup with the key's versions held by tables, newest
    /// source first: level-0 tables by descending largest sequence (file
    /// number breaks ties), then one candidate per deeper level.
    pub fn get(&self, state: &mut LookupState, tables: &TableCache, fill_cache: bool) -> Result<LookupStats> {
        let ucmp = self.icmp.user_comparator();
        let user_key = state.user_key().to_vec();
        let mut stats = LookupStats::default();
        let mut first_read: Option<(usize, Arc<TableFile>)> = None;
        let mut charged = false;

        let mut candidates: Vec<(usize, Arc<TableFile>)> = Vec::new();
        let mut level0: Vec<&Arc<TableFile>> = self.levels[0]
            .iter()
            .filter(|f| {
                ucmp.compare(&user_key, f.smallest_user_key()) != Ordering::Less
                    && ucmp.compare(&user_key, f.largest_user_key()) != Ordering::Greater
            })
            .collect();
        // File numbers alone mislead once repair has put compaction outputs
        // back at level 0.
        level0.sort_by(|a, b| {
            b.largest_seq()
                .cmp(&a.largest_seq())
                .then_with(|| b.number().cmp(&a.number()))
        });
        candidates.extend(level0.into_iter().map(|f| (0, Arc::clone(f))));

        for level in 1..self.levels.len() {
            let files = &self.levels[level];
            let index =
                files.partition_point(|f| self.icmp.compare(f.largest(), state.lookup_key()) == Ordering::Less);
            if let Some(f) = files.get(index) {
                if ucmp.compare(&user_key, f.smallest_user_key()) != Ordering::Less {
                    candidates.push((level, Arc::clone(f)));
                }
            }
        }

        for (level, file) in candidates {
            // A lookup that needs a second table wasted a seek on the first.
            if !charged {
                if let Some((first_level, first)) = first_read.take() {
                    charged = true;
                    if first.charge_seek() {
                        let mut slot = self.file_to_compact.lock();
                        if slot.is_none() {
                            *slot = Some((first_level, first));
                            stats.seek_compaction = true;
                        }
                    }
                } else {
                    first_read = Some((level, Arc::clone(&file)));
                }
            }

            let table = tables.find_table(file.number())?;
            if table.get(state, fill_cache)? {
                stats.done = true;
                return Ok(stats);
            }
        }
        Ok(stats)
    }

    /// Tables at `level` overlapping the user-key range `[begin, end]`
    /// (unbounded where `None`). At level 0 the range widens to cover every
    /// transitively overlapping file.
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<TableFile>> {
        let ucmp = self.icmp.user_comparator();
        let mut user_begin = begin.map(|b| b.to_vec());
        let mut user_end = end.map(|e| e.to_vec());
        let mut inputs = Vec::new();
        let mut i = 0;
        while i < self.levels[level].len() {
            let f = &self.levels[level][i];
            i += 1;
            let file_start = f.smallest_user_key();
            let file_limit = f.largest_user_key();
            if user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue;
            }
            if user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue;
            }
            inputs.push(Arc::clone(f));
            if level == 0 {
                // Level-0 files may overlap each other: widen and restart.
                if user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less)
                {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater)
                {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// True if any table at `level` overlaps the user-key range.
    pub fn overlap_in_level(&self, level: usize, smallest: &[u8], largest: &[u8]) -> bool {
        let ucmp = self.icmp.user_comparator();
        let files = &self.levels[level];
        if level == 0 {
            return files.iter().any(|f| {
                ucmp.compare(largest, f.smallest_user_key()) != Ordering::Less
                    && ucmp.compare(smallest, f.largest_user_key()) != Ordering::Greater
            });
        }
        let index = files.partition_point(|f| ucmp.compare(f.largest_user_key(), smallest) == Ordering::Less);
        files
            .get(index)
            .is_some_and(|f| ucmp.compare(largest, f.smallest_user_key()) != Ordering::Less)
    }

    /// Level a flushed memtable covering `[smallest, largest]` should land
    /// at: level 0 if it overlaps it, otherwise as deep as
    /// `max_mem_compaction_level` while nothing below overlaps and the
    /// grandparent overlap stays bounded.
    pub fn pick_level_for_memtable_output(&self, smallest: &[u8], largest: &[u8], options: &Options) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, smallest, largest) {
            return level;
        }
        let limit = options.max_grandparent_overlap_factor * options.target_file_size(0);
        while level < options.max_mem_compaction_level && level + 1 < self.num_levels() {
            if self.overlap_in_level(level + 1, smallest, largest) {
                break;
            }
            if level + 2 < self.num_levels() {
                let overlaps = self.overlapping_inputs(level + 2, Some(smallest), Some(largest));
                if total_file_size(&overlaps) > limit {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Approximate byte offset of internal key `key` across the version.
    pub fn approximate_offset_of(&self, key: &[u8], tables: &TableCache) -> u64 {
        let mut result = 0;
        for (level, files) in self.levels.iter().enumerate() {
            for f in files {
                if self.icmp.compare(f.largest(), key) != Ordering::Greater {
                    result += f.file_size();
                } else if self.icmp.compare(f.smallest(), key) == Ordering::Greater {
                    // Deeper files at this level start even later.
                    if level > 0 {
                        break;
                    }
                } else if let Ok(table) = tables.find_table(f.number()) {
                    result += table.approximate_offset_of(key);
                }
            }
        }
        result
    }

    /// Computes the best size-triggered compaction level and its score.
    pub fn finalize(&mut self, options: &Options) {
        let mut best_level = 0;
        let mut best_score = -1.0;
        // The last level has nowhere to go.
        for level in 0..self.levels.len() - 1 {
            let score = if level == 0 {
                self.levels[0].len() as f64 / options.level0_file_num_compaction_trigger as f64
            } else {
                self.level_bytes(level) as f64 / options.max_bytes_for_level(level) as f64
            };
            if score > best_score {
                best_score = score;
                best_level = level;
            }
        }
        self.compaction_level = best_level;
        self.compaction_score = best_score;
    }

    /// `files[ n0 n1 ... ]` summary.
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self.levels.iter().map(|f| f.len().to_string()).collect();
        format!("files[ {} ]", counts.join(" "))
    }

    /// Per-level listing used by the `lsmkv.sstables` property.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        for (level, files) in self.levels.iter().enumerate() {
            let _ = writeln!(out, "--- level {level} ---");
            for f in files {
                let _ = writeln!(
                    out,
                    " {}:{}[{} .. {}]",
                    f.number(),
                    f.file_size(),
                    String::from_utf8_lossy(f.smallest_user_key()),
                    String::from_utf8_lossy(f.largest_user_key())
                );
            }
        }
        out
    }
}

#[derive(Default)]
struct LevelChanges {
    deleted: HashSet<u64>,
    added: BTreeMap<u64, FileMetaData>,
}

/// Applies a sequence of edits to a base version.
pub struct VersionBuilder<'a> {
    base: &'a Version,
    levels: Vec<LevelChanges>,
}

impl<'a> VersionBuilder<'a> {
    pub fn new(base: &'a Version) -> Self {
        let levels = (0..base.num_levels()).map(|_| LevelChanges::default()).collect();
        Self { base, levels }
    }

    pub fn apply(&mut self, edit: &VersionEdit) {
        for &(level, number) in &edit.deleted_files {
            if let Some(changes) = self.levels.get_mut(level) {
                changes.added.remove(&number);
                changes.deleted.insert(number);
            }
        }
        for (level, meta) in &edit.new_files {
            if let Some(changes) = self.levels.get_mut(*level) {
                changes.deleted.remove(&meta.number);
                changes.added.insert(meta.number, meta.clone());
            }
        }
    }

    /// Produces the new version and the handles it no longer references.
    /// A table moved between levels keeps its handle.
    pub fn finish(self, cleaner: Option<&Arc<FileCleaner>>, options: &Options) -> (Version, Vec<Arc<TableFile>>) {
        let icmp = self.base.icmp.clone();
        let mut removed: HashMap<u64, Arc<TableFile>> = HashMap::new();
        let mut levels: Vec<Vec<Arc<TableFile>>> = Vec::with_capacity(self.levels.len());

        for (level, changes) in self.levels.iter().enumerate() {
            let mut files = Vec::new();
            for f in &self.base.levels[level] {
                if changes.deleted.contains(&f.number()) {
                    removed.insert(f.number(), Arc::clone(f));
                } else {
                    files.push(Arc::clone(f));
                }
            }
            levels.push(files);
        }

        for (level, changes) in self.levels.iter().enumerate() {
            for (number, meta) in &changes.added {
                let handle = match removed.remove(number) {
                    Some(existing) => existing,
                    None => Arc::new(TableFile::new(meta.clone(), cleaner.cloned())),
                };
                levels[level].push(handle);
            }
        }

        for (level, files) in levels.iter_mut().enumerate() {
            if level == 0 {
                files.sort_by_key(|f| f.number());
            } else {
                files.sort_by(|a, b| icmp.compare(a.smallest(), b.smallest()));
            }
        }

        let mut version = Version {
            levels,
            icmp,
            compaction_score: 0.0,
            compaction_level: 0,
            file_to_compact: Mutex::new(None),
        };
        version.finalize(options);
        (version, removed.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::default_comparator;
    use crate::types::{ValueType, encode_internal_key};

    fn meta(number: u64, smallest: &str, largest: &str) -> FileMetaData {
        FileMetaData {
            number,
            file_size: 100,
            smallest: encode_internal_key(smallest.as_bytes(), 100, ValueType::Put),
            largest: encode_internal_key(largest.as_bytes(), 100, ValueType::Put),
            largest_seq: 100,
        }
    }

    fn version_with(files: &[(usize, FileMetaData)]) -> Version {
        let base = Version::new(4, InternalKeyComparator::new(default_comparator()));
        let mut edit = VersionEdit::new();
        for (level, m) in files {
            edit.add_file(*level, m.clone());
        }
        let mut builder = VersionBuilder::new(&base);
        builder.apply(&edit);
        builder.finish(None, &Options::default()).0
    }

    fn numbers(files: &[Arc<TableFile>]) -> Vec<u64> {
        files.iter().map(|f| f.number()).collect()
    }

    #[test]
    fn deeper_levels_sorted_by_smallest_key() {
        let v = version_with(&[(1, meta(3, "m", "p")), (1, meta(2, "a", "c")), (1, meta(4, "x", "z"))]);
        assert_eq!(numbers(v.files(1)), vec![2, 3, 4]);
        assert_eq!(v.max_level_with_files(), 1);
    }

    #[test]
    fn level0_overlap_widens_transitively() {
        let v = version_with(&[(0, meta(1, "a", "c")), (0, meta(2, "b", "f")), (0, meta(3, "e", "h")), (0, meta(4, "x", "z"))]);
        let inputs = v.overlapping_inputs(0, Some(b"c"), Some(b"c"));
        let mut got = numbers(&inputs);
        got.sort();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn overlap_in_sorted_level() {
        let v = version_with(&[(1, meta(1, "b", "d")), (1, meta(2, "g", "k"))]);
        assert!(v.overlap_in_level(1, b"c", b"c"));
        assert!(!v.overlap_in_level(1, b"e", b"f"));
        assert!(v.overlap_in_level(1, b"e", b"h"));
        assert!(!v.overlap_in_level(1, b"l", b"z"));
    }

    #[test]
    fn memtable_output_pushed_down_when_free() {
        let opts = Options::default();
        let v = version_with(&[(0, meta(1, "a", "c")), (2, meta(2, "x", "z"))]);
        assert_eq!(v.pick_level_for_memtable_output(b"b", b"b", &opts), 0);
        assert_eq!(v.pick_level_for_memtable_output(b"m", b"n", &opts), 2);
        assert_eq!(v.pick_level_for_memtable_output(b"y", b"y", &opts), 1);
    }

    #[test]
    fn builder_reports_removed_handles_and_keeps_moved_ones() {
        let base = version_with(&[(1, meta(1, "a", "c")), (1, meta(2, "d", "f"))]);
        let mut edit = VersionEdit::new();
        edit.delete_file(1, 1);
        edit.delete_file(1, 2);
        edit.add_file(2, meta(2, "d", "f"));
        let mut builder = VersionBuilder::new(&base);
        builder.apply(&edit);
        let (v, removed) = builder.finish(None, &Options::default());
        assert_eq!(numbers(&removed), vec![1]);
        assert_eq!(numbers(v.files(2)), vec![2]);
        assert!(Arc::ptr_eq(&v.files(2)[0], &base.files(1)[1]));
    }

    #[test]
    fn level0_score_counts_files() {
        let opts = Options {
            level0_file_num_compaction_trigger: 2,
            ..Options::default()
        };
        let base = Version::new(4, InternalKeyComparator::new(default_comparator()));
        let mut edit = VersionEdit::new();
        for n in 1..=3 {
            edit.add_file(0, meta(n, "a", "b"));
        }
        let mut builder = VersionBuilder::new(&base);
        builder.apply(&edit);
        let (v, _) = builder.finish(None, &opts);
        assert_eq!(v.compaction_level(), 0);
        assert!((v.compaction_score() - 1.5).abs() < 1e-9);
    }
}
