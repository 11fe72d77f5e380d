//! Compaction: SELECT (picker) → MERGE (job) → INSTALL (version edit) →
//! CLEANUP (obsolete handles drop).

pub mod job;
pub mod picker;
pub mod scheduler;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::options::Options;
use crate::version::{TableFile, Version, VersionEdit, total_file_size};

pub use job::{CompactionJob, CompactionOutput};
pub use picker::{pick_compaction, range_compaction};
pub use scheduler::{Job, JobQueue, Scheduler};

/// Why a compaction was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionReason {
    /// A level exceeded its size (or level-0 file count) budget.
    Size,
    /// A table absorbed too many wasted seeks.
    Seek,
    /// `compact_range` asked for it.
    Manual,
}

/// One level-L → level-L+1 compaction.
pub struct Compaction {
    level: usize,
    reason: CompactionReason,
    /// `inputs[0]` at `level`, `inputs[1]` at `level + 1`.
    inputs: [Vec<Arc<TableFile>>; 2],
    /// Level `level + 2` tables overlapping the compaction range.
    grandparents: Vec<Arc<TableFile>>,
    input_version: Arc<Version>,
    max_output_file_size: u64,
    max_grandparent_overlap_bytes: u64,

    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,
    /// Per-level cursor for `is_base_level_for_key`; keys arrive in order.
    level_ptrs: Vec<usize>,
}

impl Compaction {
    pub(crate) fn new(
        version: Arc<Version>,
        level: usize,
        reason: CompactionReason,
        options: &Options,
    ) -> Self {
        let num_levels = version.num_levels();
        let target = options.target_file_size(level);
        Self {
            level,
            reason,
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            input_version: version,
            max_output_file_size: target,
            max_grandparent_overlap_bytes: options.max_grandparent_overlap_factor.saturating_mul(target),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: vec![0; num_levels],
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    pub fn reason(&self) -> CompactionReason {
        self.reason
    }

    pub fn inputs(&self, which: usize) -> &[Arc<TableFile>] {
        &self.inputs[which]
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn input_version(&self) -> &Arc<Version> {
        &self.input_version
    }

    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    pub fn input_bytes(&self) -> u64 {
        total_file_size(&self.inputs[0]) + total_file_size(&self.inputs[1])
    }

    /// A single input with nothing to merge against can move down by a
    /// manifest edit alone. Manual compactions always rewrite.
    pub fn is_trivial_move(&self) -> bool {
        self.reason != CompactionReason::Manual
            && self.inputs[0].len() == 1
            && self.inputs[1].is_empty()
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap_bytes
    }

    /// Records the removal of every input table.
    pub fn add_input_deletions(&self, edit: &mut VersionEdit) {
        for (which, files) in self.inputs.iter().enumerate() {
            for f in files {
                edit.delete_file(self.level + which, f.number());
            }
        }
    }

    /// True when no level below the output can hold `user_key`, so a
    /// tombstone for it has nothing left to shadow.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let version = Arc::clone(&self.input_version);
        let ucmp = version.icmp().user_comparator();
        for level in self.level + 2..version.num_levels() {
            let files = version.files(level);
            while self.level_ptrs[level] < files.len() {
                let f = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, f.largest_user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, f.smallest_user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// True when the output should be cut before `internal_key` to bound
    /// how much of the grandparent level a future compaction will touch.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        let icmp = self.input_version.icmp().clone();
        while self.grandparent_index < self.grandparents.len()
            && icmp.compare(internal_key, self.grandparents[self.grandparent_index].largest()) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size();
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;
        if self.overlapped_bytes > self.max_grandparent_overlap_bytes {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}
