//! Introspection: named properties, counters and size estimates.

use std::fmt::Write as _;
use std::time::Duration;

use crate::db::DbInner;
use crate::types::{MAX_SEQUENCE_NUMBER, lookup_key};

/// Per-level table layout and compaction counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub files: usize,
    pub bytes: u64,
    /// Flushes and compactions that wrote into this level.
    pub compactions: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub micros: u64,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub levels: Vec<LevelStats>,
    pub flushes: u64,
    /// Writes delayed by the level-0 slowdown trigger.
    pub write_slowdowns: u64,
    /// Backpressure waits at the level-0 stop trigger.
    pub write_stops: u64,
    pub memtable_bytes: usize,
    pub immutable_memtables: usize,
    pub last_sequence: u64,
    pub snapshots: usize,
}

/// Counters the engine updates as it works.
#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    levels: Vec<LevelStats>,
    pub flushes: u64,
    pub write_slowdowns: u64,
    pub write_stops: u64,
}

impl EngineStats {
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![LevelStats::default(); num_levels],
            ..Self::default()
        }
    }

    /// Charges one flush or compaction to its output level.
    pub fn record(&mut self, level: usize, bytes_read: u64, bytes_written: u64, elapsed: Duration) {
        if let Some(s) = self.levels.get_mut(level) {
            s.compactions += 1;
            s.bytes_read += bytes_read;
            s.bytes_written += bytes_written;
            s.micros += elapsed.as_micros() as u64;
        }
    }
}

const PREFIX: &str = "lsmkv.";

impl DbInner {
    pub(crate) fn stats(&self) -> Stats {
        let state = self.current_state();
        let counters = self.stats.lock();
        let levels = counters
            .levels
            .iter()
            .enumerate()
            .map(|(level, s)| LevelStats {
                files: state.version.num_files(level),
                bytes: state.version.level_bytes(level),
                ..s.clone()
            })
            .collect();
        Stats {
            levels,
            flushes: counters.flushes,
            write_slowdowns: counters.write_slowdowns,
            write_stops: counters.write_stops,
            memtable_bytes: state.mem.size() + state.imms.iter().map(|m| m.size()).sum::<usize>(),
            immutable_memtables: state.imms.len(),
            last_sequence: self.seq.last_sequence(),
            snapshots: self.seq.num_snapshots(),
        }
    }

    pub(crate) fn property(&self, name: &str) -> Option<String> {
        let name = name.strip_prefix(PREFIX)?;
        let state = self.current_state();

        if let Some(level) = name.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            if level >= state.version.num_levels() {
                return None;
            }
            return Some(state.version.num_files(level).to_string());
        }

        match name {
            "stats" => Some(self.stats_report()),
            "sstables" => Some(state.version.debug_string()),
            "approximate-memory-usage" => {
                let mem = state.mem.size() + state.imms.iter().map(|m| m.size()).sum::<usize>();
                let cached = self.tables.block_cache().map_or(0, |c| c.weighted_size());
                Some((mem as u64 + cached).to_string())
            }
            "num-immutable-mem-table" => Some(state.imms.len().to_string()),
            "num-snapshots" => Some(self.seq.num_snapshots().to_string()),
            "last-sequence" => Some(self.seq.last_sequence().to_string()),
            _ => None,
        }
    }

    fn stats_report(&self) -> String {
        let stats = self.stats();
        let mut out = String::new();
        let _ = writeln!(out, "                               Compactions");
        let _ = writeln!(out, "Level  Files Size(MB) Time(sec) Read(MB) Write(MB)");
        let _ = writeln!(out, "--------------------------------------------------");
        const MB: f64 = 1048576.0;
        for (level, s) in stats.levels.iter().enumerate() {
            if s.files == 0 && s.compactions == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "{:>3} {:>8} {:>8.0} {:>9.0} {:>8.0} {:>9.0}",
                level,
                s.files,
                s.bytes as f64 / MB,
                s.micros as f64 / 1e6,
                s.bytes_read as f64 / MB,
                s.bytes_written as f64 / MB,
            );
        }
        let _ = writeln!(
            out,
            "flushes: {}  slowdowns: {}  stops: {}",
            stats.flushes, stats.write_slowdowns, stats.write_stops
        );
        out
    }

    /// Bytes of table data between the two user keys of each range.
    /// Memtable contents are not counted.
    pub(crate) fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        let version = self.current_state().version.clone();
        ranges
            .iter()
            .map(|(start, limit)| {
                let start = version.approximate_offset_of(&lookup_key(start, MAX_SEQUENCE_NUMBER), &self.tables);
                let limit = version.approximate_offset_of(&lookup_key(limit, MAX_SEQUENCE_NUMBER), &self.tables);
                limit.saturating_sub(start)
            })
            .collect()
    }
}
