use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use tracing::{info, warn};

use crate::cache::TableCache;
use crate::compaction::Compaction;
use crate::error::{Error, Result};
use crate::filename::table_file_name;
use crate::iterator::{LevelIterator, MergingIterator, StorageIterator};
use crate::merge_operator::MergeOperator;
use crate::options::Options;
use crate::sstable::SSTableBuilder;
use crate::types::{SequenceNumber, ValueType, encode_internal_key, parse_internal_key};
use crate::version::FileMetaData;

/// One stored version of a user key: (sequence, type, value).
pub(crate) type KeyVersion = (SequenceNumber, ValueType, Vec<u8>);

/// What a finished merge produced.
#[derive(Debug, Default)]
pub struct CompactionOutput {
    pub files: Vec<FileMetaData>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub entries_in: u64,
    pub entries_out: u64,
}

/// Runs the MERGE step of a compaction: reads every input through one
/// merging iterator and writes the surviving entries to new tables at the
/// output level.
pub struct CompactionJob<'a> {
    dir: &'a Path,
    options: &'a Options,
    tables: &'a Arc<TableCache>,
    smallest_snapshot: SequenceNumber,
    allocate_file_number: &'a (dyn Fn() -> u64 + Sync),
    shutting_down: &'a AtomicBool,
}

struct OpenOutput {
    number: u64,
    builder: SSTableBuilder,
}

impl<'a> CompactionJob<'a> {
    pub fn new(
        dir: &'a Path,
        options: &'a Options,
        tables: &'a Arc<TableCache>,
        smallest_snapshot: SequenceNumber,
        allocate_file_number: &'a (dyn Fn() -> u64 + Sync),
        shutting_down: &'a AtomicBool,
    ) -> Self {
        Self {
            dir,
            options,
            tables,
            smallest_snapshot,
            allocate_file_number,
            shutting_down,
        }
    }

    pub fn run(&self, c: &mut Compaction) -> Result<CompactionOutput> {
        let mut output = CompactionOutput {
            bytes_read: c.input_bytes(),
            ..CompactionOutput::default()
        };
        let mut current: Option<OpenOutput> = None;

        let result = self.merge(c, &mut output, &mut current);
        if let Err(e) = result {
            if let Some(open) = current.take() {
                let _ = open.builder.abandon();
            }
            for meta in &output.files {
                let _ = std::fs::remove_file(table_file_name(self.dir, meta.number));
            }
            return Err(e);
        }

        info!(
            level = c.level(),
            inputs0 = c.num_input_files(0),
            inputs1 = c.num_input_files(1),
            outputs = output.files.len(),
            bytes_read = output.bytes_read,
            bytes_written = output.bytes_written,
            dropped = output.entries_in - output.entries_out,
            "compaction merged"
        );
        Ok(output)
    }

    fn merge(
        &self,
        c: &mut Compaction,
        output: &mut CompactionOutput,
        current: &mut Option<OpenOutput>,
    ) -> Result<()> {
        let mut iter = self.input_iterator(c)?;
        let ucmp = Arc::clone(c.input_version().icmp().user_comparator());
        iter.seek_to_first()?;

        let mut user_key: Vec<u8> = Vec::new();
        let mut versions: Vec<KeyVersion> = Vec::new();
        while iter.is_valid() {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                return Err(Error::ShutdownInProgress);
            }
            let parsed = parse_internal_key(iter.key())?;
            if !versions.is_empty() && ucmp.compare(parsed.user_key, &user_key) != Ordering::Equal {
                let group = std::mem::take(&mut versions);
                self.emit(c, &user_key, group, output, current)?;
            }
            if versions.is_empty() {
                user_key.clear();
                user_key.extend_from_slice(parsed.user_key);
            }
            versions.push((parsed.sequence, parsed.value_type, iter.value().to_vec()));
            output.entries_in += 1;
            iter.next()?;
        }
        if !versions.is_empty() {
            self.emit(c, &user_key, versions, output, current)?;
        }
        if let Some(open) = current.take() {
            self.finish_output(open, output)?;
        }
        Ok(())
    }

    fn input_iterator(&self, c: &Compaction) -> Result<MergingIterator> {
        let icmp = c.input_version().icmp().clone();
        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        for which in 0..2 {
            let files = c.inputs(which);
            if files.is_empty() {
                continue;
            }
            if c.level() + which == 0 {
                for f in files {
                    let table = self.tables.find_table(f.number())?;
                    children.push(Box::new(table.iter(false)));
                }
            } else {
                children.push(Box::new(LevelIterator::new(
                    files.to_vec(),
                    Arc::clone(self.tables),
                    icmp.clone(),
                    false,
                )));
            }
        }
        Ok(MergingIterator::new(children, Arc::new(icmp)))
    }

    /// Writes the surviving versions of one user key. A key's versions
    /// always land in the same output table.
    fn emit(
        &self,
        c: &mut Compaction,
        user_key: &[u8],
        versions: Vec<KeyVersion>,
        output: &mut CompactionOutput,
        current: &mut Option<OpenOutput>,
    ) -> Result<()> {
        let base_level = c.is_base_level_for_key(user_key);
        let kept = collapse_versions(
            user_key,
            versions,
            self.smallest_snapshot,
            base_level,
            self.options.merge_operator.as_deref(),
        );
        if kept.is_empty() {
            return Ok(());
        }

        let first_key = encode_internal_key(user_key, kept[0].0, kept[0].1);
        if current.is_some() && c.should_stop_before(&first_key) {
            if let Some(open) = current.take() {
                self.finish_output(open, output)?;
            }
        }

        if current.is_none() {
            let number = (self.allocate_file_number)();
            let builder = SSTableBuilder::new(
                &table_file_name(self.dir, number),
                self.options.table_options(c.output_level()),
            )?;
            *current = Some(OpenOutput { number, builder });
        }
        let mut full = false;
        if let Some(open) = current.as_mut() {
            for (sequence, value_type, value) in &kept {
                open.builder
                    .add(&encode_internal_key(user_key, *sequence, *value_type), value)?;
            }
            output.entries_out += kept.len() as u64;
            full = open.builder.file_size() >= c.max_output_file_size();
        }
        if full {
            if let Some(open) = current.take() {
                self.finish_output(open, output)?;
            }
        }
        Ok(())
    }

    fn finish_output(&self, open: OpenOutput, output: &mut CompactionOutput) -> Result<()> {
        let built = open.builder.finish()?;
        // Make sure the table is readable before it is installed.
        if let Err(e) = self.tables.find_table(open.number) {
            warn!(table = open.number, error = %e, "compaction output unreadable");
            let _ = std::fs::remove_file(table_file_name(self.dir, open.number));
            return Err(e);
        }
        output.bytes_written += built.file_size;
        output.files.push(FileMetaData {
            number: open.number,
            file_size: built.file_size,
            smallest: built.smallest,
            largest: built.largest,
            largest_seq: built.largest_seq,
        });
        Ok(())
    }
}

/// Decides which versions of one user key (newest first) survive.
///
/// Versions newer than the oldest snapshot are all kept. Of the rest only
/// the newest matters, since every reader sees it or something newer:
/// - a Put is kept,
/// - a Delete is kept unless no deeper level can hold the key,
/// - a run of Merge operands is folded into the Put or Delete beneath it
///   (or into nothing at the base level) with a full merge, otherwise
///   combined by a partial merge, otherwise kept as written.
pub(crate) fn collapse_versions(
    user_key: &[u8],
    mut versions: Vec<KeyVersion>,
    smallest_snapshot: SequenceNumber,
    base_level: bool,
    merge_operator: Option<&dyn MergeOperator>,
) -> Vec<KeyVersion> {
    let split = versions
        .iter()
        .position(|(sequence, ..)| *sequence <= smallest_snapshot)
        .unwrap_or(versions.len());
    let mut rest = versions.split_off(split);
    let mut out = versions;
    if rest.is_empty() {
        return out;
    }

    match rest[0].1 {
        ValueType::Put => {
            rest.truncate(1);
            out.append(&mut rest);
        }
        ValueType::Delete => {
            if !base_level {
                rest.truncate(1);
                out.append(&mut rest);
            }
        }
        ValueType::Merge => {
            let num_operands = rest.iter().take_while(|(_, t, _)| *t == ValueType::Merge).count();
            let base_type = rest.get(num_operands).map(|(_, t, _)| *t);
            let keep = num_operands + usize::from(base_type.is_some());
            rest.truncate(keep);

            if let Some(op) = merge_operator {
                let top_sequence = rest[0].0;
                let operands: Vec<Vec<u8>> =
                    rest[..num_operands].iter().rev().map(|(_, _, v)| v.clone()).collect();
                let existing: Option<Option<&[u8]>> = match base_type {
                    Some(ValueType::Put) => Some(Some(rest[num_operands].2.as_slice())),
                    Some(_) => Some(None),
                    None if base_level => Some(None),
                    None => None,
                };
                let folded = match existing {
                    Some(existing) => op
                        .full_merge(user_key, existing, &operands)
                        .map(|v| (top_sequence, ValueType::Put, v)),
                    None if operands.len() >= 2 => op
                        .partial_merge(user_key, &operands)
                        .map(|v| (top_sequence, ValueType::Merge, v)),
                    None => None,
                };
                if let Some(folded) = folded {
                    out.push(folded);
                    return out;
                }
            }
            out.append(&mut rest);
        }
    }
    out
}
