//! Best-effort reconstruction of a database whose manifest is lost or
//! damaged.
//!
//! Every WAL segment is replayed (up to its first corruption) into new
//! tables; every existing table is scanned end to end. Whatever reads
//! cleanly is placed at level 0 of a fresh manifest. Old manifests, replayed
//! segments and unreadable tables are moved to `<db>/lost/`, never deleted.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::TableCache;
use crate::db::management::move_to_lost;
use crate::db::open::recover_wal;
use crate::error::{Error, Result};
use crate::filename::{FileType, list_files, table_file_name};
use crate::iterator::StorageIterator;
use crate::options::Options;
use crate::sstable::{SSTable, TableReadOptions};
use crate::types::{SequenceNumber, parse_internal_key};
use crate::version::{FileMetaData, VersionEdit, VersionSet};

pub(crate) fn repair(dir: &Path, options: &Options) -> Result<()> {
    options.validate()?;
    if !dir.is_dir() {
        return Err(Error::invalid_argument(format!("{}: no such directory", dir.display())));
    }
    // Replay stops at the first bad record instead of failing.
    let options = Arc::new(Options {
        paranoid_checks: false,
        ..options.clone()
    });
    let read_options = TableReadOptions {
        comparator: Arc::clone(&options.comparator),
        filter_policy: options.filter_policy.clone(),
        block_cache: None,
    };
    let tables = TableCache::new(dir, read_options.clone(), options.max_open_files);

    let mut table_numbers = Vec::new();
    let mut wals = Vec::new();
    let mut manifests = Vec::new();
    let mut max_number = 0;
    for (kind, number, path) in list_files(dir)? {
        match kind {
            FileType::Table => table_numbers.push(number),
            FileType::Wal => wals.push((number, path)),
            FileType::Manifest => manifests.push(path),
            FileType::Current | FileType::Temp => continue,
        }
        max_number = max_number.max(number);
    }
    table_numbers.sort_unstable();
    wals.sort_by_key(|(id, _)| *id);

    let mut versions = VersionSet::new(dir, Arc::clone(&options), None);
    versions.mark_file_number_used(max_number);
    let mut edit = VersionEdit::new();
    let mut max_sequence: SequenceNumber = 0;

    for (_, path) in &wals {
        match recover_wal(dir, path, &options, &tables, &mut versions, &mut edit) {
            Ok(replay) => max_sequence = max_sequence.max(replay.max_sequence),
            Err(e) => warn!(wal = %path.display(), error = %e, "could not replay WAL segment"),
        }
        move_to_lost(dir, path)?;
    }

    let mut salvaged = 0;
    for number in table_numbers {
        let path = table_file_name(dir, number);
        match scan_table(number, &path, &read_options) {
            Ok(Some((meta, max))) => {
                edit.add_file(0, meta);
                max_sequence = max_sequence.max(max);
                salvaged += 1;
            }
            Ok(None) => {
                warn!(table = number, "setting aside empty table");
                move_to_lost(dir, &path)?;
            }
            Err(e) => {
                warn!(table = number, error = %e, "setting aside unreadable table");
                move_to_lost(dir, &path)?;
            }
        }
    }

    for path in &manifests {
        move_to_lost(dir, path)?;
    }

    let next_wal = wals.last().map_or(0, |(id, _)| id + 1);
    versions.set_last_sequence(max_sequence);
    edit.log_number = Some(next_wal);
    edit.last_sequence = Some(max_sequence);
    versions.write_new_manifest()?;
    versions.log_and_apply(&mut edit)?;

    info!(
        dir = %dir.display(),
        tables = salvaged,
        wals = wals.len(),
        last_sequence = max_sequence,
        "repaired database"
    );
    Ok(())
}

/// Reads every entry of a table. Returns its key range and largest
/// sequence, or `None` when it holds nothing.
fn scan_table(
    number: u64,
    path: &Path,
    options: &TableReadOptions,
) -> Result<Option<(FileMetaData, SequenceNumber)>> {
    let table = Arc::new(SSTable::open(number, path, options)?);
    let mut iter = table.iter(false);
    iter.seek_to_first()?;

    let mut smallest: Option<Vec<u8>> = None;
    let mut largest = Vec::new();
    let mut max_sequence = 0;
    while iter.is_valid() {
        let parsed = parse_internal_key(iter.key())?;
        max_sequence = max_sequence.max(parsed.sequence);
        if smallest.is_none() {
            smallest = Some(iter.key().to_vec());
        }
        largest.clear();
        largest.extend_from_slice(iter.key());
        iter.next()?;
    }
    let Some(smallest) = smallest else {
        return Ok(None);
    };
    let meta = FileMetaData {
        number,
        file_size: table.file_size(),
        smallest,
        largest,
        largest_seq: max_sequence,
    };
    Ok(Some((meta, max_sequence)))
}
