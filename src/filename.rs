//! On-disk naming for everything the engine keeps in its directory.
//!
//! ```text
//! <db>/CURRENT            name of the live manifest
//! <db>/MANIFEST-000004    version edits
//! <db>/000012.sst         sorted tables
//! <db>/000007.wal         write-ahead log segments
//! <db>/000013.dbtmp       scratch file for atomic renames
//! <db>/archive/           retired WAL segments (when archiving is on)
//! <db>/lost/              files set aside by repair
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Current,
    Manifest,
    Table,
    Wal,
    Temp,
}

pub const CURRENT: &str = "CURRENT";
pub const ARCHIVE_DIR: &str = "archive";
pub const LOST_DIR: &str = "lost";

pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

pub fn wal_file_name(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.wal"))
}

pub fn manifest_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join(CURRENT)
}

pub fn temp_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.dbtmp"))
}

/// Classifies a bare file name; `None` for anything the engine did not create.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == CURRENT {
        return Some((FileType::Current, 0));
    }
    if let Some(num) = name.strip_prefix("MANIFEST-") {
        return num.parse().ok().map(|n| (FileType::Manifest, n));
    }
    let (stem, ext) = name.split_once('.')?;
    let number = stem.parse().ok()?;
    match ext {
        "sst" => Some((FileType::Table, number)),
        "wal" => Some((FileType::Wal, number)),
        "dbtmp" => Some((FileType::Temp, number)),
        _ => None,
    }
}

/// Every engine file in `dir`, unsorted.
pub fn list_files(dir: &Path) -> Result<Vec<(FileType, u64, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((kind, number)) = parse_file_name(name) {
            out.push((kind, number, entry.path()));
        }
    }
    Ok(out)
}

/// WAL segments in `dir`, oldest first.
pub fn list_wal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut wals: Vec<(u64, PathBuf)> = list_files(dir)?
        .into_iter()
        .filter(|(kind, _, _)| *kind == FileType::Wal)
        .map(|(_, id, path)| (id, path))
        .collect();
    wals.sort_by_key(|(id, _)| *id);
    Ok(wals)
}

/// Points CURRENT at `MANIFEST-<number>` via write-to-temp then rename.
pub fn set_current_file(dir: &Path, manifest_number: u64) -> Result<()> {
    let tmp = temp_file_name(dir, manifest_number);
    {
        let mut file = fs::File::create(&tmp)?;
        writeln!(file, "MANIFEST-{manifest_number:06}")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, current_file_name(dir))?;
    sync_dir(dir)
}

/// Reads CURRENT and returns the manifest number it names.
pub fn read_current_file(dir: &Path) -> Result<u64> {
    let contents = fs::read_to_string(current_file_name(dir))?;
    let name = contents.trim_end_matches('\n');
    match parse_file_name(name) {
        Some((FileType::Manifest, number)) if contents.ends_with('\n') => Ok(number),
        _ => Err(Error::corruption(format!("CURRENT names {name:?}"))),
    }
}

/// Persists directory entries (renames, creations).
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
