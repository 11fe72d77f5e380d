use serde::{Deserialize, Serialize};

use crate::types::SequenceNumber;
use crate::version::FileMetaData;

/// One atomic change to the table set, as persisted in the manifest.
///
/// Replaying every edit of a manifest in order rebuilds the current version
/// plus the counters the engine resumes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
    /// Oldest WAL segment whose contents are not yet in a table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_file_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<SequenceNumber>,
    /// (level, file number)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_files: Vec<(usize, u64)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, level: usize, meta: FileMetaData) {
        self.new_files.push((level, meta));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    /// True when the edit changes no table.
    pub fn is_trivial(&self) -> bool {
        self.deleted_files.is_empty() && self.new_files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_omitted() {
        let mut edit = VersionEdit::new();
        edit.log_number = Some(4);
        let json = serde_json::to_string(&edit).unwrap();
        assert_eq!(json, r#"{"log_number":4}"#);
        let back: VersionEdit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, edit);
    }

    #[test]
    fn file_changes_survive_serialization() {
        let mut edit = VersionEdit::new();
        edit.comparator = Some("lsmkv.BytewiseComparator".into());
        edit.delete_file(1, 7);
        edit.add_file(
            2,
            FileMetaData {
                number: 9,
                file_size: 1234,
                smallest: b"a\x01\x00\x00\x00\x00\x00\x00\x00".to_vec(),
                largest: b"z\x01\x00\x00\x00\x00\x00\x00\x00".to_vec(),
                largest_seq: 0,
            },
        );
        let bytes = serde_json::to_vec(&edit).unwrap();
        let back: VersionEdit = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, edit);
        assert!(!back.is_trivial());
    }
}
