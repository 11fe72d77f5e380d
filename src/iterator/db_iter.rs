use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::{MergingIterator, StorageIterator};
use crate::lookup::LookupState;
use crate::merge_operator::MergeOperator;
use crate::types::{MAX_SEQUENCE_NUMBER, SequenceNumber, ValueType, lookup_key, parse_internal_key};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The internal cursor sits on the first entry after the current user key.
    Forward,
    /// The internal cursor sits on the last entry before the current user key.
    Reverse,
}

/// User-facing cursor over the merged view of memtables and tables.
///
/// Yields each user key once, with the newest value visible at the read
/// sequence. Tombstoned keys are skipped and merge operands are resolved
/// against their base value. Keys and values returned are user bytes.
///
/// The iterator keeps the version it was created from alive, so the tables
/// it reads cannot be deleted underneath it.
pub struct DBIterator {
    iter: MergingIterator,
    sequence: SequenceNumber,
    ucmp: Arc<dyn Comparator>,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    /// Keys outside this prefix end the iteration in either direction.
    prefix: Option<Vec<u8>>,
    _version: Option<Arc<Version>>,
}

impl DBIterator {
    pub fn new(
        iter: MergingIterator,
        sequence: SequenceNumber,
        ucmp: Arc<dyn Comparator>,
        merge_operator: Option<Arc<dyn MergeOperator>>,
        version: Option<Arc<Version>>,
    ) -> Self {
        Self {
            iter,
            sequence,
            ucmp,
            merge_operator,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            prefix: None,
            _version: version,
        }
    }

    /// Bounds the iterator to keys starting with `prefix`. Keys sharing a
    /// prefix must sort together under the comparator, as they do bytewise.
    pub fn with_prefix(mut self, prefix: Option<Vec<u8>>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    fn in_prefix(&self, user_key: &[u8]) -> bool {
        self.prefix.as_deref().is_none_or(|p| user_key.starts_with(p))
    }

    /// Read ceiling this iterator was created with.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Folds one user key's visible versions (newest first) into its value.
    /// `None` means the key is deleted at this sequence.
    fn resolve<'a>(
        &self,
        user_key: &[u8],
        versions: impl Iterator<Item = (ValueType, &'a [u8])>,
    ) -> Result<Option<Vec<u8>>> {
        let mut state =
            LookupState::new(user_key, self.sequence).with_merge_operator(self.merge_operator.clone());
        for (value_type, value) in versions {
            if state.add(value_type, value) {
                break;
            }
        }
        state.finish()
    }

    /// Starting at the internal cursor, finds the next user key with a live
    /// value and leaves the cursor past all of that key's entries.
    fn find_next_user_entry(&mut self) -> Result<()> {
        while self.iter.is_valid() {
            let parsed = parse_internal_key(self.iter.key())?;
            if !self.in_prefix(parsed.user_key) {
                break;
            }
            if parsed.sequence > self.sequence {
                self.iter.next()?;
                continue;
            }
            let user_key = parsed.user_key.to_vec();
            let mut versions: Vec<(ValueType, Vec<u8>)> = Vec::new();
            let mut complete = false;
            while self.iter.is_valid() {
                let parsed = parse_internal_key(self.iter.key())?;
                if self.ucmp.compare(parsed.user_key, &user_key) != Ordering::Equal {
                    break;
                }
                // Entries past a Put or Delete cannot change the result.
                if !complete {
                    complete = parsed.value_type != ValueType::Merge;
                    versions.push((parsed.value_type, self.iter.value().to_vec()));
                }
                self.iter.next()?;
            }
            let resolved =
                self.resolve(&user_key, versions.iter().map(|(t, v)| (*t, v.as_slice())))?;
            if let Some(value) = resolved {
                self.saved_key = user_key;
                self.saved_value = value;
                self.valid = true;
                return Ok(());
            }
        }
        self.valid = false;
        Ok(())
    }

    /// Walking backwards from the internal cursor, finds the previous user key
    /// with a live value and leaves the cursor before all of its entries.
    fn find_prev_user_entry(&mut self) -> Result<()> {
        // Visible versions of `pending_key`, oldest first.
        let mut pending: Vec<(ValueType, Vec<u8>)> = Vec::new();
        let mut pending_key: Vec<u8> = Vec::new();
        while self.iter.is_valid() {
            let parsed = parse_internal_key(self.iter.key())?;
            if !self.in_prefix(parsed.user_key) {
                break;
            }
            if parsed.sequence <= self.sequence {
                if !pending.is_empty()
                    && self.ucmp.compare(parsed.user_key, &pending_key) != Ordering::Equal
                {
                    let resolved = self.resolve(
                        &pending_key,
                        pending.iter().rev().map(|(t, v)| (*t, v.as_slice())),
                    )?;
                    if let Some(value) = resolved {
                        self.saved_key = pending_key;
                        self.saved_value = value;
                        self.valid = true;
                        return Ok(());
                    }
                    pending.clear();
                }
                if pending.is_empty() {
                    pending_key = parsed.user_key.to_vec();
                }
                pending.push((parsed.value_type, self.iter.value().to_vec()));
            }
            self.iter.prev()?;
        }
        if !pending.is_empty() {
            let resolved = self.resolve(
                &pending_key,
                pending.iter().rev().map(|(t, v)| (*t, v.as_slice())),
            )?;
            if let Some(value) = resolved {
                self.saved_key = pending_key;
                self.saved_value = value;
                self.valid = true;
                return Ok(());
            }
        }
        self.valid = false;
        Ok(())
    }
}

/// Smallest byte string greater than every key starting with `prefix`.
/// `None` when the prefix is all `0xff`, which nothing sorts after.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let end = prefix.iter().rposition(|&b| b != 0xff)?;
    let mut limit = prefix[..=end].to_vec();
    limit[end] += 1;
    Some(limit)
}

impl StorageIterator for DBIterator {
    fn key(&self) -> &[u8] {
        if self.valid { self.saved_key.as_slice() } else { &[] }
    }

    fn value(&self) -> &[u8] {
        if self.valid { self.saved_value.as_slice() } else { &[] }
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Reverse {
            // Step over the entries of the current key.
            if self.iter.is_valid() {
                self.iter.next()?;
            } else {
                self.iter.seek_to_first()?;
            }
            while self.iter.is_valid() {
                let parsed = parse_internal_key(self.iter.key())?;
                if self.ucmp.compare(parsed.user_key, &self.saved_key) == Ordering::Greater {
                    break;
                }
                self.iter.next()?;
            }
            self.direction = Direction::Forward;
        }
        self.find_next_user_entry()
    }

    fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Forward {
            if self.iter.is_valid() {
                self.iter.prev()?;
            } else {
                self.iter.seek_to_last()?;
            }
            while self.iter.is_valid() {
                let parsed = parse_internal_key(self.iter.key())?;
                if self.ucmp.compare(parsed.user_key, &self.saved_key) == Ordering::Less {
                    break;
                }
                self.iter.prev()?;
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }

    /// `key` is a user key. Targets ahead of the prefix start at the prefix.
    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.direction = Direction::Forward;
        let target = match self.prefix.as_deref() {
            Some(p) if self.ucmp.compare(key, p) == Ordering::Less => p,
            _ => key,
        };
        self.iter.seek(&lookup_key(target, self.sequence))?;
        self.find_next_user_entry()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.direction = Direction::Forward;
        match self.prefix.clone() {
            Some(p) => self.iter.seek(&lookup_key(&p, MAX_SEQUENCE_NUMBER))?,
            None => self.iter.seek_to_first()?,
        }
        self.find_next_user_entry()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        match self.prefix.as_deref().and_then(prefix_successor) {
            Some(limit) => {
                // Last entry before the first key past the prefix.
                self.iter.seek(&lookup_key(&limit, MAX_SEQUENCE_NUMBER))?;
                if self.iter.is_valid() {
                    self.iter.prev()?;
                } else {
                    self.iter.seek_to_last()?;
                }
            }
            None => self.iter.seek_to_last()?,
        }
        self.find_prev_user_entry()
    }
}
