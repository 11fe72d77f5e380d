//! Point-lookup accumulator threaded through memtables, tables and levels.
//!
//! Sources are visited newest first and feed every version of the user key
//! they hold (sequence descending). The state stops the search as soon as a
//! Put or Delete is reached; merge operands collected on the way are folded
//! into that base at the end.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::merge_operator::MergeOperator;
use crate::types::{SequenceNumber, ValueType, lookup_key};

pub struct LookupState {
    user_key: Vec<u8>,
    lookup_key: Vec<u8>,
    sequence: SequenceNumber,
    /// Newest first, as encountered.
    operands: Vec<Vec<u8>>,
    /// `Some(Some(v))` after a Put, `Some(None)` after a Delete.
    base: Option<Option<Vec<u8>>>,
    merge_operator: Option<Arc<dyn MergeOperator>>,
}

impl LookupState {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        Self {
            user_key: user_key.to_vec(),
            lookup_key: lookup_key(user_key, sequence),
            sequence,
            operands: Vec::new(),
            base: None,
            merge_operator: None,
        }
    }

    pub fn with_merge_operator(mut self, op: Option<Arc<dyn MergeOperator>>) -> Self {
        self.merge_operator = op;
        self
    }

    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Internal key positioned at the newest visible version of the user key.
    pub fn lookup_key(&self) -> &[u8] {
        &self.lookup_key
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn is_done(&self) -> bool {
        self.base.is_some()
    }

    /// Feeds one visible version. Returns true once older versions can no
    /// longer change the result.
    pub fn add(&mut self, value_type: ValueType, value: &[u8]) -> bool {
        if self.is_done() {
            return true;
        }
        match value_type {
            ValueType::Put => self.base = Some(Some(value.to_vec())),
            ValueType::Delete => self.base = Some(None),
            ValueType::Merge => self.operands.push(value.to_vec()),
        }
        self.is_done()
    }

    /// Resolves the lookup, applying the merge operator to pending operands.
    pub fn finish(mut self) -> Result<Option<Vec<u8>>> {
        let base = self.base.take().flatten();
        if self.operands.is_empty() {
            return Ok(base);
        }
        let Some(op) = self.merge_operator.as_ref() else {
            return Err(Error::invalid_argument(
                "merge operands found but no merge operator is configured",
            ));
        };
        self.operands.reverse();
        op.full_merge(&self.user_key, base.as_deref(), &self.operands)
            .map(Some)
            .ok_or_else(|| Error::corruption("merge operator failed"))
    }
}
