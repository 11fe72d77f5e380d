/// Folds a run of merge operands into the value they were written against.
///
/// Operands are passed oldest first. Returning `None` signals a merge
/// failure, which reads and compactions surface as corruption.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &str;

    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Option<Vec<u8>>;

    /// Combines operands without a base value. Operators that cannot do this
    /// return `None` and the operands are kept as written.
    fn partial_merge(&self, _key: &[u8], _operands: &[Vec<u8>]) -> Option<Vec<u8>> {
        None
    }
}

/// Appends each operand to the existing value, separated by a delimiter.
#[derive(Debug, Clone)]
pub struct StringAppendOperator {
    delimiter: Vec<u8>,
}

impl StringAppendOperator {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }

    fn join<'a>(&self, parts: impl Iterator<Item = &'a [u8]>) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, part) in parts.enumerate() {
            if i > 0 {
                out.extend_from_slice(&self.delimiter);
            }
            out.extend_from_slice(part);
        }
        out
    }
}

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "lsmkv.StringAppendOperator"
    }

    fn full_merge(&self, _key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Option<Vec<u8>> {
        Some(self.join(existing.into_iter().chain(operands.iter().map(Vec::as_slice))))
    }

    fn partial_merge(&self, _key: &[u8], operands: &[Vec<u8>]) -> Option<Vec<u8>> {
        Some(self.join(operands.iter().map(Vec::as_slice)))
    }
}
