use std::cmp::Ordering;
use std::sync::Arc;

use crate::types::{INTERNAL_KEY_TRAILER, extract_user_key};

/// A strict total order over user keys.
///
/// The name is persisted with the data; reopening a database with a
/// comparator of a different name is rejected.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
    fn name(&self) -> &str;
}

/// Byte-lexicographic order. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "lsmkv.BytewiseComparator"
    }
}

pub fn default_comparator() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

/// Orders encoded internal keys: user key ascending through the wrapped
/// comparator, then the `(sequence << 8) | type` trailer descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    pub fn compare_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }
}

impl std::fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

fn trailer(key: &[u8]) -> u64 {
    if key.len() < INTERNAL_KEY_TRAILER {
        return 0;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&key[key.len() - INTERNAL_KEY_TRAILER..]);
    u64::from_le_bytes(raw)
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user
            .compare(extract_user_key(a), extract_user_key(b))
            .then_with(|| trailer(b).cmp(&trailer(a)))
    }

    fn name(&self) -> &str {
        "lsmkv.InternalKeyComparator"
    }
}
