use std::cmp::Ordering;
use std::sync::Arc;

use rand::Rng;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::error::Result;
use crate::iterator::StorageIterator;

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Each level is kept with probability 1/BRANCHING.
const BRANCHING: u32 = 4;

/// Index of the head sentinel in the arena.
const HEAD: usize = 0;

/// Per-level pointer cost charged to `size_bytes`.
const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// A single node in the skip list.
///
/// Each node has `height` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
///
/// Nodes live in an arena (`SkipList::nodes`) and link by index, so node
/// positions stay stable while the arena grows and no unsafe is needed.
struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted data structure.
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
/// Worst case is O(n), vanishingly unlikely with random level assignment.
///
/// Order comes from the comparator supplied at construction; the memtable
/// passes an internal key comparator, tests and tools use bytewise order.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
    cmp: Arc<dyn Comparator>,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    /// Create a new empty skip list ordered bytewise.
    pub fn new() -> Self {
        Self::with_comparator(Arc::new(BytewiseComparator))
    }

    pub fn with_comparator(cmp: Arc<dyn Comparator>) -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
            cmp,
        }
    }

    /// Insert a key-value pair. Overwrites if key already exists.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node (coin flip per level)
    ///   3. Create node with that height
    ///   4. Splice into the list at each level up to the node's height
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut prev = [HEAD; MAX_HEIGHT];
        if let Some(found) = self.find_greater_or_equal(&key, Some(&mut prev)) {
            if self.cmp.compare(&self.nodes[found].key, &key) == Ordering::Equal {
                // Size only grows; the old value's bytes are not reclaimed.
                self.size_bytes += value.len();
                self.nodes[found].value = value;
                return;
            }
        }

        let height = self.random_height();
        if height > self.height {
            for slot in prev.iter_mut().take(height).skip(self.height) {
                *slot = HEAD;
            }
            self.height = height;
        }

        let idx = self.nodes.len();
        self.size_bytes += key.len() + value.len() + height * POINTER_SIZE;
        let mut node = SkipNode {
            key,
            value,
            forward: vec![None; height],
        };
        for (level, &p) in prev.iter().enumerate().take(height) {
            node.forward[level] = self.nodes[p].forward[level];
        }
        self.nodes.push(node);
        for (level, &p) in prev.iter().enumerate().take(height) {
            self.nodes[p].forward[level] = Some(idx);
        }
        self.len += 1;
    }

    /// Look up a key. Returns the value if found.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let idx = self.find_greater_or_equal(key, None)?;
        let node = &self.nodes[idx];
        (self.cmp.compare(&node.key, key) == Ordering::Equal).then_some(node.value.as_slice())
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Create an iterator positioned at the first entry.
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            node: self.first(),
        }
    }

    /// Generate a random level for a new node.
    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }

    /// First node with key >= target; fills `prev` with the predecessor at
    /// each level when requested.
    fn find_greater_or_equal(
        &self,
        key: &[u8],
        mut prev: Option<&mut [usize; MAX_HEIGHT]>,
    ) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            let next = self.nodes[x].forward[level];
            match next {
                Some(n) if self.cmp.compare(&self.nodes[n].key, key) == Ordering::Less => x = n,
                _ => {
                    if let Some(p) = prev.as_deref_mut() {
                        p[level] = x;
                    }
                    if level == 0 {
                        return next;
                    }
                    level -= 1;
                }
            }
        }
    }

    /// Last node with key < target, `None` when that is the head.
    fn find_less_than(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            match self.nodes[x].forward[level] {
                Some(n) if self.cmp.compare(&self.nodes[n].key, key) == Ordering::Less => x = n,
                _ => {
                    if level == 0 {
                        return (x != HEAD).then_some(x);
                    }
                    level -= 1;
                }
            }
        }
    }

    fn find_last(&self) -> Option<usize> {
        let mut x = HEAD;
        let mut level = self.height - 1;
        loop {
            match self.nodes[x].forward[level] {
                Some(n) => x = n,
                None => {
                    if level == 0 {
                        return (x != HEAD).then_some(x);
                    }
                    level -= 1;
                }
            }
        }
    }

    // Position-based cursor primitives. Indices stay valid for the lifetime
    // of the list because nodes are never removed.

    pub(crate) fn first(&self) -> Option<usize> {
        self.nodes[HEAD].forward[0]
    }

    pub(crate) fn last(&self) -> Option<usize> {
        self.find_last()
    }

    pub(crate) fn next_of(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].forward[0]
    }

    pub(crate) fn prev_of(&self, idx: usize) -> Option<usize> {
        self.find_less_than(&self.nodes[idx].key)
    }

    pub(crate) fn seek(&self, key: &[u8]) -> Option<usize> {
        self.find_greater_or_equal(key, None)
    }

    pub(crate) fn entry(&self, idx: usize) -> (&[u8], &[u8]) {
        let node = &self.nodes[idx];
        (&node.key, &node.value)
    }
}

/// Iterator over skip list entries in sorted order.
///
/// Forward steps follow level 0 pointers; backward steps search for the
/// predecessor from the top, like LevelDB's skip list.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    node: Option<usize>,
}

impl StorageIterator for SkipListIterator<'_> {
    fn key(&self) -> &[u8] {
        self.node.map_or(&[][..], |n| self.list.entry(n).0)
    }

    fn value(&self) -> &[u8] {
        self.node.map_or(&[][..], |n| self.list.entry(n).1)
    }

    fn is_valid(&self) -> bool {
        self.node.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(n) = self.node {
            self.node = self.list.next_of(n);
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(n) = self.node {
            self.node = self.list.prev_of(n);
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.node = self.list.seek(key);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.node = self.list.first();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.node = self.list.last();
        Ok(())
    }
}
