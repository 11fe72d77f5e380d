use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::StorageIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + all SSTable levels
/// - Compaction (merging SSTables)
///
/// Children are ordered by priority: index 0 = newest source. Every entry of
/// every child is yielded; shadowing by sequence number is left to the
/// layer above, which sees equal user keys newest-first because the
/// internal key comparator orders them by descending sequence.
///
/// Children are scanned linearly to find the current entry. The number of
/// sources is small (memtables, L0 files, one per deeper level), so a heap
/// would buy little and complicates switching direction.
pub struct MergingIterator {
    children: Vec<Box<dyn StorageIterator>>,
    cmp: Arc<dyn Comparator>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    /// `cmp` orders child keys; below the DB iterator that is the internal
    /// key comparator. The iterator starts unpositioned.
    pub fn new(children: Vec<Box<dyn StorageIterator>>, cmp: Arc<dyn Comparator>) -> Self {
        Self {
            children,
            cmp,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.is_valid() {
                continue;
            }
            match smallest {
                Some(s) if self.cmp.compare(child.key(), self.children[s].key()) != Ordering::Less => {}
                _ => smallest = Some(i),
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.is_valid() {
                continue;
            }
            match largest {
                Some(l) if self.cmp.compare(child.key(), self.children[l].key()) != Ordering::Greater => {}
                _ => largest = Some(i),
            }
        }
        self.current = largest;
    }
}

impl StorageIterator for MergingIterator {
    fn key(&self) -> &[u8] {
        self.current.map_or(&[][..], |i| self.children[i].key())
    }

    fn value(&self) -> &[u8] {
        self.current.map_or(&[][..], |i| self.children[i].value())
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        let Some(cur) = self.current else {
            return Ok(());
        };

        // After moving backwards the other children sit before key(); move
        // each to the first entry after it.
        if self.direction != Direction::Forward {
            let key = self.children[cur].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == cur {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() && self.cmp.compare(&key, child.key()) == Ordering::Equal {
                    child.next()?;
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[cur].next()?;
        self.find_smallest();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(cur) = self.current else {
            return Ok(());
        };

        // Mirror image of next(): every other child moves to the last entry
        // before key().
        if self.direction != Direction::Reverse {
            let key = self.children[cur].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == cur {
                    continue;
                }
                child.seek(&key)?;
                if child.is_valid() {
                    child.prev()?;
                } else {
                    child.seek_to_last()?;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[cur].prev()?;
        self.find_largest();
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(key)?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.direction = Direction::Forward;
        self.find_smallest();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_last()?;
        }
        self.direction = Direction::Reverse;
        self.find_largest();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    /// Sorted in-memory source for exercising the merge logic.
    struct VecIter {
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        pos: Option<usize>,
    }

    impl VecIter {
        fn boxed(entries: &[(&str, &str)]) -> Box<dyn StorageIterator> {
            Box::new(VecIter {
                entries: entries
                    .iter()
                    .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
                    .collect(),
                pos: None,
            })
        }
    }

    impl StorageIterator for VecIter {
        fn key(&self) -> &[u8] {
            self.pos.map_or(&[][..], |p| &self.entries[p].0)
        }
        fn value(&self) -> &[u8] {
            self.pos.map_or(&[][..], |p| &self.entries[p].1)
        }
        fn is_valid(&self) -> bool {
            self.pos.is_some()
        }
        fn next(&mut self) -> Result<()> {
            self.pos = self.pos.map(|p| p + 1).filter(|&p| p < self.entries.len());
            Ok(())
        }
        fn prev(&mut self) -> Result<()> {
            self.pos = self.pos.and_then(|p| p.checked_sub(1));
            Ok(())
        }
        fn seek(&mut self, key: &[u8]) -> Result<()> {
            self.pos = self.entries.iter().position(|(k, _)| k.as_slice() >= key);
            Ok(())
        }
        fn seek_to_first(&mut self) -> Result<()> {
            self.pos = if self.entries.is_empty() { None } else { Some(0) };
            Ok(())
        }
        fn seek_to_last(&mut self) -> Result<()> {
            self.pos = self.entries.len().checked_sub(1);
            Ok(())
        }
    }

    fn merged() -> MergingIterator {
        MergingIterator::new(
            vec![
                VecIter::boxed(&[("a", "1"), ("d", "4")]),
                VecIter::boxed(&[("b", "2"), ("e", "5")]),
                VecIter::boxed(&[]),
                VecIter::boxed(&[("c", "3")]),
            ],
            Arc::new(BytewiseComparator),
        )
    }

    fn collect_forward(it: &mut MergingIterator) -> Vec<String> {
        let mut out = Vec::new();
        while it.is_valid() {
            out.push(String::from_utf8(it.key().to_vec()).unwrap());
            it.next().unwrap();
        }
        out
    }

    #[test]
    fn forward_interleaves_children() {
        let mut it = merged();
        it.seek_to_first().unwrap();
        assert_eq!(collect_forward(&mut it), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn backward_from_last() {
        let mut it = merged();
        it.seek_to_last().unwrap();
        let mut out = Vec::new();
        while it.is_valid() {
            out.push(it.value().to_vec());
            it.prev().unwrap();
        }
        assert_eq!(out, [b"5", b"4", b"3", b"2", b"1"]);
    }

    #[test]
    fn direction_switch_keeps_position() {
        let mut it = merged();
        it.seek(b"c").unwrap();
        assert_eq!(it.key(), b"c");
        it.next().unwrap();
        assert_eq!(it.key(), b"d");
        it.prev().unwrap();
        assert_eq!(it.key(), b"c");
        it.prev().unwrap();
        assert_eq!(it.key(), b"b");
        it.next().unwrap();
        assert_eq!(it.key(), b"c");
    }

    #[test]
    fn empty_children_are_invalid() {
        let mut it = MergingIterator::new(vec![VecIter::boxed(&[])], Arc::new(BytewiseComparator));
        it.seek_to_first().unwrap();
        assert!(!it.is_valid());
        it.seek_to_last().unwrap();
        assert!(!it.is_valid());
    }
}
