//! Read path: point lookups and iterators over a captured state.

use std::sync::Arc;

use crate::db::{DbInner, DbState};
use crate::error::Result;
use crate::iterator::{DBIterator, LevelIterator, MergingIterator, StorageIterator};
use crate::lookup::LookupState;
use crate::options::ReadOptions;
use crate::types::SequenceNumber;

impl DbInner {
    /// Read ceiling plus the state to read from. The sequence is taken
    /// first: any state captured afterwards holds everything up to it.
    fn read_view(&self, opts: &ReadOptions) -> (SequenceNumber, Arc<DbState>) {
        let sequence = match &opts.snapshot {
            Some(snapshot) => snapshot.sequence(),
            None => self.seq.last_sequence(),
        };
        (sequence, self.current_state())
    }

    pub(crate) fn get(&self, opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (sequence, state) = self.read_view(opts);
        self.get_at(opts, &state, key, sequence)
    }

    pub(crate) fn multi_get(&self, opts: &ReadOptions, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        let (sequence, state) = self.read_view(opts);
        keys.iter()
            .map(|key| self.get_at(opts, &state, key, sequence))
            .collect()
    }

    /// Newest source first: active memtable, frozen memtables, then tables.
    fn get_at(
        &self,
        opts: &ReadOptions,
        state: &DbState,
        key: &[u8],
        sequence: SequenceNumber,
    ) -> Result<Option<Vec<u8>>> {
        let mut lookup =
            LookupState::new(key, sequence).with_merge_operator(self.options.merge_operator.clone());
        let mut done = state.mem.get(&mut lookup)?;
        for imm in &state.imms {
            if done {
                break;
            }
            done = imm.get(&mut lookup)?;
        }
        if !done {
            let stats = state.version.get(&mut lookup, &self.tables, opts.fill_cache)?;
            if stats.seek_compaction {
                self.maybe_schedule_compaction();
            }
        }
        lookup.finish()
    }

    pub(crate) fn iter(&self, opts: &ReadOptions) -> Result<DBIterator> {
        let (sequence, state) = self.read_view(opts);

        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        children.push(Box::new(state.mem.iter()));
        for imm in &state.imms {
            children.push(Box::new(imm.iter()));
        }
        for f in state.version.files(0) {
            let table = self.tables.find_table(f.number())?;
            children.push(Box::new(table.iter(opts.fill_cache)));
        }
        for level in 1..state.version.num_levels() {
            let files = state.version.files(level);
            if files.is_empty() {
                continue;
            }
            children.push(Box::new(LevelIterator::new(
                files.to_vec(),
                Arc::clone(&self.tables),
                self.icmp.clone(),
                opts.fill_cache,
            )));
        }

        let merged = MergingIterator::new(children, Arc::new(self.icmp.clone()));
        Ok(DBIterator::new(
            merged,
            sequence,
            Arc::clone(&self.options.comparator),
            self.options.merge_operator.clone(),
            Some(Arc::clone(&state.version)),
        )
        .with_prefix(opts.prefix.clone()))
    }
}
