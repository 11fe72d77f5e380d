use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::compaction::{Compaction, CompactionReason};
use crate::options::Options;
use crate::types::extract_user_key;
use crate::version::{TableFile, Version, total_file_size};

/// Chooses the next automatic compaction, if any.
///
/// Size pressure first: the level with the highest score, when that score
/// is at least 1 (ties go to the shallower level). Otherwise a table whose
/// seek budget ran out.
pub fn pick_compaction(version: &Arc<Version>, options: &Options) -> Option<Compaction> {
    let (level, reason, seed) = if version.compaction_score() >= 1.0 {
        let level = version.compaction_level();
        (level, CompactionReason::Size, pick_file(version, level)?)
    } else if let Some((level, file)) = version.file_to_compact() {
        if level + 1 >= version.num_levels() {
            return None;
        }
        (level, CompactionReason::Seek, file)
    } else {
        return None;
    };

    let mut c = Compaction::new(Arc::clone(version), level, reason, options);
    c.inputs[0] = vec![seed];
    if level == 0 {
        // Level-0 files overlap; take every file touching the seed's range.
        let (smallest, largest) = key_range(version, &c.inputs[0]);
        c.inputs[0] = version.overlapping_inputs(
            0,
            Some(extract_user_key(&smallest)),
            Some(extract_user_key(&largest)),
        );
    }
    setup_other_inputs(&mut c, options);
    Some(c)
}

/// Compaction of `level` restricted to the user-key range `[begin, end]`.
/// `None` when nothing at that level overlaps the range.
pub fn range_compaction(
    version: &Arc<Version>,
    options: &Options,
    level: usize,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Option<Compaction> {
    if level + 1 >= version.num_levels() {
        return None;
    }
    let mut inputs = version.overlapping_inputs(level, begin, end);
    if inputs.is_empty() {
        return None;
    }
    // Avoid compacting too much in one go; level-0 files must move together.
    if level > 0 {
        let limit = options.target_file_size(level);
        let mut total = 0;
        for i in 0..inputs.len() {
            total += inputs[i].file_size();
            if total >= limit {
                inputs.truncate(i + 1);
                break;
            }
        }
    }
    let mut c = Compaction::new(Arc::clone(version), level, CompactionReason::Manual, options);
    c.inputs[0] = inputs;
    setup_other_inputs(&mut c, options);
    Some(c)
}

/// The file at `level` with the least overlap with `level + 1`; ties go
/// to the lower file number.
fn pick_file(version: &Version, level: usize) -> Option<Arc<TableFile>> {
    let mut best: Option<(u64, &Arc<TableFile>)> = None;
    for f in version.files(level) {
        let overlap = total_file_size(&version.overlapping_inputs(
            level + 1,
            Some(f.smallest_user_key()),
            Some(f.largest_user_key()),
        ));
        let better = match best {
            None => true,
            Some((best_overlap, best_file)) => {
                overlap < best_overlap || (overlap == best_overlap && f.number() < best_file.number())
            }
        };
        if better {
            best = Some((overlap, f));
        }
    }
    best.map(|(_, f)| Arc::clone(f))
}

/// Smallest and largest internal keys across `files`.
fn key_range(version: &Version, files: &[Arc<TableFile>]) -> (Vec<u8>, Vec<u8>) {
    let icmp = version.icmp();
    let mut smallest: &[u8] = &[];
    let mut largest: &[u8] = &[];
    for (i, f) in files.iter().enumerate() {
        if i == 0 || icmp.compare(f.smallest(), smallest) == Ordering::Less {
            smallest = f.smallest();
        }
        if i == 0 || icmp.compare(f.largest(), largest) == Ordering::Greater {
            largest = f.largest();
        }
    }
    (smallest.to_vec(), largest.to_vec())
}

fn key_range2(version: &Version, a: &[Arc<TableFile>], b: &[Arc<TableFile>]) -> (Vec<u8>, Vec<u8>) {
    let all: Vec<Arc<TableFile>> = a.iter().chain(b).cloned().collect();
    key_range(version, &all)
}

/// Fills `inputs[1]` and the grandparents, widening `inputs[0]` when that
/// pulls in no extra `level + 1` files and stays under the size limit.
fn setup_other_inputs(c: &mut Compaction, options: &Options) {
    let version = Arc::clone(&c.input_version);
    let level = c.level;

    let (smallest, largest) = key_range(&version, &c.inputs[0]);
    c.inputs[1] = version.overlapping_inputs(
        level + 1,
        Some(extract_user_key(&smallest)),
        Some(extract_user_key(&largest)),
    );
    let (mut all_start, mut all_limit) = key_range2(&version, &c.inputs[0], &c.inputs[1]);

    if !c.inputs[1].is_empty() {
        let expanded0 = version.overlapping_inputs(
            level,
            Some(extract_user_key(&all_start)),
            Some(extract_user_key(&all_limit)),
        );
        let inputs1_size = total_file_size(&c.inputs[1]);
        let expanded0_size = total_file_size(&expanded0);
        let limit = options
            .expanded_compaction_factor
            .saturating_mul(options.target_file_size(level));
        if expanded0.len() > c.inputs[0].len() && inputs1_size + expanded0_size < limit {
            let (new_start, new_limit) = key_range(&version, &expanded0);
            let expanded1 = version.overlapping_inputs(
                level + 1,
                Some(extract_user_key(&new_start)),
                Some(extract_user_key(&new_limit)),
            );
            if expanded1.len() == c.inputs[1].len() {
                tracing::debug!(
                    level,
                    from = c.inputs[0].len(),
                    to = expanded0.len(),
                    "expanding compaction inputs"
                );
                c.inputs[0] = expanded0;
                c.inputs[1] = expanded1;
                (all_start, all_limit) = key_range2(&version, &c.inputs[0], &c.inputs[1]);
            }
        }
    }

    if level + 2 < version.num_levels() {
        c.grandparents = version.overlapping_inputs(
            level + 2,
            Some(extract_user_key(&all_start)),
            Some(extract_user_key(&all_limit)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{InternalKeyComparator, default_comparator};
    use crate::types::{ValueType, encode_internal_key};
    use crate::version::{FileMetaData, VersionBuilder, VersionEdit};

    fn meta(number: u64, smallest: &str, largest: &str, size: u64) -> FileMetaData {
        FileMetaData {
            number,
            file_size: size,
            smallest: encode_internal_key(smallest.as_bytes(), 10, ValueType::Put),
            largest: encode_internal_key(largest.as_bytes(), 10, ValueType::Put),
            largest_seq: 10,
        }
    }

    fn build(options: &Options, files: &[(usize, FileMetaData)]) -> Arc<Version> {
        let base = Version::new(options.num_levels, InternalKeyComparator::new(default_comparator()));
        let mut edit = VersionEdit::new();
        for (level, m) in files {
            edit.add_file(*level, m.clone());
        }
        let mut builder = VersionBuilder::new(&base);
        builder.apply(&edit);
        Arc::new(builder.finish(None, options).0)
    }

    fn numbers(files: &[Arc<TableFile>]) -> Vec<u64> {
        let mut n: Vec<u64> = files.iter().map(|f| f.number()).collect();
        n.sort();
        n
    }

    #[test]
    fn nothing_to_do_below_threshold() {
        let options = Options::default();
        let v = build(&options, &[(0, meta(1, "a", "b", 10))]);
        assert!(pick_compaction(&v, &options).is_none());
    }

    #[test]
    fn level0_trigger_picks_overlapping_files() {
        let options = Options {
            level0_file_num_compaction_trigger: 2,
            ..Options::default()
        };
        let v = build(
            &options,
            &[
                (0, meta(1, "a", "c", 10)),
                (0, meta(2, "b", "d", 10)),
                (0, meta(3, "x", "z", 10)),
                (1, meta(4, "c", "e", 10)),
            ],
        );
        let c = pick_compaction(&v, &options).unwrap();
        assert_eq!(c.level(), 0);
        // File 3 has no level-1 overlap, so it is the seed and stands alone.
        assert_eq!(numbers(c.inputs(0)), vec![3]);
        assert!(c.inputs(1).is_empty());
        assert!(c.is_trivial_move());
    }

    #[test]
    fn least_overlap_wins_within_level() {
        let options = Options {
            max_bytes_for_level_base: 100,
            ..Options::default()
        };
        let v = build(
            &options,
            &[
                (1, meta(1, "a", "c", 60)),
                (1, meta(2, "m", "p", 60)),
                (2, meta(3, "a", "b", 500)),
                (2, meta(4, "n", "o", 50)),
            ],
        );
        let c = pick_compaction(&v, &options).unwrap();
        assert_eq!(c.level(), 1);
        assert_eq!(numbers(c.inputs(0)), vec![2]);
        assert_eq!(numbers(c.inputs(1)), vec![4]);
        assert!(!c.is_trivial_move());
    }

    #[test]
    fn manual_range_compaction_never_trivial() {
        let options = Options::default();
        let v = build(&options, &[(1, meta(1, "a", "c", 10))]);
        let c = range_compaction(&v, &options, 1, None, None).unwrap();
        assert!(!c.is_trivial_move());
        assert!(range_compaction(&v, &options, 2, None, None).is_none());
    }

    #[test]
    fn base_level_detection() {
        let options = Options::default();
        let v = build(&options, &[(1, meta(1, "a", "z", 10)), (3, meta(2, "f", "h", 10))]);
        let mut c = range_compaction(&v, &options, 1, None, None).unwrap();
        assert!(c.is_base_level_for_key(b"b"));
        assert!(!c.is_base_level_for_key(b"g"));
        assert!(c.is_base_level_for_key(b"k"));
    }
}
