use crate::instructions::*;
use crate::machine::machine_errors::Fault;
use crate::types::ABSOLUTE_LABEL;

use std::cmp::Ordering;

/// Sorted tables up to this many entries are scanned linearly.
pub const LINEAR_SCAN_LIMIT: usize = 15;

#[inline]
fn table_word(code: &[u32], offset: usize) -> Result<u32, Fault> {
    code.get(offset)
        .copied()
        .ok_or(Fault::MalformedTable { offset })
}

/// Looks `key` up in the switch table starting at `start`.
///
/// A sorted table is `[size, key, label, key, label, ...]` in ascending key
/// order. A hashed table is `[bucket_count, bucket...]` where each non-zero
/// bucket word is the absolute offset of a sorted subtable.
pub fn search_table(
    code: &[u32],
    kind: TableKind,
    key: u32,
    start: usize,
) -> Result<Option<CodeLabel>, Fault> {
    match kind {
        TableKind::Sorted => search_sorted(code, key, start),
        TableKind::Hashed => {
            let bucket_count = table_word(code, start)? as usize;

            if !bucket_count.is_power_of_two() {
                return Err(Fault::MalformedTable { offset: start });
            }

            let bucket_offset = start + 1 + (key as usize & (bucket_count - 1));
            let bucket = table_word(code, bucket_offset)?;

            if bucket == 0 {
                return Ok(None);
            }

            if bucket & ABSOLUTE_LABEL == 0 {
                return Err(Fault::MalformedTable {
                    offset: bucket_offset,
                });
            }

            search_sorted(code, key, (bucket ^ ABSOLUTE_LABEL) as usize)
        }
    }
}

fn search_sorted(code: &[u32], key: u32, start: usize) -> Result<Option<CodeLabel>, Fault> {
    let size = table_word(code, start)? as usize;
    let pairs = code
        .get(start + 1..start + 1 + 2 * size)
        .ok_or(Fault::MalformedTable { offset: start })?;

    if size <= LINEAR_SCAN_LIMIT {
        return Ok(pairs
            .chunks_exact(2)
            .find(|pair| pair[0] == key)
            .map(|pair| CodeLabel::from_word(pair[1])));
    }

    let (mut lo, mut hi) = (0, size);

    while lo < hi {
        let mid = lo + (hi - lo) / 2;

        match pairs[2 * mid].cmp(&key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(Some(CodeLabel::from_word(pairs[2 * mid + 1]))),
        }
    }

    Ok(None)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use maplit::btreemap;
    use std::collections::BTreeMap;

    pub(crate) fn sorted_table(entries: &BTreeMap<u32, u32>) -> Vec<u32> {
        let mut table = vec![entries.len() as u32];

        for (key, label) in entries {
            table.push(*key);
            table.push(*label);
        }

        table
    }

    /// Lays out a hashed table whose first word will sit at `base` in its
    /// code buffer.
    pub(crate) fn hashed_table(
        entries: &BTreeMap<u32, u32>,
        bucket_count: usize,
        base: usize,
    ) -> Vec<u32> {
        let mut buckets: Vec<BTreeMap<u32, u32>> = vec![BTreeMap::new(); bucket_count];

        for (key, label) in entries {
            buckets[*key as usize & (bucket_count - 1)].insert(*key, *label);
        }

        let mut table = vec![bucket_count as u32];
        let mut subtables = vec![];
        let mut next = base + 1 + bucket_count;

        for bucket in buckets {
            if bucket.is_empty() {
                table.push(0);
            } else {
                let subtable = sorted_table(&bucket);
                table.push(next as u32 | ABSOLUTE_LABEL);
                next += subtable.len();
                subtables.extend(subtable);
            }
        }

        table.extend(subtables);
        table
    }

    fn source_order_scan(clauses: &[(u32, u32)], key: u32) -> Option<CodeLabel> {
        clauses
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, label)| CodeLabel::from_word(*label))
    }

    #[test]
    fn small_tables_scan_linearly() {
        let entries = btreemap! {
            4 => 0,
            9 => 1,
            12 => 0x8000_0020,
        };

        let code = sorted_table(&entries);

        assert_eq!(
            search_table(&code, TableKind::Sorted, 9, 0),
            Ok(Some(CodeLabel::Clause(1)))
        );
        assert_eq!(
            search_table(&code, TableKind::Sorted, 12, 0),
            Ok(Some(CodeLabel::Offset(0x20)))
        );
        assert_eq!(search_table(&code, TableKind::Sorted, 5, 0), Ok(None));
    }

    #[test]
    fn all_table_layouts_agree_with_a_source_order_scan() {
        let clauses: Vec<(u32, u32)> = (0..40u32).map(|i| (i * 7 + 3, i)).collect();
        let entries: BTreeMap<u32, u32> = clauses.iter().copied().collect();

        let sorted = sorted_table(&entries);
        assert!(entries.len() > LINEAR_SCAN_LIMIT);

        let base = 5;
        let mut hashed = vec![0; base];
        hashed.extend(hashed_table(&entries, 8, base));

        for key in 0..300 {
            let expected = source_order_scan(&clauses, key);

            assert_eq!(search_table(&sorted, TableKind::Sorted, key, 0), Ok(expected));
            assert_eq!(search_table(&hashed, TableKind::Hashed, key, base), Ok(expected));
        }
    }

    #[test]
    fn empty_buckets_miss() {
        let entries = btreemap! { 1 => 0 };
        let code = hashed_table(&entries, 4, 0);

        assert_eq!(search_table(&code, TableKind::Hashed, 2, 0), Ok(None));
        assert_eq!(
            search_table(&code, TableKind::Hashed, 1, 0),
            Ok(Some(CodeLabel::Clause(0)))
        );
    }

    #[test]
    fn truncated_tables_are_faults() {
        let code = [3, 1, 0];
        assert!(search_table(&code, TableKind::Sorted, 1, 0).is_err());

        let code = [3, 0, 0, 0];
        assert_eq!(
            search_table(&code, TableKind::Hashed, 1, 0),
            Err(Fault::MalformedTable { offset: 0 })
        );
    }
}
