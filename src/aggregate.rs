use std::collections::BTreeMap;

use crate::model::{NormalizedRecord, Origin};

/// Sums `count` per key. Keys come back sorted, so the result does not depend on the
/// order of the input rows.
pub fn sum_grouped<'a, K, F>(records: impl IntoIterator<Item = &'a NormalizedRecord>, key: F) -> BTreeMap<K, u64>
where
    K: Ord,
    F: Fn(&NormalizedRecord) -> K,
{
    let mut totals = BTreeMap::new();
    for record in records {
        let total = totals.entry(key(record)).or_insert(0u64);
        *total = total.saturating_add(record.count);
    }
    totals
}

/// Collapses rows sharing `(procedure_code, year, origin)` into one.
pub fn sum_by_key(records: &[NormalizedRecord]) -> Vec<NormalizedRecord> {
    sum_grouped(records, |r| (r.procedure_code.clone(), r.year.clone(), r.origin))
        .into_iter()
        .map(|((procedure_code, year, origin), count): ((String, String, Origin), u64)| NormalizedRecord {
            procedure_code,
            count,
            year,
            origin,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Year;

    fn record(code: &str, count: u64, suffix: &str, origin: Origin) -> NormalizedRecord {
        NormalizedRecord::new(code, Some(count), &Year::from_suffix(suffix).unwrap(), origin)
    }

    #[test]
    fn duplicates_are_summed() {
        let rows = vec![
            record("JPHJ0010", 0, "15", Origin::Hospital),
            record("JPHJ0010", 5, "15", Origin::Hospital),
            record("JPHB0020", 3, "15", Origin::Hospital),
        ];
        let summed = sum_by_key(&rows);
        assert_eq!(summed.len(), 2);
        let jphj = summed.iter().find(|r| r.procedure_code == "JPHJ0010").unwrap();
        assert_eq!(jphj.count, 5);
    }

    #[test]
    fn origins_and_years_stay_apart() {
        let rows = vec![
            record("JPHJ0010", 1, "15", Origin::Hospital),
            record("JPHJ0010", 2, "15", Origin::Liberal),
            record("JPHJ0010", 4, "16", Origin::Hospital),
        ];
        assert_eq!(sum_by_key(&rows).len(), 3);
    }

    #[test]
    fn order_does_not_matter() {
        let rows = vec![
            record("B", 7, "16", Origin::Hospital),
            record("A", 1, "15", Origin::Hospital),
            record("B", 2, "16", Origin::Hospital),
            record("A", 9, "15", Origin::Hospital),
            record("C", 0, "17", Origin::Hospital),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();
        let mut rotated = rows.clone();
        rotated.rotate_left(2);

        let expected = sum_by_key(&rows);
        assert_eq!(sum_by_key(&reversed), expected);
        assert_eq!(sum_by_key(&rotated), expected);
    }
}
