use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::record::{ParticipantRecord, Status};

/// Recompute `multiple_offspring` and `prior_maternal_completion` for every record.
///
/// Always a full scan over the current records: a sibling's status change is
/// invisible to a record otherwise. Siblings count toward the group regardless
/// of eligibility.
pub fn refresh_flags(records: &mut [ParticipantRecord]) {
    let mut group_sizes: FxHashMap<&str, usize> = FxHashMap::default();
    let mut completions: FxHashMap<&str, usize> = FxHashMap::default();
    for record in records.iter() {
        *group_sizes.entry(record.maternal_id.as_str()).or_insert(0) += 1;
        if record.status == Status::Completed {
            *completions.entry(record.maternal_id.as_str()).or_insert(0) += 1;
        }
    }

    // Flags are computed before any write so the borrowed keys stay valid.
    let flags: Vec<(bool, bool)> = records
        .iter()
        .map(|record| {
            let mother = record.maternal_id.as_str();
            let size = group_sizes.get(mother).copied().unwrap_or(0);
            let completed = completions.get(mother).copied().unwrap_or(0);
            let own = usize::from(record.status == Status::Completed);
            (size > 1, completed > own)
        })
        .collect();

    for (record, (multiple, prior)) in records.iter_mut().zip(flags) {
        record.multiple_offspring = multiple;
        record.prior_maternal_completion = prior;
    }
}

/// Number of distinct mothers in a record set.
pub fn mother_count(records: &[ParticipantRecord]) -> usize {
    records.iter().map(|r| r.maternal_id.as_str()).unique().count()
}
