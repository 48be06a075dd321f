use rand::Rng;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

use crate::allocation::allocate_bounded;
use crate::record::{Category, ParticipantRecord};
use crate::sampler::select;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    pub eligible_before: usize,
    pub targets: BTreeMap<Category, usize>,
    pub removed: BTreeMap<Category, usize>,
}

impl TrimReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

/// Shrink the eligible population to `target_n`, keeping the configured category mix.
///
/// Weights are used as given (no yield adjustment). A category that cannot meet
/// its share keeps everything it has and the difference goes to categories with
/// surplus. Ineligible records are never touched and do not count. Records
/// already invited are always kept and count toward their category's share;
/// only not-yet-invited eligible records are dropped. When a category holds more
/// invited records than its share, the excess is taken from the other categories.
pub fn trim<R: Rng + ?Sized>(
    records: &mut Vec<ParticipantRecord>,
    target_n: usize,
    weights: &BTreeMap<Category, f64>,
    rng: &mut R,
) -> TrimReport {
    let mut pools: BTreeMap<Category, (usize, Vec<usize>)> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        if !record.eligible {
            continue;
        }
        let entry = pools.entry(record.category).or_default();
        if record.status.is_invited() {
            entry.0 += 1;
        } else {
            entry.1.push(i);
        }
    }

    let eligible_before: usize = pools.values().map(|(locked, open)| locked + open.len()).sum();
    let mut report = TrimReport {
        eligible_before,
        ..Default::default()
    };
    if eligible_before <= target_n {
        return report;
    }

    let capacity: BTreeMap<Category, usize> = Category::ALL
        .iter()
        .map(|c| {
            let available = pools.get(c).map_or(0, |(locked, open)| locked + open.len());
            (*c, available)
        })
        .collect();
    let mut all_weights = weights.clone();
    for c in Category::ALL {
        all_weights.entry(c).or_insert(0.0);
    }
    report.targets = trim_targets(target_n, &all_weights, &capacity, &pools);

    let mut dropped: FxHashSet<usize> = FxHashSet::default();
    for (category, (locked, open)) in &pools {
        let target = report.targets.get(category).copied().unwrap_or(0);
        let keep = select(open, target.saturating_sub(*locked), rng).chosen;
        let keep: FxHashSet<usize> = keep.into_iter().collect();
        let removed: Vec<usize> = open.iter().copied().filter(|i| !keep.contains(i)).collect();
        if !removed.is_empty() {
            report.removed.insert(*category, removed.len());
        }
        dropped.extend(removed);
    }

    let mut position = 0usize;
    records.retain(|_| {
        let keep = !dropped.contains(&position);
        position += 1;
        keep
    });

    tracing::info!(
        before = eligible_before,
        target = target_n,
        removed = report.total_removed(),
        "trimmed eligible pool"
    );
    report
}

/// Per-category keep counts summing to `target_n` where possible.
///
/// A category whose invited records exceed its share is pinned at that count
/// and the rest of the target is re-split over the remaining categories.
fn trim_targets(
    target_n: usize,
    weights: &BTreeMap<Category, f64>,
    capacity: &BTreeMap<Category, usize>,
    pools: &BTreeMap<Category, (usize, Vec<usize>)>,
) -> BTreeMap<Category, usize> {
    let locked = |c: &Category| pools.get(c).map_or(0, |(locked, _)| *locked);
    let mut pinned: BTreeMap<Category, usize> = BTreeMap::new();
    loop {
        let pinned_total: usize = pinned.values().sum();
        let free: BTreeMap<Category, f64> = weights
            .iter()
            .filter(|(c, _)| !pinned.contains_key(*c))
            .map(|(c, w)| (*c, *w))
            .collect();
        let mut targets = allocate_bounded(target_n.saturating_sub(pinned_total), &free, capacity);
        let over: Vec<(Category, usize)> = targets
            .iter()
            .filter(|(c, target)| locked(*c) > **target)
            .map(|(c, _)| (*c, locked(c)))
            .collect();
        if over.is_empty() {
            if pinned_total > target_n {
                tracing::warn!(
                    invited = pinned_total,
                    target = target_n,
                    "invited records alone exceed the trim target, keeping them all"
                );
            }
            targets.extend(pinned);
            return targets;
        }
        for (category, invited) in over {
            tracing::warn!(
                category = %category,
                invited,
                "invited records exceed trim share, pinning category"
            );
            pinned.insert(category, invited);
        }
    }
}
