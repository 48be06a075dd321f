use std::collections::BTreeMap;

use crate::yield_estimator::MIN_YIELD;

/// How configured weights are turned into shares.
#[derive(Debug, Clone, Copy)]
pub enum Weighting<'a, K> {
    /// Weights used as given (trimming, site split).
    Direct,
    /// Each weight divided by its key's yield, so low-converting keys get more invitations.
    YieldAdjusted(&'a BTreeMap<K, f64>),
}

/// Split `target` into integer quotas that sum exactly to `target`.
///
/// Shares are floored and the remaining units go to the largest fractional
/// remainders; equal remainders are resolved by key order, so the result is
/// reproducible. Keys with zero weight get nothing unless every weight is zero,
/// in which case the split is even.
pub fn allocate<K: Ord + Copy>(
    target: usize,
    weights: &BTreeMap<K, f64>,
    weighting: Weighting<'_, K>,
) -> BTreeMap<K, usize> {
    let mut quotas: BTreeMap<K, usize> = weights.keys().map(|k| (*k, 0)).collect();
    if target == 0 || weights.is_empty() {
        return quotas;
    }

    let adjusted: Vec<(K, f64)> = weights
        .iter()
        .map(|(k, w)| {
            let w = if w.is_finite() { w.max(0.0) } else { 0.0 };
            let w = match weighting {
                Weighting::Direct => w,
                Weighting::YieldAdjusted(yields) => {
                    let y = yields
                        .get(k)
                        .copied()
                        .filter(|y| *y > 0.0)
                        .unwrap_or(MIN_YIELD);
                    w / y
                }
            };
            (*k, w)
        })
        .collect();

    let total: f64 = adjusted.iter().map(|(_, w)| w).sum();
    let shares: Vec<(K, f64)> = if total > 0.0 {
        adjusted
            .iter()
            .map(|(k, w)| (*k, w / total * target as f64))
            .collect()
    } else {
        let even = target as f64 / adjusted.len() as f64;
        adjusted.iter().map(|(k, _)| (*k, even)).collect()
    };

    let mut assigned = 0usize;
    let mut remainders: Vec<(K, f64)> = Vec::with_capacity(shares.len());
    for (k, share) in &shares {
        let floor = share.floor();
        let units = (floor as usize).min(target - assigned);
        quotas.insert(*k, units);
        assigned += units;
        remainders.push((*k, share - floor));
    }

    // Largest remainder first; ties go to the key that sorts first.
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let leftover = target - assigned;
    for (k, _) in remainders.iter().cycle().take(leftover) {
        if let Some(q) = quotas.get_mut(k) {
            *q += 1;
        }
    }

    quotas
}

/// Like [`allocate`] with direct weights, but no key receives more than its capacity.
///
/// Units a key cannot absorb are re-split among the keys that still have room,
/// in proportion to their weights. The result sums to `min(target, total capacity)`.
pub fn allocate_bounded<K: Ord + Copy>(
    target: usize,
    weights: &BTreeMap<K, f64>,
    capacity: &BTreeMap<K, usize>,
) -> BTreeMap<K, usize> {
    let mut quotas: BTreeMap<K, usize> = weights.keys().map(|k| (*k, 0)).collect();
    let total_capacity: usize = weights
        .keys()
        .map(|k| capacity.get(k).copied().unwrap_or(0))
        .sum();
    let mut remaining = target.min(total_capacity);

    while remaining > 0 {
        let open: BTreeMap<K, f64> = weights
            .iter()
            .filter(|(k, _)| quotas[*k] < capacity.get(*k).copied().unwrap_or(0))
            .map(|(k, w)| (*k, *w))
            .collect();
        if open.is_empty() {
            break;
        }

        let round = allocate(remaining, &open, Weighting::Direct);
        let mut placed = 0usize;
        for (k, units) in round {
            let room = capacity.get(&k).copied().unwrap_or(0) - quotas[&k];
            let take = units.min(room);
            if let Some(q) = quotas.get_mut(&k) {
                *q += take;
            }
            placed += take;
        }
        if placed == 0 {
            break;
        }
        remaining -= placed;
    }

    quotas
}
