use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::record::{Category, ContactStage, ParticipantRecord, Status};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    pub chosen: Vec<T>,
    /// Quota left unmet because the pool ran out.
    pub shortfall: usize,
}

/// Draw `quota` items uniformly without replacement, or the whole pool if it is too small.
pub fn select<T: Clone, R: Rng + ?Sized>(pool: &[T], quota: usize, rng: &mut R) -> Selection<T> {
    if pool.len() <= quota {
        return Selection {
            chosen: pool.to_vec(),
            shortfall: quota - pool.len(),
        };
    }
    let chosen = rand::seq::index::sample(rng, pool.len(), quota)
        .into_iter()
        .map(|i| pool[i].clone())
        .collect();
    Selection {
        chosen,
        shortfall: 0,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryFill {
    pub quota: usize,
    pub available: usize,
    pub selected: usize,
    pub shortfall: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    pub by_category: BTreeMap<Category, CategoryFill>,
    /// Positions of the newly invited records, in selection order.
    pub selected: Vec<usize>,
}

impl FillReport {
    pub fn total_shortfall(&self) -> usize {
        self.by_category.values().map(|f| f.shortfall).sum()
    }
}

/// Fill each category's quota from its fillable pool and mark the chosen records as invited.
///
/// Categories partition the pool, so a record can be chosen at most once per pass.
pub fn fill_quotas<R: Rng + ?Sized>(
    records: &mut [ParticipantRecord],
    quotas: &BTreeMap<Category, usize>,
    cycle_date: NaiveDate,
    rng: &mut R,
) -> FillReport {
    let mut report = FillReport::default();

    for (category, quota) in quotas {
        let pool: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.category == *category && r.is_fillable())
            .map(|(i, _)| i)
            .collect();

        let selection = select(&pool, *quota, rng);
        if selection.shortfall > 0 {
            tracing::warn!(
                category = %category,
                quota,
                available = pool.len(),
                shortfall = selection.shortfall,
                "insufficient eligible pool"
            );
        }

        for &i in &selection.chosen {
            let record = &mut records[i];
            record.status = Status::Pending;
            record.contact_stage = ContactStage::Initial;
            record.last_contact_date = Some(cycle_date);
        }

        report.by_category.insert(
            *category,
            CategoryFill {
                quota: *quota,
                available: pool.len(),
                selected: selection.chosen.len(),
                shortfall: selection.shortfall,
            },
        );
        report.selected.extend(selection.chosen);
    }

    report
}
