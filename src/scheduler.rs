use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::config::{AgeWindow, FollowupWindows};
use crate::record::{round2, ContactStage, ParticipantRecord, Status};
use crate::store::MasterList;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeSweep {
    pub aged_out: usize,
    pub eligible: usize,
}

/// Refresh age and eligibility, and force `AgedOut` on anyone past the upper bound
/// who has not already finished.
///
/// Runs before allocation so aged-out records never take a quota slot.
pub fn age_sweep(
    records: &mut [ParticipantRecord],
    cycle_date: NaiveDate,
    window: AgeWindow,
) -> AgeSweep {
    let mut sweep = AgeSweep::default();
    for record in records.iter_mut() {
        let age = record.age_on(cycle_date);
        record.current_age = round2(age);
        record.eligible = window.contains(age);
        if record.eligible {
            sweep.eligible += 1;
        }
        if window.is_aged_out(age)
            && !matches!(
                record.status,
                Status::Completed | Status::Refused | Status::AgedOut
            )
        {
            tracing::debug!(offspring = %record.offspring_id, age, "aged out");
            record.status = Status::AgedOut;
            sweep.aged_out += 1;
        }
    }
    sweep
}

/// Move pending records whose reminder window has elapsed to the next contact stage.
///
/// Returns the positions of the advanced records; they go out as carryover this
/// cycle and do not count against the fresh quota.
pub fn advance_contact_stages(
    records: &mut [ParticipantRecord],
    cycle_date: NaiveDate,
    windows: FollowupWindows,
) -> Vec<usize> {
    let mut due = Vec::new();
    for (i, record) in records.iter_mut().enumerate() {
        if record.status != Status::Pending {
            continue;
        }
        let Some(last_contact) = record.last_contact_date else {
            continue;
        };
        let (Some(threshold), Some(next)) = (
            windows.threshold(record.contact_stage),
            record.contact_stage.next(),
        ) else {
            continue;
        };
        let elapsed = (cycle_date - last_contact).num_days() as f64;
        if elapsed >= threshold {
            record.contact_stage = next;
            record.last_contact_date = Some(cycle_date);
            due.push(i);
        }
    }
    due
}

/// One row of an edited outreach list coming back from study staff.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "offspring_MRN")]
    pub offspring_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub contact_stage: Option<String>,
    #[serde(default)]
    pub last_contact_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    pub unchanged: usize,
    pub unknown: usize,
    /// Ids whose supplied status was outside the enumerated set; those rows were rejected.
    pub malformed: Vec<String>,
}

/// Apply externally supplied status changes across all site lists.
///
/// A supplied status overrides the stored one in any direction. A row with an
/// unrecognized status is rejected on its own without stopping the rest. For
/// records that remain pending, a supplied contact stage is taken only if it
/// moves forward, and a supplied contact date replaces the stored one.
pub fn reconcile(lists: &mut [MasterList], updates: &[StatusUpdate]) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let mut index: FxHashMap<String, (usize, usize)> = FxHashMap::default();
    for (li, list) in lists.iter().enumerate() {
        for (ri, record) in list.records.iter().enumerate() {
            index.insert(record.offspring_id.clone(), (li, ri));
        }
    }

    for update in updates {
        let Some(&(li, ri)) = index.get(update.offspring_id.trim()) else {
            report.unknown += 1;
            continue;
        };

        let supplied = update.status.trim();
        let status = if supplied.is_empty() {
            None
        } else {
            match supplied.parse::<Status>() {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(offspring = %update.offspring_id, "{}", e);
                    report.malformed.push(update.offspring_id.clone());
                    continue;
                }
            }
        };

        let record = &mut lists[li].records[ri];
        match status {
            Some(status) if status != record.status => {
                record.status = status;
                report.applied += 1;
            }
            _ => report.unchanged += 1,
        }

        if record.status == Status::Pending {
            if let Some(stage) = parse_stage(update.contact_stage.as_deref()) {
                if stage > record.contact_stage {
                    record.contact_stage = stage;
                }
            }
            if let Some(date) = parse_date(update.last_contact_date.as_deref()) {
                record.last_contact_date = Some(date);
            }
        }
    }

    report
}

fn parse_stage(raw: Option<&str>) -> Option<ContactStage> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let code = raw.parse::<f64>().ok()?;
    ContactStage::try_from(code as i32).ok()
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
