use chrono::NaiveDate;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::path::Path;

use crate::config::AgeWindow;
use crate::integrity::fingerprint;
use crate::record::{round2, age_between, Category, ContactStage, ParticipantRecord, Status};
use crate::relationship::{mother_count, refresh_flags};
use crate::store::MasterList;
use crate::RecruitError;

/// One row of a site's source feed, as exported from the medical record system.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceRow {
    #[serde(rename = "mother_MRN")]
    pub maternal_id: String,
    #[serde(default)]
    pub mother_last: String,
    #[serde(default)]
    pub mother_first: String,
    #[serde(default)]
    pub mother_phone: String,
    #[serde(rename = "offspring_MRN")]
    pub offspring_id: String,
    #[serde(default)]
    pub offspring_last: String,
    #[serde(default)]
    pub offspring_first: String,
    #[serde(default)]
    pub offspring_sex: String,
    #[serde(rename = "offspring_DOB")]
    pub date_of_birth: String,
    #[serde(default)]
    pub model_score: Option<String>,
    #[serde(default)]
    pub model_pctile: Option<String>,
}

impl SourceRow {
    /// Build a brand-new master-list record for this row.
    pub fn into_record(
        self,
        site: &str,
        today: NaiveDate,
        window: AgeWindow,
        insertion_order: u64,
    ) -> Result<ParticipantRecord, RecruitError> {
        let offspring_id = self.offspring_id.trim().to_string();
        let maternal_id = self.maternal_id.trim().to_string();
        if offspring_id.is_empty() || maternal_id.is_empty() {
            return Err(RecruitError::InvalidInput(
                "row without offspring or mother id".to_string(),
            ));
        }
        let date_of_birth = NaiveDate::parse_from_str(self.date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|e| {
                RecruitError::InvalidInput(format!(
                    "{}: bad DOB '{}': {}",
                    offspring_id, self.date_of_birth, e
                ))
            })?;
        let model_pctile = parse_number(self.model_pctile.as_deref());
        let category = Category::from_percentile(model_pctile);
        let age = age_between(date_of_birth, today);

        Ok(ParticipantRecord {
            insertion_order,
            integrity_fingerprint: fingerprint(&offspring_id, date_of_birth, category),
            verification_id: offspring_id.clone(),
            maternal_id,
            mother_last: self.mother_last,
            mother_first: self.mother_first,
            mother_phone: self.mother_phone,
            offspring_id,
            offspring_last: self.offspring_last,
            offspring_first: self.offspring_first,
            offspring_sex: self.offspring_sex,
            date_of_birth,
            model_score: parse_number(self.model_score.as_deref()),
            model_pctile,
            site: site.to_string(),
            date_added: Some(today),
            current_age: round2(age),
            eligible: window.contains(age),
            category,
            status: Status::NotInvited,
            contact_stage: ContactStage::Uncontacted,
            last_contact_date: None,
            multiple_offspring: false,
            prior_maternal_completion: false,
        })
    }
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub previous_offspring: usize,
    pub previous_mothers: usize,
    pub current_offspring: usize,
    pub current_mothers: usize,
    pub added: usize,
    pub removed: usize,
    pub duplicates: usize,
    pub unreadable: usize,
}

/// Merge a refreshed source feed into a master list.
///
/// Known ids keep their stored record as-is. New ids are created not-invited.
/// Ids repeated within the feed are skipped and counted. Not-invited records
/// that vanished from the feed are dropped; anyone already invited stays.
pub fn merge_feed(
    list: &mut MasterList,
    feed: Vec<Result<SourceRow, RecruitError>>,
    today: NaiveDate,
    window: AgeWindow,
) -> IngestReport {
    let mut report = IngestReport {
        previous_offspring: list.records.len(),
        previous_mothers: mother_count(&list.records),
        ..Default::default()
    };

    let mut feed_ids: FxHashSet<String> = FxHashSet::default();
    let mut next_order = list.next_insertion_order();
    let site = list.site.clone();

    for row in feed {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(site = %site, "skipping unreadable feed row: {}", e);
                report.unreadable += 1;
                continue;
            }
        };
        let id = row.offspring_id.trim().to_string();
        if !feed_ids.insert(id.clone()) {
            tracing::warn!(site = %site, offspring = %id, "duplicate offspring id in feed, skipped");
            report.duplicates += 1;
            continue;
        }
        if list.contains(&id) {
            continue;
        }
        match row.into_record(&site, today, window, next_order) {
            Ok(record) => match list.insert(record) {
                Ok(()) => {
                    next_order += 1;
                    report.added += 1;
                }
                Err(e) => {
                    tracing::warn!(site = %site, "{}", e);
                    report.duplicates += 1;
                }
            },
            Err(e) => {
                tracing::warn!(site = %site, "skipping unreadable feed row: {}", e);
                feed_ids.remove(&id);
                report.unreadable += 1;
            }
        }
    }

    let before = list.records.len();
    list.records
        .retain(|r| r.status.is_invited() || feed_ids.contains(&r.offspring_id));
    report.removed = before - list.records.len();

    refresh_flags(&mut list.records);
    report.current_offspring = list.records.len();
    report.current_mothers = mother_count(&list.records);
    report
}

/// Read a feed file row by row; unreadable rows are kept as errors for the report.
pub fn read_feed(path: &Path) -> Result<Vec<Result<SourceRow, RecruitError>>, RecruitError> {
    if !path.exists() {
        return Err(RecruitError::InvalidInput(format!(
            "feed file {} not found",
            path.display()
        )));
    }
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader
        .deserialize::<SourceRow>()
        .map(|row| row.map_err(RecruitError::from))
        .collect())
}

/// Site named by the feed's file name prefix, e.g. `mgb_export.csv` → `MGB`.
pub fn site_from_filename(path: &Path, known_sites: &[String]) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    known_sites
        .iter()
        .find(|site| name.starts_with(&format!("{}_", site.to_ascii_lowercase())))
        .cloned()
}
