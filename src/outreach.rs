use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::record::{yes_no, ContactStage, ParticipantRecord, Status};
use crate::store::write_rows;
use crate::RecruitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutreachKind {
    /// Already invited, a reminder is due.
    Carryover,
    /// Invited for the first time this cycle.
    Fresh,
}

/// One line of the cycle's outreach list. Model score, percentile and stratum
/// are left out so staff stay blinded to them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutreachRow {
    pub outreach_kind: OutreachKind,
    pub site: String,
    #[serde(rename = "mother_MRN")]
    pub maternal_id: String,
    pub mother_last: String,
    pub mother_first: String,
    pub mother_phone: String,
    #[serde(rename = "offspring_MRN")]
    pub offspring_id: String,
    pub offspring_last: String,
    pub offspring_first: String,
    pub offspring_sex: String,
    #[serde(rename = "offspring_DOB")]
    pub date_of_birth: NaiveDate,
    pub current_age: f64,
    pub status: Status,
    pub contact_stage: ContactStage,
    pub last_contact_date: Option<NaiveDate>,
    #[serde(with = "yes_no")]
    pub multiple_offspring: bool,
    #[serde(rename = "prev_maternal_enrollment", with = "yes_no")]
    pub prior_maternal_completion: bool,
    pub date_added_to_recruitment: Option<NaiveDate>,
}

impl OutreachRow {
    pub fn from_record(record: &ParticipantRecord, kind: OutreachKind, cycle_date: NaiveDate) -> Self {
        Self {
            outreach_kind: kind,
            site: record.site.clone(),
            maternal_id: record.maternal_id.clone(),
            mother_last: record.mother_last.clone(),
            mother_first: record.mother_first.clone(),
            mother_phone: record.mother_phone.clone(),
            offspring_id: record.offspring_id.clone(),
            offspring_last: record.offspring_last.clone(),
            offspring_first: record.offspring_first.clone(),
            offspring_sex: record.offspring_sex.clone(),
            date_of_birth: record.date_of_birth,
            current_age: record.current_age,
            status: record.status,
            contact_stage: record.contact_stage,
            last_contact_date: record.last_contact_date,
            multiple_offspring: record.multiple_offspring,
            prior_maternal_completion: record.prior_maternal_completion,
            date_added_to_recruitment: match kind {
                OutreachKind::Fresh => Some(cycle_date),
                OutreachKind::Carryover => None,
            },
        }
    }
}

/// `recruitment_YYYYMMDD.csv` in `output_dir`.
pub fn outreach_path(output_dir: &Path, cycle_date: NaiveDate) -> PathBuf {
    output_dir.join(format!("recruitment_{}.csv", cycle_date.format("%Y%m%d")))
}

pub fn write_outreach(path: &Path, rows: &[OutreachRow]) -> Result<(), RecruitError> {
    write_rows(path, rows)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "outreach list written");
    Ok(())
}
