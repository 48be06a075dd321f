use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::record::{Category, ParticipantRecord};
use crate::RecruitError;

/// Number of violations spelled out before the rest are summarised as a count.
pub const MAX_REPORTED_VIOLATIONS: usize = 5;

/// Spreadsheet row of the first record (row 1 is the header).
const FIRST_DATA_ROW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// `verification_MRN` no longer equals `offspring_MRN`: rows or columns were shifted.
    IdMismatch,
    /// The stored hash disagrees with the identity fields: DOB or stratum was edited.
    FingerprintDrift,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::IdMismatch => "id-mismatch",
            ViolationKind::FingerprintDrift => "fingerprint-drift",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Spreadsheet row number of the offending record.
    pub row: usize,
    pub offspring_id: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::IdMismatch => write!(
                f,
                "Row {}: {} (MRN mismatch for {}, sorted incorrectly?)",
                self.row,
                self.kind.as_str(),
                self.offspring_id
            ),
            ViolationKind::FingerprintDrift => write!(
                f,
                "Row {}: {} (DOB or stratum changed for {})",
                self.row,
                self.kind.as_str(),
                self.offspring_id
            ),
        }
    }
}

/// Short digest over the identity fields of a record.
pub fn fingerprint(offspring_id: &str, date_of_birth: NaiveDate, category: Category) -> String {
    let base = format!(
        "{}|{}|{}",
        offspring_id,
        date_of_birth.format("%Y-%m-%d"),
        category
    );
    let digest = Sha256::digest(base.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn record_fingerprint(record: &ParticipantRecord) -> String {
    fingerprint(&record.offspring_id, record.date_of_birth, record.category)
}

/// Check every record for row misalignment and identity drift. Read-only.
///
/// A cleared verification id or fingerprint cell counts as a mismatch.
pub fn verify(records: &[ParticipantRecord]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let row = i + FIRST_DATA_ROW;
        if record.verification_id != record.offspring_id {
            violations.push(Violation {
                row,
                offspring_id: record.offspring_id.clone(),
                kind: ViolationKind::IdMismatch,
            });
        }
        if record.integrity_fingerprint != record_fingerprint(record) {
            violations.push(Violation {
                row,
                offspring_id: record.offspring_id.clone(),
                kind: ViolationKind::FingerprintDrift,
            });
        }
    }
    violations
}

/// Gate used before any mutating operation.
pub fn ensure_intact(site: &str, records: &[ParticipantRecord]) -> Result<(), RecruitError> {
    let violations = verify(records);
    if violations.is_empty() {
        return Ok(());
    }
    tracing::error!(
        site,
        violations = violations.len(),
        "integrity check failed, refusing to modify master list"
    );
    Err(RecruitError::IntegrityViolation {
        site: site.to_string(),
        violations,
    })
}

/// First few violations plus a count of the remainder, ready to show to a user.
pub fn format_violations(violations: &[Violation]) -> Vec<String> {
    let mut lines: Vec<String> = violations
        .iter()
        .take(MAX_REPORTED_VIOLATIONS)
        .map(|v| v.to_string())
        .collect();
    if violations.len() > MAX_REPORTED_VIOLATIONS {
        lines.push(format!(
            "...and {} more.",
            violations.len() - MAX_REPORTED_VIOLATIONS
        ));
    }
    lines
}
