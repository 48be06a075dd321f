use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::RecruitError;

/// Recruitment stratum, ordered from the highest model percentile (S1) to the lowest (S6).
///
/// The declaration order is the fixed enumeration order used for deterministic
/// tie-breaks in the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::S1,
        Category::S2,
        Category::S3,
        Category::S4,
        Category::S5,
        Category::S6,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::S1 => "S1",
            Category::S2 => "S2",
            Category::S3 => "S3",
            Category::S4 => "S4",
            Category::S5 => "S5",
            Category::S6 => "S6",
        }
    }

    /// Bucket a model percentile. A missing or unparseable score lands in the lowest stratum.
    pub fn from_percentile(pctile: Option<f64>) -> Category {
        match pctile {
            Some(p) if p > 95.0 => Category::S1,
            Some(p) if p > 90.0 => Category::S2,
            Some(p) if p > 80.0 => Category::S3,
            Some(p) if p > 50.0 => Category::S4,
            Some(p) if p > 10.0 => Category::S5,
            _ => Category::S6,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = RecruitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RecruitError::InvalidInput(format!("unknown stratum '{}'", s)))
    }
}

/// Recruitment status. Spelled the way study staff write it in the spreadsheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "Not Invited")]
    NotInvited,
    Pending,
    Completed,
    Refused,
    #[serde(rename = "Aged Out")]
    AgedOut,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotInvited => "Not Invited",
            Status::Pending => "Pending",
            Status::Completed => "Completed",
            Status::Refused => "Refused",
            Status::AgedOut => "Aged Out",
        }
    }

    pub fn is_invited(&self) -> bool {
        *self != Status::NotInvited
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = RecruitError;

    /// Accepts the spreadsheet spelling in any case, with or without the inner space.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "notinvited" => Ok(Status::NotInvited),
            "pending" => Ok(Status::Pending),
            "completed" => Ok(Status::Completed),
            "refused" => Ok(Status::Refused),
            "agedout" => Ok(Status::AgedOut),
            _ => Err(RecruitError::MalformedStatus(s.to_string())),
        }
    }
}

/// Contact stage, stored as the day offset of the outreach step it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ContactStage {
    Uncontacted,
    Initial,
    Reminder1,
    Reminder2,
    Reminder3,
}

impl ContactStage {
    pub fn code(&self) -> i32 {
        match self {
            ContactStage::Uncontacted => -1,
            ContactStage::Initial => 0,
            ContactStage::Reminder1 => 7,
            ContactStage::Reminder2 => 30,
            ContactStage::Reminder3 => 90,
        }
    }

    pub fn next(&self) -> Option<ContactStage> {
        match self {
            ContactStage::Uncontacted => Some(ContactStage::Initial),
            ContactStage::Initial => Some(ContactStage::Reminder1),
            ContactStage::Reminder1 => Some(ContactStage::Reminder2),
            ContactStage::Reminder2 => Some(ContactStage::Reminder3),
            ContactStage::Reminder3 => None,
        }
    }
}

impl TryFrom<i32> for ContactStage {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(ContactStage::Uncontacted),
            0 => Ok(ContactStage::Initial),
            7 => Ok(ContactStage::Reminder1),
            30 => Ok(ContactStage::Reminder2),
            90 => Ok(ContactStage::Reminder3),
            other => Err(format!("invalid contact stage {}", other)),
        }
    }
}

impl From<ContactStage> for i32 {
    fn from(stage: ContactStage) -> Self {
        stage.code()
    }
}

/// One row of a site master list, keyed by `offspring_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    #[serde(rename = "ROW_ID")]
    pub insertion_order: u64,
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
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub model_score: Option<f64>,
    #[serde(default)]
    pub model_pctile: Option<f64>,
    pub site: String,
    #[serde(default)]
    pub date_added: Option<NaiveDate>,
    #[serde(default)]
    pub current_age: f64,
    #[serde(with = "flag_01")]
    pub eligible: bool,
    #[serde(rename = "stratum")]
    pub category: Category,
    pub status: Status,
    pub contact_stage: ContactStage,
    #[serde(default)]
    pub last_contact_date: Option<NaiveDate>,
    #[serde(rename = "integrity_hash")]
    pub integrity_fingerprint: String,
    #[serde(rename = "verification_MRN")]
    pub verification_id: String,
    #[serde(with = "yes_no", default)]
    pub multiple_offspring: bool,
    #[serde(rename = "prev_maternal_enrollment", with = "yes_no", default)]
    pub prior_maternal_completion: bool,
}

impl ParticipantRecord {
    /// Age in years on `date`, using the study's 365.25-day year.
    pub fn age_on(&self, date: NaiveDate) -> f64 {
        age_between(self.date_of_birth, date)
    }

    /// Can this record be drawn to fill a fresh invitation quota?
    pub fn is_fillable(&self) -> bool {
        self.status == Status::NotInvited && self.eligible
    }
}

pub fn age_between(date_of_birth: NaiveDate, date: NaiveDate) -> f64 {
    (date - date_of_birth).num_days() as f64 / 365.25
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

mod flag_01 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "1" } else { "0" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_flag(&raw).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "Yes" } else { "No" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_flag(&raw).map_err(serde::de::Error::custom)
    }
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "yes" | "true" | "y" => Ok(true),
        "" | "0" | "0.0" | "no" | "false" | "n" => Ok(false),
        other => Err(format!("invalid flag value '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_buckets() {
        assert_eq!(Category::from_percentile(Some(99.0)), Category::S1);
        assert_eq!(Category::from_percentile(Some(95.0)), Category::S2);
        assert_eq!(Category::from_percentile(Some(92.0)), Category::S2);
        assert_eq!(Category::from_percentile(Some(85.0)), Category::S3);
        assert_eq!(Category::from_percentile(Some(55.0)), Category::S4);
        assert_eq!(Category::from_percentile(Some(15.0)), Category::S5);
        assert_eq!(Category::from_percentile(Some(10.0)), Category::S6);
        assert_eq!(Category::from_percentile(None), Category::S6);
    }

    #[test]
    fn test_status_parsing_is_forgiving_about_spelling() {
        assert_eq!("Not Invited".parse::<Status>().unwrap(), Status::NotInvited);
        assert_eq!("aged out".parse::<Status>().unwrap(), Status::AgedOut);
        assert_eq!(" Completed ".parse::<Status>().unwrap(), Status::Completed);
        assert_eq!("NotInvited".parse::<Status>().unwrap(), Status::NotInvited);
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let err = "Enrolled".parse::<Status>().unwrap_err();
        assert!(matches!(err, RecruitError::MalformedStatus(ref s) if s == "Enrolled"));
    }

    #[test]
    fn test_contact_stage_codes() {
        assert_eq!(ContactStage::try_from(-1).unwrap(), ContactStage::Uncontacted);
        assert_eq!(ContactStage::try_from(30).unwrap(), ContactStage::Reminder2);
        assert!(ContactStage::try_from(14).is_err());
        assert_eq!(ContactStage::Reminder2.next(), Some(ContactStage::Reminder3));
        assert_eq!(ContactStage::Reminder3.next(), None);
        assert!(ContactStage::Initial < ContactStage::Reminder1);
    }

    #[test]
    fn test_age_uses_julian_year() {
        let dob = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let age = age_between(dob, today);
        assert!((age - 1461.0 / 365.25).abs() < 1e-9);
        assert_eq!(round2(age), 4.0);
    }
}
