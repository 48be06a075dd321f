use std::fmt;
use std::path::PathBuf;

use crate::integrity::{format_violations, Violation};

#[derive(Debug)]
pub enum RecruitError {
    IntegrityViolation { site: String, violations: Vec<Violation> },
    MissingStore(PathBuf),
    MissingConfig(String),
    MalformedStatus(String),
    DuplicateIdentifier(String),
    InvalidInput(String),
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    Other(String),
}

impl fmt::Display for RecruitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecruitError::IntegrityViolation { site, violations } => {
                writeln!(f, "CRITICAL DATA INTEGRITY ERROR in {} master list", site)?;
                write!(f, "{}", format_violations(violations).join("\n"))
            }
            RecruitError::MissingStore(path) => {
                write!(f, "Master list not found: {}", path.display())
            }
            RecruitError::MissingConfig(key) => write!(f, "Missing configuration key: {}", key),
            RecruitError::MalformedStatus(s) => write!(f, "Unrecognized status: '{}'", s),
            RecruitError::DuplicateIdentifier(id) => write!(f, "Duplicate offspring id: {}", id),
            RecruitError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            RecruitError::Io(e) => write!(f, "IO error: {}", e),
            RecruitError::Csv(e) => write!(f, "CSV error: {}", e),
            RecruitError::Json(e) => write!(f, "JSON error: {}", e),
            RecruitError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for RecruitError {}

impl From<std::io::Error> for RecruitError {
    fn from(err: std::io::Error) -> Self {
        RecruitError::Io(err)
    }
}

impl From<csv::Error> for RecruitError {
    fn from(err: csv::Error) -> Self {
        RecruitError::Csv(err)
    }
}

impl From<serde_json::Error> for RecruitError {
    fn from(err: serde_json::Error) -> Self {
        RecruitError::Json(err)
    }
}

impl From<String> for RecruitError {
    fn from(err: String) -> Self {
        RecruitError::Other(err)
    }
}

impl From<&str> for RecruitError {
    fn from(err: &str) -> Self {
        RecruitError::Other(err.to_string())
    }
}
