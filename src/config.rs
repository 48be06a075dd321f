use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::record::{Category, ContactStage};
use crate::RecruitError;

pub const DEFAULT_CONFIG_FILE: &str = "CONSTANTS.txt";
pub const DEFAULT_CATEGORY_WEIGHT: f64 = 0.1;
pub const DEFAULT_SITES: &str = "MGB,VUMC";

/// Study constants loaded once from a `key=value` file and passed by reference.
///
/// Values are kept as raw text and interpreted on access, so dates and site
/// lists live next to the numeric knobs without a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudyConfig {
    values: BTreeMap<String, String>,
}

impl StudyConfig {
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() || value.contains('=') {
                    continue;
                }
                values.insert(key.to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self, RecruitError> {
        if !path.exists() {
            return Err(RecruitError::MissingConfig(path.display().to_string()));
        }
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Builder used by callers that assemble a configuration in code.
    pub fn with_value(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str()).filter(|v| !v.is_empty())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_str(key).and_then(|v| v.parse::<f64>().ok())
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, RecruitError> {
        self.get_f64(key)
            .ok_or_else(|| RecruitError::MissingConfig(key.to_string()))
    }

    /// `S{n}_WEIGHT` per category, defaulting each missing weight to 0.1.
    pub fn category_weights(&self) -> BTreeMap<Category, f64> {
        Category::ALL
            .iter()
            .map(|c| {
                let w = self
                    .get_f64(&format!("{}_WEIGHT", c))
                    .unwrap_or(DEFAULT_CATEGORY_WEIGHT);
                (*c, w.max(0.0))
            })
            .collect()
    }

    pub fn age_window(&self) -> Result<AgeWindow, RecruitError> {
        Ok(AgeWindow {
            min: self.require_f64("AGE_MIN")?,
            max: self.require_f64("AGE_MAX")?,
        })
    }

    pub fn followup_windows(&self) -> Result<FollowupWindows, RecruitError> {
        Ok(FollowupWindows {
            first: self.require_f64("FOLLOWUP_1_DAYS")?,
            second: self.require_f64("FOLLOWUP_2_DAYS")?,
            third: self.require_f64("FOLLOWUP_3_DAYS")?,
        })
    }

    pub fn sites(&self) -> Vec<String> {
        self.get_str("SITES")
            .unwrap_or(DEFAULT_SITES)
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Share of each cycle's target assigned to `site`.
    pub fn site_ratio(&self, site: &str) -> f64 {
        if let Some(ratio) = self.get_f64(&format!("{}_RATIO", site)) {
            return ratio.max(0.0);
        }
        match site {
            "MGB" => 0.6667,
            "VUMC" => 0.3333,
            _ => 1.0,
        }
    }

    pub fn start_date(&self) -> Result<Option<NaiveDate>, RecruitError> {
        match self.get_str("START_DATE") {
            None => Ok(None),
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| RecruitError::InvalidInput(format!("START_DATE '{}': {}", raw, e))),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.get_str("OUTPUT_DIR").unwrap_or("study_data/outputs"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        PathBuf::from(self.get_str("BACKUP_DIR").unwrap_or("study_data/backups"))
    }
}

/// Eligibility window in years: `min <= age < max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeWindow {
    pub min: f64,
    pub max: f64,
}

impl AgeWindow {
    pub fn contains(&self, age: f64) -> bool {
        self.min <= age && age < self.max
    }

    pub fn is_aged_out(&self, age: f64) -> bool {
        age >= self.max
    }
}

/// Cumulative follow-up offsets in days from the initial contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowupWindows {
    pub first: f64,
    pub second: f64,
    pub third: f64,
}

impl FollowupWindows {
    /// Days that must elapse since the last contact before leaving `stage`.
    pub fn threshold(&self, stage: ContactStage) -> Option<f64> {
        match stage {
            ContactStage::Initial => Some(self.first),
            ContactStage::Reminder1 => Some(self.second - self.first),
            ContactStage::Reminder2 => Some(self.third - self.second),
            ContactStage::Uncontacted | ContactStage::Reminder3 => None,
        }
    }
}

/// Rewrite the given keys in a config file in place, appending the ones not yet present.
/// Comments and unrelated lines are left untouched.
pub fn update_config_file(path: &Path, updates: &[(&str, String)]) -> Result<(), RecruitError> {
    let original = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };

    let mut pending: Vec<&(&str, String)> = updates.iter().collect();
    let mut lines: Vec<String> = Vec::new();
    for line in original.lines() {
        let key = line
            .split_once('=')
            .filter(|_| !line.trim_start().starts_with('#'))
            .map(|(k, _)| k.trim());
        match key.and_then(|k| pending.iter().position(|(uk, _)| *uk == k)) {
            Some(idx) => {
                let (k, v) = pending.remove(idx);
                lines.push(format!("{}={}", k, v));
            }
            None => lines.push(line.to_string()),
        }
    }
    for (k, v) in pending {
        lines.push(format!("{}={}", k, v));
    }

    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}
