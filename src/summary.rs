use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::record::{Category, ParticipantRecord, Status};
use crate::RecruitError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryLine {
    pub yield_estimate: f64,
    pub yield_source: String,
    pub quota: usize,
    pub available: usize,
    pub added: usize,
    pub shortfall: usize,
    pub reminders: usize,
    pub trimmed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteSummary {
    pub site: String,
    pub target: usize,
    pub eligible: usize,
    pub aged_out: usize,
    pub categories: BTreeMap<Category, CategoryLine>,
    pub status: BTreeMap<Category, StatusTally>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle_date: Option<NaiveDate>,
    pub month: Option<i64>,
    pub day_offset: Option<i64>,
    pub target: usize,
    pub sites: Vec<SiteSummary>,
    pub skipped_sites: Vec<String>,
    pub updates_applied: usize,
    pub updates_unchanged: usize,
    pub updates_unknown: usize,
    pub updates_malformed: Vec<String>,
    pub carryover: usize,
    pub fresh: usize,
}

impl CycleSummary {
    pub fn total_shortfall(&self) -> usize {
        self.sites
            .iter()
            .flat_map(|s| s.categories.values())
            .map(|c| c.shortfall)
            .sum()
    }

    /// Plain-text report shown at the end of a run.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let date = self
            .cycle_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "Recruitment Update - {}", date);
        if let (Some(month), Some(offset)) = (self.month, self.day_offset) {
            let _ = writeln!(out, "MONTH {}, {:+} days from cycle day", month, offset);
        }
        let _ = writeln!(
            out,
            "Target (fresh invites): {}   Carryover: {}   Fresh: {}",
            self.target, self.carryover, self.fresh
        );
        let _ = writeln!(
            out,
            "Status updates: {} applied, {} unchanged, {} unknown id, {} rejected",
            self.updates_applied,
            self.updates_unchanged,
            self.updates_unknown,
            self.updates_malformed.len()
        );
        for site in &self.skipped_sites {
            let _ = writeln!(out, "Site {} skipped: master list not found", site);
        }

        for site in &self.sites {
            let _ = writeln!(
                out,
                "\nSite: {} (Target New: {}, eligible: {}, aged out this cycle: {})",
                site.site, site.target, site.eligible, site.aged_out
            );
            let header = format!(
                "  {:<7} │ {:>6} │ {:<10} │ {:>5} │ {:>5} │ {:>5} │ {:>9} │ {:>7} │ {:>7}",
                "Stratum", "Yield", "Source", "Quota", "Pool", "Added", "Shortfall", "Remind", "Trimmed"
            );
            let _ = writeln!(out, "{}", header);
            let _ = writeln!(out, "  {}", "─".repeat(header.chars().count() - 2));
            for (category, line) in &site.categories {
                let _ = writeln!(
                    out,
                    "  {:<7} │ {:>6.2} │ {:<10} │ {:>5} │ {:>5} │ {:>5} │ {:>9} │ {:>7} │ {:>7}",
                    category,
                    line.yield_estimate,
                    line.yield_source,
                    line.quota,
                    line.available,
                    line.added,
                    line.shortfall,
                    line.reminders,
                    line.trimmed
                );
            }
            out.push_str(&render_status(&site.status));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTally {
    pub total: usize,
    pub invited: usize,
    pub pending: usize,
    pub completed: usize,
    pub refused: usize,
    pub aged_out: usize,
}

impl StatusTally {
    /// Completed share of invited records, in percent.
    pub fn observed_yield(&self) -> f64 {
        if self.invited == 0 {
            0.0
        } else {
            self.completed as f64 / self.invited as f64 * 100.0
        }
    }
}

pub fn status_tally(records: &[ParticipantRecord]) -> BTreeMap<Category, StatusTally> {
    let mut tallies: BTreeMap<Category, StatusTally> =
        Category::ALL.iter().map(|c| (*c, StatusTally::default())).collect();
    for record in records {
        let tally = tallies.entry(record.category).or_default();
        tally.total += 1;
        if record.status.is_invited() {
            tally.invited += 1;
        }
        match record.status {
            Status::Pending => tally.pending += 1,
            Status::Completed => tally.completed += 1,
            Status::Refused => tally.refused += 1,
            Status::AgedOut => tally.aged_out += 1,
            Status::NotInvited => {}
        }
    }
    tallies
}

pub fn render_status(tallies: &BTreeMap<Category, StatusTally>) -> String {
    let mut out = String::from("  --- CURRENT STATUS SUMMARY ---\n");
    for (category, t) in tallies {
        let _ = writeln!(
            out,
            "  {}: Total: {} | Invited: {} | Pending: {} | Completed: {} | Refused: {} | Aged Out: {} | Yield: {:.1}%",
            category,
            t.total,
            t.invited,
            t.pending,
            t.completed,
            t.refused,
            t.aged_out,
            t.observed_yield()
        );
    }
    out
}

/// `cycle_summary_YYYYMMDD.json` in `output_dir`.
pub fn summary_path(output_dir: &Path, cycle_date: NaiveDate) -> PathBuf {
    output_dir.join(format!("cycle_summary_{}.json", cycle_date.format("%Y%m%d")))
}

pub fn write_json(path: &Path, summary: &CycleSummary) -> Result<(), RecruitError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cycle_date, record_in};

    #[test]
    fn test_status_tally_counts_per_category() {
        let mut records = vec![
            record_in("A", Category::S1),
            record_in("B", Category::S1),
            record_in("C", Category::S1),
            record_in("D", Category::S2),
        ];
        records[0].status = Status::Completed;
        records[1].status = Status::Refused;
        let tallies = status_tally(&records);
        let s1 = tallies[&Category::S1];
        assert_eq!((s1.total, s1.invited, s1.completed, s1.refused), (3, 2, 1, 1));
        assert_eq!(s1.observed_yield(), 50.0);
        assert_eq!(tallies[&Category::S2].observed_yield(), 0.0);
        assert_eq!(tallies.len(), 6);
    }

    #[test]
    fn test_render_and_json() {
        let mut site = SiteSummary {
            site: "MGB".to_string(),
            target: 4,
            ..Default::default()
        };
        site.categories.insert(
            Category::S1,
            CategoryLine {
                yield_estimate: 0.25,
                yield_source: "history".to_string(),
                quota: 4,
                available: 3,
                added: 3,
                shortfall: 1,
                ..Default::default()
            },
        );
        let summary = CycleSummary {
            cycle_date: Some(cycle_date()),
            target: 4,
            sites: vec![site],
            ..Default::default()
        };
        assert_eq!(summary.total_shortfall(), 1);

        let text = summary.render();
        assert!(text.starts_with("Recruitment Update - 2024-06-01"));
        assert!(text.contains("Site: MGB (Target New: 4"));
        assert!(text.contains("S1"));

        let temp_dir = tempfile::tempdir().unwrap();
        let path = summary_path(temp_dir.path(), cycle_date());
        write_json(&path, &summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["sites"][0]["categories"]["S1"]["shortfall"], 1);
    }
}
