use chrono::{Datelike, NaiveDate};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::allocation::{allocate, Weighting};
use crate::config::StudyConfig;
use crate::integrity::ensure_intact;
use crate::outreach::{outreach_path, write_outreach, OutreachKind, OutreachRow};
use crate::record::Category;
use crate::relationship::refresh_flags;
use crate::sampler::fill_quotas;
use crate::scheduler::{advance_contact_stages, age_sweep, reconcile, StatusUpdate};
use crate::store::MasterList;
use crate::summary::{status_tally, summary_path, write_json, CategoryLine, CycleSummary, SiteSummary};
use crate::trimmer::trim;
use crate::yield_estimator::{estimate_all, YieldSource};
use crate::RecruitError;

/// Runs further than this many days from the cycle day need `force`.
pub const MAX_CYCLE_DEVIATION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePosition {
    /// Calendar months since the study start.
    pub month: i64,
    /// Signed distance from the cycle's day of month, wrapped into ±15.
    pub day_offset: i64,
}

pub fn cycle_position(start: NaiveDate, today: NaiveDate) -> CyclePosition {
    let month = (today.year() as i64 - start.year() as i64) * 12 + today.month() as i64
        - start.month() as i64;
    let raw = today.day() as i64 - start.day() as i64;
    let day_offset = if raw > 15 {
        raw - 30
    } else if raw < -15 {
        raw + 30
    } else {
        raw
    };
    CyclePosition { month, day_offset }
}

/// Where `cycle_date` falls in the study calendar, refusing off-cycle runs unless forced.
///
/// Without a `START_DATE` there is no calendar yet and any date is accepted.
pub fn check_cycle_timing(
    config: &StudyConfig,
    cycle_date: NaiveDate,
    force: bool,
) -> Result<Option<CyclePosition>, RecruitError> {
    let Some(start) = config.start_date()? else {
        tracing::warn!("START_DATE not set, treating this run as month 0");
        return Ok(None);
    };
    let position = cycle_position(start, cycle_date);
    tracing::info!(month = position.month, day_offset = position.day_offset, "cycle position");
    if position.day_offset.abs() > MAX_CYCLE_DEVIATION_DAYS {
        if !force {
            return Err(RecruitError::InvalidInput(format!(
                "{} is {:+} days from the cycle day ({}); rerun with --force to run off-cycle",
                cycle_date,
                position.day_offset,
                start.day()
            )));
        }
        tracing::warn!(day_offset = position.day_offset, "running off-cycle");
    }
    Ok(Some(position))
}

/// Load every configured site's master list from the output directory.
///
/// A missing list is fatal unless `allow_single_site` is set, in which case the
/// site is skipped and its name returned. At least one list must exist.
pub fn load_sites(
    config: &StudyConfig,
    allow_single_site: bool,
) -> Result<(Vec<MasterList>, Vec<String>), RecruitError> {
    let dir = config.output_dir();
    let mut lists = Vec::new();
    let mut skipped = Vec::new();
    let mut first_missing = None;
    for site in config.sites() {
        let path = MasterList::path_for(&dir, &site);
        match MasterList::load(&site, &path) {
            Ok(list) => lists.push(list),
            Err(RecruitError::MissingStore(path)) if allow_single_site => {
                tracing::warn!(site = %site, path = %path.display(), "master list not found, skipping site");
                first_missing.get_or_insert(path);
                skipped.push(site);
            }
            Err(e) => return Err(e),
        }
    }
    if lists.is_empty() {
        return Err(RecruitError::MissingStore(
            first_missing.unwrap_or_else(|| MasterList::path_for(&dir, "site")),
        ));
    }
    Ok((lists, skipped))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOptions {
    /// Fresh invitations across all sites.
    pub target: usize,
    /// Eligible pool size to shrink to before selection, across all sites.
    pub trim: Option<usize>,
    pub cycle_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub summary: CycleSummary,
    /// Carryover reminders first, then fresh invitations in random order.
    pub outreach: Vec<OutreachRow>,
}

/// Run one recruitment cycle over the loaded site lists, entirely in memory.
///
/// Every list passes the integrity gate before anything is touched; a failure
/// leaves all lists exactly as loaded. The caller persists the result with
/// [`write_outputs`].
#[tracing::instrument(skip_all, fields(target = options.target, date = %options.cycle_date))]
pub fn run_cycle<R: Rng + ?Sized>(
    lists: &mut [MasterList],
    updates: &[StatusUpdate],
    config: &StudyConfig,
    options: &CycleOptions,
    rng: &mut R,
) -> Result<CycleOutcome, RecruitError> {
    let window = config.age_window()?;
    let followups = config.followup_windows()?;
    for list in lists.iter() {
        ensure_intact(&list.site, &list.records)?;
    }

    let date = options.cycle_date;
    let weights = config.category_weights();
    let mut summary = CycleSummary {
        cycle_date: Some(date),
        target: options.target,
        ..Default::default()
    };

    let reconciled = reconcile(lists, updates);
    summary.updates_applied = reconciled.applied;
    summary.updates_unchanged = reconciled.unchanged;
    summary.updates_unknown = reconciled.unknown;
    summary.updates_malformed = reconciled.malformed;

    let ratios: BTreeMap<usize, f64> = lists
        .iter()
        .enumerate()
        .map(|(i, list)| (i, config.site_ratio(&list.site)))
        .collect();
    let site_targets = allocate(options.target, &ratios, Weighting::Direct);
    let site_trims = options
        .trim
        .map(|n| allocate(n, &ratios, Weighting::Direct));

    let mut carryover = Vec::new();
    let mut fresh = Vec::new();

    for (i, list) in lists.iter_mut().enumerate() {
        let site = list.site.clone();
        let sweep = age_sweep(&mut list.records, date, window);
        refresh_flags(&mut list.records);

        let due = advance_contact_stages(&mut list.records, date, followups);
        let mut reminders: BTreeMap<Category, usize> = BTreeMap::new();
        let due_ids: Vec<String> = due
            .iter()
            .map(|&ri| {
                let record = &list.records[ri];
                *reminders.entry(record.category).or_insert(0) += 1;
                record.offspring_id.clone()
            })
            .collect();

        let trimmed = match site_trims.as_ref().and_then(|t| t.get(&i)) {
            Some(&n) => trim(&mut list.records, n, &weights, rng).removed,
            None => BTreeMap::new(),
        };

        let yields = estimate_all(&list.records, Some(&site), config);
        let yield_values: BTreeMap<Category, f64> =
            yields.iter().map(|(c, y)| (*c, y.value)).collect();
        let site_target = site_targets.get(&i).copied().unwrap_or(0);
        let quotas = allocate(site_target, &weights, Weighting::YieldAdjusted(&yield_values));
        let fill = fill_quotas(&mut list.records, &quotas, date, rng);
        let fresh_ids: Vec<String> = fill
            .selected
            .iter()
            .map(|&ri| list.records[ri].offspring_id.clone())
            .collect();

        refresh_flags(&mut list.records);

        for id in &due_ids {
            if let Some(ri) = list.position(id) {
                carryover.push(OutreachRow::from_record(&list.records[ri], OutreachKind::Carryover, date));
            }
        }
        for id in &fresh_ids {
            if let Some(ri) = list.position(id) {
                fresh.push(OutreachRow::from_record(&list.records[ri], OutreachKind::Fresh, date));
            }
        }

        let categories = Category::ALL
            .iter()
            .map(|c| {
                let fill_line = fill.by_category.get(c).copied().unwrap_or_default();
                let estimate = yields.get(c);
                let line = CategoryLine {
                    yield_estimate: estimate.map_or(0.0, |y| y.value),
                    yield_source: estimate.map_or("", |y| source_label(&y.source)).to_string(),
                    quota: fill_line.quota,
                    available: fill_line.available,
                    added: fill_line.selected,
                    shortfall: fill_line.shortfall,
                    reminders: reminders.get(c).copied().unwrap_or(0),
                    trimmed: trimmed.get(c).copied().unwrap_or(0),
                };
                (*c, line)
            })
            .collect();

        tracing::info!(
            site = %site,
            target = site_target,
            added = fill.selected.len(),
            reminders = due_ids.len(),
            shortfall = fill.total_shortfall(),
            "site cycle complete"
        );

        summary.sites.push(SiteSummary {
            site,
            target: site_target,
            eligible: list.records.iter().filter(|r| r.eligible).count(),
            aged_out: sweep.aged_out,
            categories,
            status: status_tally(&list.records),
        });
    }

    fresh.shuffle(rng);
    summary.carryover = carryover.len();
    summary.fresh = fresh.len();
    carryover.extend(fresh);

    Ok(CycleOutcome {
        summary,
        outreach: carryover,
    })
}

fn source_label(source: &YieldSource) -> &'static str {
    match source {
        YieldSource::Historical { .. } => "history",
        YieldSource::SiteOverride => "site",
        YieldSource::CategoryOverride => "category",
        YieldSource::Fallback => "default",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleArtifacts {
    pub outreach: PathBuf,
    pub summary: PathBuf,
    pub backups: Vec<PathBuf>,
}

/// Persist a finished cycle: snapshot and rewrite each master list, then write
/// the outreach list and the JSON summary into the output directory.
pub fn write_outputs(
    lists: &[MasterList],
    outcome: &CycleOutcome,
    config: &StudyConfig,
    cycle_date: NaiveDate,
) -> Result<CycleArtifacts, RecruitError> {
    let label = format!("pre_cycle_{}", cycle_date.format("%Y%m%d"));
    let mut backups = Vec::new();
    for list in lists {
        if let Some(backup) = list.save(&config.backup_dir(), &label)? {
            backups.push(backup);
        }
    }

    let output_dir = config.output_dir();
    fs::create_dir_all(&output_dir)?;
    let outreach = outreach_path(&output_dir, cycle_date);
    write_outreach(&outreach, &outcome.outreach)?;
    let summary = summary_path(&output_dir, cycle_date);
    write_json(&summary, &outcome.summary)?;

    Ok(CycleArtifacts {
        outreach,
        summary,
        backups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContactStage, Status};
    use crate::testing::{cycle_date, record_in};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> StudyConfig {
        StudyConfig::default()
            .with_value("AGE_MIN", 2.0)
            .with_value("AGE_MAX", 5.0)
            .with_value("FOLLOWUP_1_DAYS", 7)
            .with_value("FOLLOWUP_2_DAYS", 30)
            .with_value("FOLLOWUP_3_DAYS", 90)
    }

    fn site(name: &str, n: usize) -> MasterList {
        let mut list = MasterList::new(name, PathBuf::from(format!("{}.csv", name)));
        for i in 0..n {
            let mut record = record_in(&format!("{}-{}", name, i), Category::ALL[i % 6]);
            record.site = name.to_string();
            list.records.push(record);
        }
        list
    }

    #[test]
    fn test_cycle_position_wraps_day_offset() {
        let start = date(2024, 1, 1);
        assert_eq!(
            cycle_position(start, date(2024, 3, 5)),
            CyclePosition { month: 2, day_offset: 4 }
        );
        assert_eq!(
            cycle_position(start, date(2024, 3, 28)),
            CyclePosition { month: 2, day_offset: -3 }
        );
        assert_eq!(cycle_position(date(2024, 1, 28), date(2024, 3, 2)).day_offset, 4);
    }

    #[test]
    fn test_off_cycle_run_needs_force() {
        let config = config().with_value("START_DATE", "2024-01-01");
        assert!(check_cycle_timing(&config, date(2024, 6, 12), false).is_err());
        assert!(check_cycle_timing(&config, date(2024, 6, 12), true).is_ok());
        assert!(check_cycle_timing(&config, date(2024, 6, 3), false).is_ok());
        assert_eq!(check_cycle_timing(&StudyConfig::default(), date(2024, 6, 12), false).unwrap(), None);
    }

    #[test]
    fn test_target_split_across_sites() {
        let mut lists = vec![site("MGB", 120), site("VUMC", 120)];
        let options = CycleOptions {
            target: 30,
            trim: None,
            cycle_date: cycle_date(),
        };
        let outcome = run_cycle(&mut lists, &[], &config(), &options, &mut ChaCha8Rng::seed_from_u64(3)).unwrap();

        let targets: Vec<usize> = outcome.summary.sites.iter().map(|s| s.target).collect();
        assert_eq!(targets, vec![20, 10]);
        assert_eq!(outcome.outreach.len(), 30);
        assert_eq!(outcome.summary.fresh, 30);
        assert!(outcome.outreach.iter().all(|r| r.outreach_kind == OutreachKind::Fresh));
    }

    #[test]
    fn test_reminders_come_first_and_do_not_use_quota() {
        let mut lists = vec![site("MGB", 60)];
        for record in lists[0].records.iter_mut().take(3) {
            record.status = Status::Pending;
            record.contact_stage = ContactStage::Initial;
            record.last_contact_date = Some(date(2024, 5, 20));
        }
        let options = CycleOptions {
            target: 12,
            trim: None,
            cycle_date: cycle_date(),
        };
        let outcome = run_cycle(&mut lists, &[], &config(), &options, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();

        assert_eq!(outcome.summary.carryover, 3);
        assert_eq!(outcome.summary.fresh, 12);
        assert!(outcome.outreach[..3].iter().all(|r| r.outreach_kind == OutreachKind::Carryover));
        assert!(outcome.outreach[..3].iter().all(|r| r.contact_stage == ContactStage::Reminder1));
        let pending = lists[0].records.iter().filter(|r| r.status == Status::Pending).count();
        assert_eq!(pending, 15);
    }

    #[test]
    fn test_integrity_failure_leaves_lists_untouched() {
        let mut lists = vec![site("MGB", 12), site("VUMC", 12)];
        lists[1].records[4].verification_id = "SOMEONE-ELSE".to_string();
        let before = lists.clone();
        let options = CycleOptions {
            target: 6,
            trim: None,
            cycle_date: cycle_date(),
        };
        let err = run_cycle(&mut lists, &[], &config(), &options, &mut ChaCha8Rng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, RecruitError::IntegrityViolation { ref site, .. } if site == "VUMC"));
        assert_eq!(lists, before);
    }

    #[test]
    fn test_missing_age_window_is_missing_config() {
        let mut lists = vec![site("MGB", 6)];
        let options = CycleOptions {
            target: 1,
            trim: None,
            cycle_date: cycle_date(),
        };
        let err = run_cycle(&mut lists, &[], &StudyConfig::default(), &options, &mut ChaCha8Rng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, RecruitError::MissingConfig(ref key) if key == "AGE_MIN"));
    }
}
