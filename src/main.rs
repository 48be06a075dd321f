use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use recruit::config::{update_config_file, StudyConfig, DEFAULT_CONFIG_FILE};
use recruit::cycle::{check_cycle_timing, load_sites, run_cycle, write_outputs, CycleOptions};
use recruit::ingest::{merge_feed, read_feed, site_from_filename};
use recruit::integrity::{ensure_intact, format_violations, verify};
use recruit::scheduler::StatusUpdate;
use recruit::store::{read_rows, MasterList};
use recruit::summary::{render_status, status_tally};
use recruit::RecruitError;

#[derive(Parser)]
#[command(name = "recruit")]
#[command(about = "Monthly recruitment allocation for the offspring cohort", long_about = None)]
struct Cli {
    /// Study constants file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a site's source feed into its master list
    Ingest {
        /// Feed CSV exported from the medical record system
        feed: PathBuf,
        /// Site name; inferred from the feed file name when omitted
        #[arg(long)]
        site: Option<String>,
        /// Run as of this date (YYYY-MM-DD) instead of today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run a recruitment cycle and write the outreach list
    Cycle {
        /// Fresh invitations to send across all sites
        #[arg(long)]
        visits: usize,
        /// Shrink the eligible pool to this size before selecting
        #[arg(long)]
        trim: Option<usize>,
        /// Last cycle's outreach list, edited with current statuses
        #[arg(long)]
        prior_list: Option<PathBuf>,
        /// Continue when a site's master list is missing
        #[arg(long)]
        allow_single_site: bool,
        /// Seed for reproducible selection
        #[arg(long)]
        seed: Option<u64>,
        /// Run as of this date (YYYY-MM-DD) instead of today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Run even when the date is off-cycle
        #[arg(long)]
        force: bool,
    },
    /// Check every master list's integrity without changing anything
    Verify,
    /// Print per-category status counts for each site
    Status,
}

fn main() -> ExitCode {
    recruit::init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RecruitError> {
    let config = StudyConfig::load(&cli.config)?;
    match cli.command {
        Commands::Ingest { feed, site, date } => ingest(&cli.config, &config, &feed, site, date),
        Commands::Cycle {
            visits,
            trim,
            prior_list,
            allow_single_site,
            seed,
            date,
            force,
        } => {
            let cycle_date = date.unwrap_or_else(|| Local::now().date_naive());
            let position = check_cycle_timing(&config, cycle_date, force)?;
            let (mut lists, skipped) = load_sites(&config, allow_single_site)?;

            let updates: Vec<StatusUpdate> = match prior_list {
                Some(path) if !path.exists() => {
                    return Err(RecruitError::InvalidInput(format!(
                        "prior list {} not found",
                        path.display()
                    )));
                }
                Some(path) => read_rows(&path)?,
                None => Vec::new(),
            };

            let mut rng = match seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            };
            let options = CycleOptions {
                target: visits,
                trim,
                cycle_date,
            };
            let mut outcome = run_cycle(&mut lists, &updates, &config, &options, &mut rng)?;
            outcome.summary.month = position.map(|p| p.month);
            outcome.summary.day_offset = position.map(|p| p.day_offset);
            outcome.summary.skipped_sites = skipped;

            let artifacts = write_outputs(&lists, &outcome, &config, cycle_date)?;
            println!("{}", outcome.summary.render());
            for backup in &artifacts.backups {
                println!("Backup: {}", backup.display());
            }
            println!("Outreach list: {}", artifacts.outreach.display());
            println!("Summary: {}", artifacts.summary.display());
            Ok(())
        }
        Commands::Verify => {
            let mut failed = 0usize;
            for (site, list) in present_sites(&config)? {
                let violations = verify(&list.records);
                if violations.is_empty() {
                    println!("{}: OK ({} records)", site, list.records.len());
                } else {
                    failed += 1;
                    println!("{}: {} integrity violation(s)", site, violations.len());
                    for line in format_violations(&violations) {
                        println!("  {}", line);
                    }
                }
            }
            if failed > 0 {
                return Err(RecruitError::Other(format!(
                    "{} site(s) failed the integrity check",
                    failed
                )));
            }
            Ok(())
        }
        Commands::Status => {
            for (site, list) in present_sites(&config)? {
                println!("\nSite: {} ({} records)", site, list.records.len());
                print!("{}", render_status(&status_tally(&list.records)));
            }
            Ok(())
        }
    }
}

fn ingest(
    config_path: &Path,
    config: &StudyConfig,
    feed: &Path,
    site: Option<String>,
    date: Option<NaiveDate>,
) -> Result<(), RecruitError> {
    let window = config.age_window()?;
    let site = match site {
        Some(site) => site.to_ascii_uppercase(),
        None => site_from_filename(feed, &config.sites()).ok_or_else(|| {
            RecruitError::InvalidInput(format!(
                "cannot tell the site from {}; pass --site",
                feed.display()
            ))
        })?,
    };
    let today = date.unwrap_or_else(|| Local::now().date_naive());

    let path = MasterList::path_for(&config.output_dir(), &site);
    let mut list = if path.exists() {
        MasterList::load(&site, &path)?
    } else {
        println!("No master list for {} yet, starting a new one at {}", site, path.display());
        MasterList::new(&site, path)
    };
    ensure_intact(&list.site, &list.records)?;

    let rows = read_feed(feed)?;
    let report = merge_feed(&mut list, rows, today, window);
    let label = format!("pre_ingest_{}", today.format("%Y%m%d"));
    let backup = list.save(&config.backup_dir(), &label)?;

    let mut updates = vec![("LAST_UPDATE", today.format("%Y-%m-%d").to_string())];
    if config.start_date()?.is_none() {
        updates.push(("START_DATE", today.format("%Y-%m-%d").to_string()));
        println!("Set study START_DATE to {}", today);
    }
    update_config_file(config_path, &updates)?;

    println!("\n--- UPDATE SUMMARY: {} ---", site);
    println!(
        "Previous: {} offspring, {} mothers",
        report.previous_offspring, report.previous_mothers
    );
    println!(
        "Updated:  {} offspring, {} mothers",
        report.current_offspring, report.current_mothers
    );
    println!("Added: {}   Removed: {}", report.added, report.removed);
    if report.duplicates > 0 || report.unreadable > 0 {
        println!(
            "Skipped: {} duplicate id(s), {} unreadable row(s)",
            report.duplicates, report.unreadable
        );
    }
    if let Some(backup) = backup {
        println!("Backup: {}", backup.display());
    }
    println!("Master list: {}", list.path.display());
    Ok(())
}

/// Every configured site whose master list exists; missing ones are noted and skipped.
fn present_sites(config: &StudyConfig) -> Result<Vec<(String, MasterList)>, RecruitError> {
    let mut out = Vec::new();
    for site in config.sites() {
        let path = MasterList::path_for(&config.output_dir(), &site);
        if !path.exists() {
            println!("{}: no master list at {}", site, path.display());
            continue;
        }
        let list = MasterList::load(&site, &path)?;
        out.push((site, list));
    }
    Ok(out)
}
