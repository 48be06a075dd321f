#![allow(dead_code)]

use chrono::NaiveDate;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use recruit::config::StudyConfig;
use recruit::ingest::{merge_feed, read_feed};
use recruit::store::MasterList;

pub const FEED_HEADER: &str = "mother_MRN,mother_last,mother_first,mother_phone,offspring_MRN,offspring_last,offspring_first,offspring_sex,offspring_DOB,model_score,model_pctile";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn config_text(dir: &Path) -> String {
    format!(
        "# study constants\n\
         AGE_MIN=2\n\
         AGE_MAX=5\n\
         FOLLOWUP_1_DAYS=7\n\
         FOLLOWUP_2_DAYS=30\n\
         FOLLOWUP_3_DAYS=90\n\
         S1_WEIGHT=0.3\n\
         S2_WEIGHT=0.2\n\
         S3_WEIGHT=0.2\n\
         S4_WEIGHT=0.1\n\
         S5_WEIGHT=0.1\n\
         S6_WEIGHT=0.1\n\
         OUTPUT_DIR={}\n\
         BACKUP_DIR={}\n",
        dir.join("outputs").display(),
        dir.join("backups").display()
    )
}

pub fn config_for(dir: &Path) -> StudyConfig {
    StudyConfig::parse(&config_text(dir))
}

/// Feed with `n` children of distinct mothers, spread over all six strata.
/// Every child is three years old on 2024-06-01.
pub fn write_feed(path: &Path, prefix: &str, n: usize) -> PathBuf {
    let pctiles = ["99", "93", "85", "60", "30", "5"];
    let mut text = String::from(FEED_HEADER);
    text.push('\n');
    for i in 0..n {
        let _ = writeln!(
            text,
            "{p}M{i},Last{i},First{i},555-{i:04},{p}C{i},Kid{i},Name{i},F,2021-06-01,0.5,{pct}",
            p = prefix,
            i = i,
            pct = pctiles[i % pctiles.len()]
        );
    }
    fs::write(path, text).unwrap();
    path.to_path_buf()
}

/// Ingest a fresh feed for `site` and save its master list.
pub fn ingest_site(config: &StudyConfig, dir: &Path, site: &str, n: usize, today: NaiveDate) -> MasterList {
    let feed = write_feed(&dir.join(format!("{}_feed.csv", site.to_lowercase())), site, n);
    let path = MasterList::path_for(&config.output_dir(), site);
    let mut list = if path.exists() {
        MasterList::load(site, &path).unwrap()
    } else {
        MasterList::new(site, path)
    };
    merge_feed(&mut list, read_feed(&feed).unwrap(), today, config.age_window().unwrap());
    list.save(&config.backup_dir(), "test").unwrap();
    list
}
