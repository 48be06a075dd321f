use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::record::ParticipantRecord;
use crate::RecruitError;

/// One site's master list: the full working copy of its records.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterList {
    pub site: String,
    pub path: PathBuf,
    pub records: Vec<ParticipantRecord>,
}

impl MasterList {
    pub fn new(site: &str, path: PathBuf) -> Self {
        Self {
            site: site.to_string(),
            path,
            records: Vec::new(),
        }
    }

    /// `parsed_<site>_master_list.csv` inside `dir`.
    pub fn path_for(dir: &Path, site: &str) -> PathBuf {
        dir.join(format!("parsed_{}_master_list.csv", site.to_ascii_lowercase()))
    }

    /// Read a master list. A missing file is `MissingStore`; a repeated id is
    /// `DuplicateIdentifier`, since the list can no longer be trusted as keyed.
    pub fn load(site: &str, path: &Path) -> Result<Self, RecruitError> {
        if !path.exists() {
            return Err(RecruitError::MissingStore(path.to_path_buf()));
        }
        let records: Vec<ParticipantRecord> = read_rows(path)?;
        let mut seen = rustc_hash::FxHashSet::default();
        for record in &records {
            if !seen.insert(record.offspring_id.as_str()) {
                return Err(RecruitError::DuplicateIdentifier(record.offspring_id.clone()));
            }
        }
        tracing::debug!(site, records = records.len(), path = %path.display(), "loaded master list");
        Ok(Self {
            site: site.to_string(),
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn position(&self, offspring_id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.offspring_id == offspring_id)
    }

    pub fn contains(&self, offspring_id: &str) -> bool {
        self.position(offspring_id).is_some()
    }

    /// Add a record, refusing ids already present.
    pub fn insert(&mut self, record: ParticipantRecord) -> Result<(), RecruitError> {
        if self.contains(&record.offspring_id) {
            return Err(RecruitError::DuplicateIdentifier(record.offspring_id));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn next_insertion_order(&self) -> u64 {
        self.records
            .iter()
            .map(|r| r.insertion_order)
            .max()
            .map_or(1, |m| m + 1)
    }

    /// Snapshot the current file (if any) into `backup_dir`, then replace it.
    pub fn save(&self, backup_dir: &Path, label: &str) -> Result<Option<PathBuf>, RecruitError> {
        let snapshot_path = if self.path.exists() {
            Some(snapshot(&self.path, backup_dir, label)?)
        } else {
            None
        };
        let mut rows: Vec<&ParticipantRecord> = self.records.iter().collect();
        rows.sort_by_key(|r| r.insertion_order);
        write_rows(&self.path, &rows)?;
        tracing::info!(site = %self.site, records = rows.len(), path = %self.path.display(), "master list saved");
        Ok(snapshot_path)
    }
}

pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RecruitError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Write rows to a temporary sibling file and rename it over `path`.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), RecruitError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_path_for(path);
    {
        let mut writer = csv::Writer::from_path(&temp_path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Copy `path` into `backup_dir` and check the copy before anything overwrites the original.
pub fn snapshot(path: &Path, backup_dir: &Path, label: &str) -> Result<PathBuf, RecruitError> {
    fs::create_dir_all(backup_dir)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    let backup_path = backup_dir.join(format!("{}_{}.csv", stem, label));
    fs::copy(path, &backup_path)?;

    let original_len = fs::metadata(path)?.len();
    let copy_len = fs::metadata(&backup_path)?.len();
    if copy_len == 0 || copy_len != original_len {
        return Err(RecruitError::Other(format!(
            "Backup failed validation: {}",
            backup_path.display()
        )));
    }
    tracing::info!(backup = %backup_path.display(), "backup validated");
    Ok(backup_path)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContactStage, Status};
    use crate::testing::{cycle_date, record};

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = MasterList::path_for(temp_dir.path(), "MGB");
        let mut list = MasterList::new("MGB", path.clone());
        let mut pending = record("C2", "M1");
        pending.insertion_order = 2;
        pending.status = Status::Pending;
        pending.contact_stage = ContactStage::Reminder1;
        pending.last_contact_date = Some(cycle_date());
        list.insert(pending).unwrap();
        let mut first = record("C1", "M1");
        first.insertion_order = 1;
        list.insert(first).unwrap();

        let backup = list.save(&temp_dir.path().join("backups"), "t0").unwrap();
        assert!(backup.is_none(), "Nothing to back up on first write");
        assert!(path.ends_with("parsed_mgb_master_list.csv"));

        let loaded = MasterList::load("MGB", &path).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].offspring_id, "C1", "Rows are written in insertion order");
        assert_eq!(loaded.records[1].contact_stage, ContactStage::Reminder1);
        assert_eq!(loaded.records[1].last_contact_date, Some(cycle_date()));
        assert_eq!(loaded.records[0].last_contact_date, None);
        assert_eq!(loaded.next_insertion_order(), 3);
    }

    #[test]
    fn test_second_save_snapshots_prior_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("parsed_vumc_master_list.csv");
        let backups = temp_dir.path().join("backups");
        let mut list = MasterList::new("VUMC", path.clone());
        list.insert(record("C1", "M1")).unwrap();
        list.save(&backups, "first").unwrap();

        list.insert(record("C2", "M2")).unwrap();
        let backup = list.save(&backups, "second").unwrap().unwrap();
        assert_eq!(read_rows::<ParticipantRecord>(&backup).unwrap().len(), 1);
        assert_eq!(read_rows::<ParticipantRecord>(&path).unwrap().len(), 2);
        assert!(!temp_dir.path().join("parsed_vumc_master_list.csv.tmp").exists());
    }

    #[test]
    fn test_missing_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = MasterList::load("MGB", &temp_dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, RecruitError::MissingStore(_)));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut list = MasterList::new("MGB", PathBuf::from("unused.csv"));
        list.insert(record("C1", "M1")).unwrap();
        let err = list.insert(record("C1", "M9")).unwrap_err();
        assert!(matches!(err, RecruitError::DuplicateIdentifier(ref id) if id == "C1"));
        assert_eq!(list.records.len(), 1);
    }

    #[test]
    fn test_load_rejects_duplicate_ids_in_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("dup.csv");
        write_rows(&path, &[record("C1", "M1"), record("C1", "M1")]).unwrap();
        let err = MasterList::load("MGB", &path).unwrap_err();
        assert!(matches!(err, RecruitError::DuplicateIdentifier(_)));
    }
}
