//! Archive layout and retention:
//!
//! ```text
//! {base}/{listenerAE}/archive/{YYYY-MM-DD}/study_{sanitized-uid}/
//!   original/                      # unmodified received copies
//!   anonymized/                    # present iff some destination anonymized
//!   destinations/{name}.json       # per-destination status blob
//!   audit_report.json              # optional audit diff output
//!   archive_metadata.json
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use studyrelay_common::DestinationDelivery;

use crate::error::{ArchiveError, Result};

/// `archive_metadata.json` schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub study_uid: String,
    pub listener_ae: String,
    #[serde(default)]
    pub calling_peer: Option<String>,
    pub archived_at: DateTime<Utc>,
    #[serde(default)]
    pub anonymized_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audit_generated_at: Option<DateTime<Utc>>,
    pub original_file_count: usize,
    pub anonymized_file_count: usize,
    #[serde(default)]
    pub script_name: Option<String>,
    #[serde(default)]
    pub phi_fields_modified: Option<usize>,
    #[serde(default)]
    pub conformance_issues: Option<usize>,
    #[serde(default)]
    pub broker_name: Option<String>,
    pub hash_uids_enabled: bool,
    /// Terminal note for non-delivered studies (filtered, rejected).
    #[serde(default)]
    pub outcome: Option<String>,
}

/// A handle to one archived study directory.
#[derive(Debug, Clone)]
pub struct ArchivedStudy {
    dir: PathBuf,
    study_uid: String,
    listener_ae: String,
}

impl ArchivedStudy {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn original_dir(&self) -> PathBuf {
        self.dir.join("original")
    }

    pub fn anonymized_dir(&self) -> PathBuf {
        self.dir.join("anonymized")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("archive_metadata.json")
    }

    pub fn audit_report_path(&self) -> PathBuf {
        self.dir.join("audit_report.json")
    }

    /// Copy an anonymized snapshot alongside the original.
    pub fn add_anonymized(&self, source_dir: &Path) -> Result<usize> {
        let dest = self.anonymized_dir();
        let copied = copy_tree(source_dir, &dest)?;
        info!(
            study = %self.study_uid,
            listener = %self.listener_ae,
            files = copied,
            "Anonymized snapshot archived"
        );
        Ok(copied)
    }

    /// Persist one destination's delivery status blob.
    pub fn write_destination_status(
        &self,
        destination: &str,
        status: &DestinationDelivery,
    ) -> Result<()> {
        let dir = self.dir.join("destinations");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", sanitize_uid(destination)));
        write_json(&path, status)
    }

    pub fn read_destination_status(&self, destination: &str) -> Result<DestinationDelivery> {
        let path = self
            .dir
            .join("destinations")
            .join(format!("{}.json", sanitize_uid(destination)));
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_metadata(&self, metadata: &ArchiveMetadata) -> Result<()> {
        write_json(&self.metadata_path(), metadata)
    }

    pub fn read_metadata(&self) -> Result<ArchiveMetadata> {
        let raw = std::fs::read_to_string(self.metadata_path())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Attach an audit report (any serializable report shape).
    pub fn write_audit_report<T: Serialize>(&self, report: &T) -> Result<()> {
        write_json(&self.audit_report_path(), report)
    }
}

pub struct ArchiveManager {
    base: PathBuf,
}

impl ArchiveManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn archive_root(&self, listener_ae: &str) -> PathBuf {
        self.base.join(sanitize_uid(listener_ae)).join("archive")
    }

    /// Snapshot a study's received files under today's date directory.
    /// This must complete before any destination delivery begins.
    pub fn archive_original(
        &self,
        listener_ae: &str,
        study_uid: &str,
        source_dir: &Path,
        calling_peer: Option<&str>,
    ) -> Result<ArchivedStudy> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let dir = self
            .archive_root(listener_ae)
            .join(date)
            .join(format!("study_{}", sanitize_uid(study_uid)));
        let copied = copy_tree(source_dir, &dir.join("original"))?;

        let study = ArchivedStudy {
            dir,
            study_uid: study_uid.to_string(),
            listener_ae: listener_ae.to_string(),
        };
        study.write_metadata(&ArchiveMetadata {
            study_uid: study_uid.to_string(),
            listener_ae: listener_ae.to_string(),
            calling_peer: calling_peer.map(str::to_string),
            archived_at: Utc::now(),
            anonymized_at: None,
            audit_generated_at: None,
            original_file_count: copied,
            anonymized_file_count: 0,
            script_name: None,
            phi_fields_modified: None,
            conformance_issues: None,
            broker_name: None,
            hash_uids_enabled: false,
            outcome: None,
        })?;
        info!(
            study = %study_uid,
            listener = %listener_ae,
            files = copied,
            "Original snapshot archived"
        );
        Ok(study)
    }

    /// Find an archived study by scanning date directories newest-first.
    pub fn locate(&self, listener_ae: &str, study_uid: &str) -> Result<ArchivedStudy> {
        let root = self.archive_root(listener_ae);
        let needle = format!("study_{}", sanitize_uid(study_uid));

        let mut dates: Vec<PathBuf> = match std::fs::read_dir(&root) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(_) => Vec::new(),
        };
        dates.sort();
        for date_dir in dates.iter().rev() {
            let candidate = date_dir.join(&needle);
            if candidate.is_dir() {
                return Ok(ArchivedStudy {
                    dir: candidate,
                    study_uid: study_uid.to_string(),
                    listener_ae: listener_ae.to_string(),
                });
            }
        }
        Err(ArchiveError::NotFound {
            listener: listener_ae.to_string(),
            study_uid: study_uid.to_string(),
        })
    }

    /// Delete date directories strictly older than `today − retention_days`,
    /// removing each study subdirectory before the date directory itself.
    pub fn cleanup(&self, listener_ae: &str, retention_days: u32) -> Result<usize> {
        let root = self.archive_root(listener_ae);
        if !root.is_dir() {
            return Ok(0);
        }
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(retention_days as i64);
        let mut removed = 0usize;

        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
                warn!(dir = %path.display(), "Skipping non-date directory in archive");
                continue;
            };
            if date >= cutoff {
                continue;
            }
            for study in std::fs::read_dir(&path)? {
                let study = study?;
                if study.path().is_dir() {
                    std::fs::remove_dir_all(study.path())?;
                    removed += 1;
                } else {
                    std::fs::remove_file(study.path())?;
                }
            }
            std::fs::remove_dir(&path)?;
            info!(listener = %listener_ae, date = %name, removed, "Archive retention cleanup");
        }
        Ok(removed)
    }
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_uid(uid: &str) -> String {
    uid.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> Result<usize> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0usize;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyrelay_common::DestinationState;
    use tempfile::TempDir;

    fn seed_study(dir: &TempDir) -> PathBuf {
        let src = dir.path().join("incoming/1.2.3");
        std::fs::create_dir_all(src.join("series1")).unwrap();
        std::fs::write(src.join("series1/a.dcm"), b"aaaa").unwrap();
        std::fs::write(src.join("series1/b.dcm"), b"bb").unwrap();
        src
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_uid("1.2.840.10008"), "1.2.840.10008");
        assert_eq!(sanitize_uid("1.2^3/4"), "1.2_3_4");
        assert_eq!(sanitize_uid("a-b.c"), "a-b.c");
    }

    #[test]
    fn archive_original_lays_out_study() {
        let dir = TempDir::new().unwrap();
        let src = seed_study(&dir);
        let manager = ArchiveManager::new(dir.path().join("base"));

        let study = manager
            .archive_original("R1", "1.2.3", &src, Some("MODALITY"))
            .unwrap();
        assert!(study.original_dir().join("series1/a.dcm").is_file());
        assert!(study.original_dir().join("series1/b.dcm").is_file());

        let metadata = study.read_metadata().unwrap();
        assert_eq!(metadata.original_file_count, 2);
        assert_eq!(metadata.calling_peer.as_deref(), Some("MODALITY"));

        // Byte-for-byte copy of the original.
        assert_eq!(
            std::fs::read(study.original_dir().join("series1/a.dcm")).unwrap(),
            b"aaaa"
        );
    }

    #[test]
    fn locate_scans_newest_first() {
        let dir = TempDir::new().unwrap();
        let manager = ArchiveManager::new(dir.path().join("base"));
        let root = dir.path().join("base/R1/archive");
        for date in ["2024-01-01", "2024-03-05"] {
            std::fs::create_dir_all(root.join(date).join("study_1.2.3/original")).unwrap();
        }

        let found = manager.locate("R1", "1.2.3").unwrap();
        assert!(found.dir().starts_with(root.join("2024-03-05")));
        assert!(matches!(
            manager.locate("R1", "9.9.9"),
            Err(ArchiveError::NotFound { .. })
        ));
    }

    #[test]
    fn destination_status_round_trips() {
        let dir = TempDir::new().unwrap();
        let src = seed_study(&dir);
        let manager = ArchiveManager::new(dir.path().join("base"));
        let study = manager.archive_original("R1", "1.2.3", &src, None).unwrap();

        let status = DestinationDelivery {
            state: DestinationState::Success,
            attempts: 2,
            files_transferred: 2,
            ..Default::default()
        };
        study.write_destination_status("xnat", &status).unwrap();
        let read = study.read_destination_status("xnat").unwrap();
        assert_eq!(read.state, DestinationState::Success);
        assert_eq!(read.attempts, 2);
    }

    #[test]
    fn cleanup_removes_only_stale_dates() {
        let dir = TempDir::new().unwrap();
        let manager = ArchiveManager::new(dir.path().join("base"));
        let root = dir.path().join("base/R1/archive");

        let stale = (Utc::now().date_naive() - chrono::Duration::days(40))
            .format("%Y-%m-%d")
            .to_string();
        let fresh = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        for date in [&stale, &fresh] {
            let study = root.join(date).join("study_1.2.3");
            std::fs::create_dir_all(study.join("original")).unwrap();
            std::fs::write(study.join("original/a.dcm"), b"x").unwrap();
        }

        let removed = manager.cleanup("R1", 30).unwrap();
        assert_eq!(removed, 1);
        assert!(!root.join(&stale).exists());
        assert!(root.join(&fresh).join("study_1.2.3").is_dir());
    }
}
