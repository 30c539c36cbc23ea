//! Filesystem destination: copy a prepared study into a directory derived
//! from its attributes.

use std::path::{Path, PathBuf};

use tracing::debug;

use studyrelay_dicom::{dictionary, AttributeSet};

use crate::clients::study_files;
use crate::error::{Result, RouterError};

pub struct FilesystemClient {
    base_path: PathBuf,
    directory_pattern: String,
    naming_pattern: String,
    organize_by_listener: bool,
}

impl FilesystemClient {
    pub fn new(
        base_path: PathBuf,
        directory_pattern: String,
        naming_pattern: String,
        organize_by_listener: bool,
    ) -> Self {
        Self {
            base_path,
            directory_pattern,
            naming_pattern,
            organize_by_listener,
        }
    }

    /// The path exists (created on demand) and is writable.
    pub async fn probe(&self) -> Result<()> {
        let base = self.base_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&base)?;
            let probe = base.join(".studyrelay-probe");
            std::fs::write(&probe, b"probe")?;
            std::fs::remove_file(&probe)?;
            Ok(())
        })
        .await
        .map_err(|e| RouterError::DestinationUnavailable(format!("probe task failed: {e}")))?
        .map_err(|e| RouterError::DestinationUnavailable(e.to_string()))
    }

    pub async fn send(
        &self,
        study_dir: &Path,
        attrs: &AttributeSet,
        listener_ae: &str,
    ) -> Result<usize> {
        let mut target = self.base_path.clone();
        if self.organize_by_listener {
            target = target.join(sanitize(listener_ae));
        }
        if !self.directory_pattern.is_empty() {
            for part in expand_pattern(&self.directory_pattern, attrs).split('/') {
                if !part.is_empty() {
                    target = target.join(part);
                }
            }
        }

        let files = study_files(study_dir)?;
        let study_dir = study_dir.to_path_buf();
        let naming = self.naming_pattern.clone();
        let attrs = attrs.clone();
        let copied = tokio::task::spawn_blocking(move || -> Result<usize> {
            std::fs::create_dir_all(&target)?;
            let mut copied = 0usize;
            for (index, file) in files.iter().enumerate() {
                let dest = if naming.is_empty() {
                    // Preserve the study's internal series layout.
                    let rel = file.strip_prefix(&study_dir).unwrap_or(file);
                    let dest = target.join(rel);
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    dest
                } else {
                    let stem = expand_pattern(&naming, &attrs);
                    target.join(format!("{stem}_{:05}.dcm", index + 1))
                };
                std::fs::copy(file, &dest)?;
                copied += 1;
            }
            Ok(copied)
        })
        .await
        .map_err(|e| RouterError::Delivery(format!("copy task failed: {e}")))??;

        debug!(files = copied, "Study copied to filesystem destination");
        Ok(copied)
    }
}

/// Expand `{TagName}` placeholders against the study's attributes.
/// Unknown tags and empty values become `UNKNOWN`; expansions are
/// sanitized to `[A-Za-z0-9_]` with `_` for everything else.
pub fn expand_pattern(pattern: &str, attrs: &AttributeSet) -> String {
    let mut out = String::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = after[..close].trim();
                let value = dictionary::resolve(name)
                    .and_then(|tag| attrs.string(tag))
                    .filter(|v| !v.is_empty())
                    .map(sanitize)
                    .unwrap_or_else(|| "UNKNOWN".to_string());
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyrelay_dicom::dictionary::tags;
    use studyrelay_dicom::Vr;
    use tempfile::TempDir;

    fn attrs() -> AttributeSet {
        let mut ds = AttributeSet::new();
        ds.put_string(tags::PATIENT_ID, Vr::Lo, "P1");
        ds.put_string(tags::STUDY_DATE, Vr::Da, "20240115");
        ds.put_string(tags::MODALITY, Vr::Cs, "CT");
        ds
    }

    #[test]
    fn pattern_expansion() {
        let out = expand_pattern("{PatientID}/{StudyDate}_{StudyTime}", &attrs());
        assert_eq!(out, "P1/20240115_UNKNOWN");
        let out = expand_pattern("{Modality}-{NoSuchTag}", &attrs());
        assert_eq!(out, "CT-UNKNOWN");
    }

    #[test]
    fn expansion_sanitizes_values() {
        let mut ds = attrs();
        ds.put_string(tags::PATIENT_ID, Vr::Lo, "P/1^B");
        assert_eq!(expand_pattern("{PatientID}", &ds), "P_1_B");
    }

    #[tokio::test]
    async fn send_copies_into_expanded_directory() {
        let dir = TempDir::new().unwrap();
        let study = dir.path().join("study");
        std::fs::create_dir_all(study.join("series1")).unwrap();
        std::fs::write(study.join("series1/a.dcm"), b"aa").unwrap();
        std::fs::write(study.join("series1/b.dcm"), b"bb").unwrap();

        let client = FilesystemClient::new(
            dir.path().join("dest"),
            "{PatientID}/{StudyDate}_{StudyTime}".into(),
            String::new(),
            true,
        );
        client.probe().await.unwrap();
        let copied = client.send(&study, &attrs(), "R1").await.unwrap();
        assert_eq!(copied, 2);

        let target = dir.path().join("dest/R1/P1/20240115_UNKNOWN");
        assert!(target.join("series1/a.dcm").is_file());
        assert!(target.join("series1/b.dcm").is_file());
    }

    #[tokio::test]
    async fn naming_pattern_flattens_files() {
        let dir = TempDir::new().unwrap();
        let study = dir.path().join("study");
        std::fs::create_dir_all(&study).unwrap();
        std::fs::write(study.join("a.dcm"), b"aa").unwrap();
        std::fs::write(study.join("b.dcm"), b"bb").unwrap();

        let client = FilesystemClient::new(
            dir.path().join("dest"),
            String::new(),
            "{Modality}_{PatientID}".into(),
            false,
        );
        let copied = client.send(&study, &attrs(), "R1").await.unwrap();
        assert_eq!(copied, 2);
        assert!(dir.path().join("dest/CT_P1_00001.dcm").is_file());
        assert!(dir.path().join("dest/CT_P1_00002.dcm").is_file());
    }
}
