//! Original-vs-anonymized audit diff.
//!
//! Walks both archive snapshots, pairs files by relative path, and proves
//! (or disproves) that de-identification conformed to the declared script.
//! The audit only ever receives paths; it holds no reference back into the
//! archive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use studyrelay_dicom::dictionary::tags;
use studyrelay_dicom::{codec, AttributeSet, AttributeValue, Tag, Vr};

use crate::error::Result;
use crate::script::{AnonymizationScript, TagExpectation};
use crate::verify::{is_anonymous_name, parse_date8};

/// The fixed PHI tag set the diff treats as sensitive.
pub const PHI_TAGS: &[Tag] = &[
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::OTHER_PATIENT_IDS,
    tags::PATIENT_ADDRESS,
    tags::PATIENT_TELEPHONE_NUMBERS,
    tags::REFERRING_PHYSICIAN_NAME,
    tags::PERFORMING_PHYSICIAN_NAME,
    tags::OPERATORS_NAME,
    tags::INSTITUTION_NAME,
    tags::INSTITUTION_ADDRESS,
    tags::STATION_NAME,
    tags::DEVICE_SERIAL_NUMBER,
    tags::ACCESSION_NUMBER,
    tags::STUDY_DATE,
    tags::SERIES_DATE,
    tags::ACQUISITION_DATE,
    tags::CONTENT_DATE,
];

pub fn is_phi(tag: Tag) -> bool {
    PHI_TAGS.contains(&tag)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Removed,
    Added,
    Hashed,
    Replaced,
}

/// One tag-level difference between an original and its anonymized copy.
#[derive(Debug, Clone, Serialize)]
pub struct TagChange {
    pub tag: String,
    pub action: ChangeAction,
    pub original: Option<String>,
    pub anonymized: Option<String>,
    pub phi: bool,
}

/// Audit of one file pair.
#[derive(Debug, Clone, Serialize)]
pub struct FileAudit {
    pub file: String,
    pub sop_uid: Option<String>,
    pub changes: Vec<TagChange>,
    pub residual_phi: Vec<String>,
    pub conformance_issues: Vec<String>,
    /// PatientIdentityRemoved == "YES" and a non-empty
    /// DeidentificationMethod.
    pub markers_present: bool,
}

impl FileAudit {
    pub fn conformant(&self) -> bool {
        self.conformance_issues.is_empty()
    }
}

/// The aggregated report persisted as `audit_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub files: Vec<FileAudit>,
    /// Count of changes per tag across all files.
    pub change_counts: BTreeMap<String, usize>,
    pub non_conformant_files: usize,
    /// Originals with no anonymized counterpart, unreadable files, and the
    /// like.
    pub errors: Vec<String>,
    pub fully_conformant: bool,
}

impl AuditReport {
    pub fn phi_fields_modified(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.changes)
            .filter(|c| c.phi)
            .count()
    }
}

/// Diff two archive snapshots. The script, when given, supplies the
/// conformance expectations via the same grammar the executor runs.
pub fn audit_directories(
    original_dir: &Path,
    anonymized_dir: &Path,
    script: Option<&AnonymizationScript>,
) -> Result<AuditReport> {
    let expectations = script.map(|s| s.expectations()).unwrap_or_default();

    let mut files = Vec::new();
    let mut errors = Vec::new();
    let mut change_counts: BTreeMap<String, usize> = BTreeMap::new();

    let mut originals = Vec::new();
    collect_files(original_dir, original_dir, &mut originals)?;
    originals.sort();

    for rel in originals {
        let anon_path = anonymized_dir.join(&rel);
        if !anon_path.exists() {
            errors.push(format!("{} has no anonymized counterpart", rel.display()));
            continue;
        }
        let original = match codec::read_file(&original_dir.join(&rel)) {
            Ok(f) => f.dataset,
            Err(e) => {
                errors.push(format!("{}: unreadable original: {e}", rel.display()));
                continue;
            }
        };
        let anonymized = match codec::read_file(&anon_path) {
            Ok(f) => f.dataset,
            Err(e) => {
                errors.push(format!("{}: unreadable anonymized copy: {e}", rel.display()));
                continue;
            }
        };

        let audit = audit_pair(&rel, &original, &anonymized, &expectations);
        for change in &audit.changes {
            *change_counts.entry(change.tag.clone()).or_default() += 1;
        }
        files.push(audit);
    }

    let non_conformant_files = files.iter().filter(|f| !f.conformant()).count();
    let fully_conformant = non_conformant_files == 0 && errors.is_empty();
    Ok(AuditReport {
        generated_at: Utc::now(),
        files,
        change_counts,
        non_conformant_files,
        errors,
        fully_conformant,
    })
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

/// Diff one pair and evaluate conformance.
pub fn audit_pair(
    rel: &Path,
    original: &AttributeSet,
    anonymized: &AttributeSet,
    expectations: &BTreeMap<Tag, TagExpectation>,
) -> FileAudit {
    let mut changes = Vec::new();

    let tag_universe: std::collections::BTreeSet<Tag> = original
        .iter()
        .map(|a| a.tag)
        .chain(anonymized.iter().map(|a| a.tag))
        .collect();

    for tag in tag_universe {
        let before = original.get(tag);
        let after = anonymized.get(tag);
        match (before, after) {
            (Some(b), None) => changes.push(TagChange {
                tag: tag.to_string(),
                action: ChangeAction::Removed,
                original: display_value(&b.value),
                anonymized: None,
                phi: is_phi(tag),
            }),
            (None, Some(a)) => changes.push(TagChange {
                tag: tag.to_string(),
                action: ChangeAction::Added,
                original: None,
                anonymized: display_value(&a.value),
                phi: is_phi(tag),
            }),
            (Some(b), Some(a)) if b.value != a.value => {
                let action = if b.vr == Vr::Ui {
                    ChangeAction::Hashed
                } else {
                    ChangeAction::Replaced
                };
                changes.push(TagChange {
                    tag: tag.to_string(),
                    action,
                    original: display_value(&b.value),
                    anonymized: display_value(&a.value),
                    phi: is_phi(tag),
                });
            }
            _ => {}
        }
    }

    FileAudit {
        file: rel.display().to_string(),
        sop_uid: anonymized.sop_uid().map(str::to_string),
        residual_phi: residual_phi_warnings(original, anonymized),
        conformance_issues: conformance_issues(original, anonymized, expectations),
        markers_present: markers_present(anonymized),
        changes,
    }
}

fn display_value(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Text(s) => Some(s.trim_end_matches(['\0', ' ']).to_string()),
        AttributeValue::Bytes(b) => Some(format!("<{} bytes>", b.len())),
        AttributeValue::Undefined(b) => Some(format!("<{} raw bytes>", b.len())),
    }
}

/// PHI that survived anonymization in a recognizable form.
fn residual_phi_warnings(original: &AttributeSet, anonymized: &AttributeSet) -> Vec<String> {
    let mut warnings = Vec::new();
    for &tag in PHI_TAGS {
        let Some(value) = anonymized.string(tag) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let vr = anonymized.get(tag).map(|a| a.vr);
        match vr {
            Some(Vr::Pn) => {
                if !is_anonymous_name(value) {
                    warnings.push(format!("{tag} retains a non-anonymous name `{value}`"));
                }
            }
            Some(Vr::Da) => {
                if parse_date8(value).is_some() {
                    warnings.push(format!("{tag} still carries a real-looking date"));
                }
            }
            _ => {
                if original.string(tag) == Some(value) {
                    warnings.push(format!("{tag} unchanged from original"));
                }
            }
        }
    }
    warnings
}

/// Check the declared script contract against what actually happened.
fn conformance_issues(
    original: &AttributeSet,
    anonymized: &AttributeSet,
    expectations: &BTreeMap<Tag, TagExpectation>,
) -> Vec<String> {
    let mut issues = Vec::new();
    for (tag, expectation) in expectations {
        let before = original.string(*tag);
        let after = anonymized.string(*tag);
        match expectation {
            TagExpectation::Kept => {
                if before != after {
                    issues.push(format!("{tag} was declared kept but changed"));
                }
            }
            TagExpectation::Removed => {
                if after.is_some_and(|v| !v.is_empty()) {
                    issues.push(format!("{tag} was declared removed but is non-empty"));
                }
            }
            TagExpectation::ReplacedWith(expected) => {
                if before.is_none() && after.is_none() {
                    continue;
                }
                if after != Some(expected.as_str()) {
                    issues.push(format!(
                        "{tag} was declared replaced with `{expected}` but holds `{}`",
                        after.unwrap_or("")
                    ));
                }
            }
            TagExpectation::Hashed => {
                let Some(b) = before else { continue };
                if b.is_empty() {
                    continue;
                }
                match after {
                    Some(a) if !a.is_empty() && a != b => {}
                    _ => issues.push(format!("{tag} was declared hashed but was not replaced")),
                }
            }
            TagExpectation::Shifted(days) => {
                let Some(b) = before.and_then(parse_date8) else {
                    continue;
                };
                match after.and_then(parse_date8) {
                    Some(a) if (a - b).num_days() == *days => {}
                    _ => issues.push(format!("{tag} was declared shifted by {days} days but is not")),
                }
            }
        }
    }
    issues
}

fn markers_present(anonymized: &AttributeSet) -> bool {
    anonymized.string(tags::PATIENT_IDENTITY_REMOVED) == Some("YES")
        && anonymized
            .string(tags::DEIDENTIFICATION_METHOD)
            .is_some_and(|m| !m.is_empty())
}
