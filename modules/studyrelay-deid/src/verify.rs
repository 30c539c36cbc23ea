//! The pre-write verification gate.
//!
//! The executor re-reads the input independently, applies the script to
//! one copy, and runs these checks between the untouched snapshot and the
//! candidate output. Nothing is written unless every enabled check passes.

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use studyrelay_dicom::dictionary::tags;
use studyrelay_dicom::{AttributeSet, Tag};

use crate::script::AnonymizationScript;

/// Which checks run and what date shift to expect. All checks are on by
/// default; each can be toggled independently.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub check_uids: bool,
    pub check_patient_identity: bool,
    pub check_dates: bool,
    /// Expected whole-day shift for dated attributes the script does not
    /// itself shift (the broker's allocation). None means no shift.
    pub expected_shift_days: Option<i64>,
    /// 0 by default; 1 absorbs timezone-boundary drift.
    pub tolerance_days: i64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            check_uids: true,
            check_patient_identity: true,
            check_dates: true,
            expected_shift_days: None,
            tolerance_days: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    UidsChanged,
    PatientIdentifiersModified,
    DateShift,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub passed: bool,
    pub detail: String,
}

/// Per-instance verification outcome with bounded diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub sop_uid: String,
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// One line naming the failed checks.
    pub fn summary(&self) -> String {
        let failed: Vec<&str> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.detail.as_str())
            .collect();
        if failed.is_empty() {
            "all checks passed".to_string()
        } else {
            failed.join("; ")
        }
    }
}

const UID_TAGS: &[(Tag, &str)] = &[
    (tags::STUDY_INSTANCE_UID, "StudyInstanceUID"),
    (tags::SERIES_INSTANCE_UID, "SeriesInstanceUID"),
    (tags::SOP_INSTANCE_UID, "SOPInstanceUID"),
];

const DATE_TAGS: &[(Tag, &str)] = &[
    (tags::STUDY_DATE, "StudyDate"),
    (tags::SERIES_DATE, "SeriesDate"),
    (tags::PATIENT_BIRTH_DATE, "PatientBirthDate"),
];

/// Acceptable anonymized patient-name shapes.
pub fn anonymous_name_patterns() -> Vec<Regex> {
    ["^$", "^Anonymous$", "^ANON$", r"^Subject_\d+$", "^[A-Z0-9_]+$"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

pub fn is_anonymous_name(name: &str) -> bool {
    anonymous_name_patterns().iter().any(|re| re.is_match(name))
}

/// Run every enabled check between the pre-anonymization snapshot and the
/// candidate output.
pub fn verify(
    original: &AttributeSet,
    anonymized: &AttributeSet,
    script: &AnonymizationScript,
    opts: &VerifyOptions,
) -> VerificationReport {
    let mut checks = Vec::new();

    if opts.check_uids {
        checks.push(check_uids(original, anonymized));
    }
    if opts.check_patient_identity {
        checks.push(check_patient_identity(original, anonymized));
    }
    if opts.check_dates {
        checks.push(check_dates(original, anonymized, script, opts));
    }

    VerificationReport {
        sop_uid: original.sop_uid().unwrap_or_default().to_string(),
        checks,
    }
}

fn check_uids(original: &AttributeSet, anonymized: &AttributeSet) -> CheckResult {
    let mut unchanged = Vec::new();
    for (tag, name) in UID_TAGS {
        let before = original.string(*tag).unwrap_or_default();
        if before.is_empty() {
            continue;
        }
        let after = anonymized.string(*tag).unwrap_or_default();
        if before == after {
            unchanged.push(*name);
        }
    }
    if unchanged.is_empty() {
        CheckResult {
            kind: CheckKind::UidsChanged,
            passed: true,
            detail: "all instance UIDs replaced".to_string(),
        }
    } else {
        CheckResult {
            kind: CheckKind::UidsChanged,
            passed: false,
            detail: format!("PHI-LEAK-RISK: UidNotChanged ({})", unchanged.join(", ")),
        }
    }
}

fn check_patient_identity(original: &AttributeSet, anonymized: &AttributeSet) -> CheckResult {
    let mut problems = Vec::new();

    let name_before = original.patient_name().unwrap_or_default();
    let name_after = anonymized.patient_name().unwrap_or_default();
    if !name_before.is_empty() && name_before == name_after {
        problems.push("PatientName unchanged".to_string());
    }
    if !name_after.is_empty() && !is_anonymous_name(name_after) {
        problems.push(format!("PatientName `{name_after}` is not an anonymous form"));
    }

    let id_before = original.patient_id().unwrap_or_default();
    let id_after = anonymized.patient_id().unwrap_or_default();
    if !id_before.is_empty() && id_before == id_after {
        problems.push("PatientID unchanged".to_string());
    }

    if problems.is_empty() {
        CheckResult {
            kind: CheckKind::PatientIdentifiersModified,
            passed: true,
            detail: "patient identifiers modified".to_string(),
        }
    } else {
        CheckResult {
            kind: CheckKind::PatientIdentifiersModified,
            passed: false,
            detail: problems.join("; "),
        }
    }
}

fn check_dates(
    original: &AttributeSet,
    anonymized: &AttributeSet,
    script: &AnonymizationScript,
    opts: &VerifyOptions,
) -> CheckResult {
    let mut problems = Vec::new();

    for (tag, name) in DATE_TAGS {
        let before = original.string(*tag).unwrap_or_default();
        if before.is_empty() {
            continue;
        }
        let after = anonymized.string(*tag).unwrap_or_default();

        if after.is_empty() {
            if !script.clears(*tag) {
                problems.push(format!("DateCleared: {name} removed without clear intent"));
            }
            continue;
        }

        let expected = script
            .shift_for(*tag)
            .or(opts.expected_shift_days)
            .unwrap_or(0);
        match (parse_date8(before), parse_date8(after)) {
            (Some(b), Some(a)) => {
                let actual = (a - b).num_days();
                if (actual - expected).abs() > opts.tolerance_days {
                    problems.push(format!(
                        "{name} shifted by {actual} days, expected {expected}"
                    ));
                }
            }
            _ => problems.push(format!("{name} no longer parses as a date")),
        }
    }

    if problems.is_empty() {
        CheckResult {
            kind: CheckKind::DateShift,
            passed: true,
            detail: "date shifts correct".to_string(),
        }
    } else {
        CheckResult {
            kind: CheckKind::DateShift,
            passed: false,
            detail: problems.join("; "),
        }
    }
}

pub(crate) fn parse_date8(value: &str) -> Option<NaiveDate> {
    if value.len() < 8 {
        return None;
    }
    NaiveDate::parse_from_str(&value[..8], "%Y%m%d").ok()
}
