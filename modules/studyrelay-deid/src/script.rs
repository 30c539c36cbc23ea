//! The line-oriented anonymization-script language.
//!
//! ```text
//! // identity
//! (0010,0010) := "ANONYMOUS"
//! (0010,0020) := ""
//! (0020,000d) := hashUID[(0020,000d)]
//! (0008,0020) := shiftDateTimeByIncrement[(0008,0020), "-30", "days"]
//! (0010,0040) keep
//! ```
//!
//! Parsing is pure; executors cache parsed scripts by content hash.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use sha2::{Digest, Sha256};

use studyrelay_dicom::dictionary::tags;
use studyrelay_dicom::{AttributeSet, Tag};

use crate::error::{DeidError, Result};

/// One executable operation, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp {
    /// Assign a literal string. The empty literal clears the element.
    Assign { target: Tag, value: String },
    /// Deterministic UID replacement.
    HashUid { target: Tag, source: Tag },
    /// Date arithmetic in whole days; negative shifts into the past.
    ShiftDate { target: Tag, source: Tag, days: i64 },
    /// Assert the element passes through unchanged.
    Keep { tag: Tag },
}

/// A parsed script. Construction fails on the first bad line, so a
/// rejected script can never touch a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymizationScript {
    ops: Vec<ScriptOp>,
    content_hash: String,
}

impl AnonymizationScript {
    pub fn parse(source: &str) -> Result<Self> {
        let mut ops = Vec::new();
        for (idx, raw_line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            ops.push(parse_line(line, line_no)?);
        }
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        Ok(Self {
            ops,
            content_hash: hex::encode(hasher.finalize()),
        })
    }

    pub fn ops(&self) -> &[ScriptOp] {
        &self.ops
    }

    /// Hash of the source text; the executor's parse-cache key.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Per-tag shift the script promises, used by the verification gate.
    pub fn shift_for(&self, tag: Tag) -> Option<i64> {
        self.ops.iter().rev().find_map(|op| match op {
            ScriptOp::ShiftDate { target, days, .. } if *target == tag => Some(*days),
            _ => None,
        })
    }

    /// Whether the script deliberately clears this tag (assigns the empty
    /// literal). Distinguishes intentional date clearing from PHI leaks.
    pub fn clears(&self, tag: Tag) -> bool {
        self.ops.iter().rev().find_map(|op| match op {
            ScriptOp::Assign { target, value } if *target == tag => Some(value.is_empty()),
            _ => None,
        }) == Some(true)
    }

    /// What the script promises per tag, for the audit diff's conformance
    /// pass. Later operations on the same tag supersede earlier ones.
    pub fn expectations(&self) -> BTreeMap<Tag, TagExpectation> {
        let mut map = BTreeMap::new();
        for op in &self.ops {
            match op {
                ScriptOp::Assign { target, value } => {
                    let exp = if value.is_empty() {
                        TagExpectation::Removed
                    } else {
                        TagExpectation::ReplacedWith(value.clone())
                    };
                    map.insert(*target, exp);
                }
                ScriptOp::HashUid { target, .. } => {
                    map.insert(*target, TagExpectation::Hashed);
                }
                ScriptOp::ShiftDate { target, days, .. } => {
                    map.insert(*target, TagExpectation::Shifted(*days));
                }
                ScriptOp::Keep { tag } => {
                    map.insert(*tag, TagExpectation::Kept);
                }
            }
        }
        map
    }
}

/// Conformance contract extracted from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpectation {
    Kept,
    Removed,
    ReplacedWith(String),
    Hashed,
    Shifted(i64),
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b'/' if !in_quotes && i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                return &line[..i];
            }
            _ => {}
        }
        i += 1;
    }
    line
}

fn parse_line(line: &str, line_no: usize) -> Result<ScriptOp> {
    let (target, rest) = take_tag(line, line_no)?;
    let rest = rest.trim_start();

    if rest == "keep" {
        return Ok(ScriptOp::Keep { tag: target });
    }

    let rhs = rest
        .strip_prefix(":=")
        .ok_or_else(|| DeidError::syntax(line_no, "expected `:=` or `keep` after tag"))?
        .trim();

    if let Some(literal) = parse_string_literal(rhs) {
        return Ok(ScriptOp::Assign {
            target,
            value: literal,
        });
    }

    if let Some(args) = rhs.strip_prefix("hashUID") {
        let inner = bracketed(args, line_no)?;
        let (source, tail) = take_tag(inner, line_no)?;
        if !tail.trim().is_empty() {
            return Err(DeidError::syntax(line_no, "unexpected text after hashUID argument"));
        }
        return Ok(ScriptOp::HashUid { target, source });
    }

    if let Some(args) = rhs.strip_prefix("shiftDateTimeByIncrement") {
        let inner = bracketed(args, line_no)?;
        let (source, tail) = take_tag(inner, line_no)?;
        let mut parts = tail.trim_start().strip_prefix(',').map(|t| t.splitn(2, ','));
        let (amount, unit) = match parts.as_mut().and_then(|p| {
            let a = p.next()?.trim().to_string();
            let u = p.next()?.trim().to_string();
            Some((a, u))
        }) {
            Some(pair) => pair,
            None => {
                return Err(DeidError::syntax(
                    line_no,
                    "shiftDateTimeByIncrement expects (tag, \"N\", \"days\")",
                ))
            }
        };
        let days: i64 = parse_string_literal(&amount)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DeidError::syntax(line_no, "shift amount must be a quoted integer"))?;
        match parse_string_literal(&unit).as_deref() {
            Some("days") => {}
            _ => return Err(DeidError::syntax(line_no, "only the \"days\" unit is supported")),
        }
        return Ok(ScriptOp::ShiftDate {
            target,
            source,
            days,
        });
    }

    Err(DeidError::syntax(
        line_no,
        format!("unknown operator: {}", rhs.split(['[', ' ']).next().unwrap_or(rhs)),
    ))
}

/// Parse a leading `( gggg , eeee )`, returning the remainder.
fn take_tag<'a>(s: &'a str, line_no: usize) -> Result<(Tag, &'a str)> {
    let s = s.trim_start();
    let open = s
        .strip_prefix('(')
        .ok_or_else(|| DeidError::syntax(line_no, "expected `(gggg,eeee)`"))?;
    let close = open
        .find(')')
        .ok_or_else(|| DeidError::syntax(line_no, "unterminated tag reference"))?;
    let tag = Tag::parse(&open[..close])
        .map_err(|_| DeidError::syntax(line_no, format!("bad tag reference `{}`", &open[..close])))?;
    Ok((tag, &open[close + 1..]))
}

fn parse_string_literal(s: &str) -> Option<String> {
    let s = s.trim();
    let inner = s.strip_prefix('"')?.strip_suffix('"')?;
    if inner.contains('"') {
        return None;
    }
    Some(inner.to_string())
}

fn bracketed<'a>(s: &'a str, line_no: usize) -> Result<&'a str> {
    let s = s.trim();
    s.strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| DeidError::syntax(line_no, "expected `[...]` argument list"))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Produces replacement UIDs. Implementations must be deterministic in
/// their input for the life of the salt.
pub trait UidHasher: Send + Sync {
    fn hash_uid(&self, original: &str) -> String;
}

/// SHA-256 of salt + input rendered under the 2.25 UUID-derived root.
/// With a broker-provided salt the mapping reproduces across restarts.
pub struct SaltedUidHasher {
    salt: String,
}

impl SaltedUidHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }
}

impl UidHasher for SaltedUidHasher {
    fn hash_uid(&self, original: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(b"|");
        hasher.update(original.as_bytes());
        let digest = hasher.finalize();
        let mut n = [0u8; 16];
        n.copy_from_slice(&digest[..16]);
        format!("2.25.{}", u128::from_be_bytes(n))
    }
}

/// One UID rewritten during a run; the caller records these in the
/// crosswalk for later reversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedUid {
    pub tag: Tag,
    pub original: String,
    pub hashed: String,
}

/// The result of applying a script to one attribute set.
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub dataset: AttributeSet,
    pub hashed_uids: Vec<HashedUid>,
}

/// Apply a script in source order. The input is consumed into a fresh
/// output set; the caller keeps its own pre-anonymization snapshot for
/// verification.
pub fn apply(
    script: &AnonymizationScript,
    input: AttributeSet,
    hasher: &dyn UidHasher,
) -> Result<ScriptOutcome> {
    let mut dataset = input;
    let mut hashed_uids = Vec::new();

    for op in script.ops() {
        match op {
            ScriptOp::Assign { target, value } => {
                dataset.set_string(*target, value.clone());
            }
            ScriptOp::HashUid { target, source } => {
                let Some(original) = dataset.string(*source).map(str::to_string) else {
                    continue;
                };
                if original.is_empty() {
                    continue;
                }
                let hashed = hasher.hash_uid(&original);
                dataset.set_string(*target, hashed.clone());
                hashed_uids.push(HashedUid {
                    tag: *target,
                    original,
                    hashed,
                });
            }
            ScriptOp::ShiftDate { target, source, days } => {
                let Some(original) = dataset.string(*source).map(str::to_string) else {
                    continue;
                };
                if original.is_empty() {
                    continue;
                }
                let shifted = shift_date_value(&original, *days)?;
                dataset.set_string(*target, shifted);
            }
            ScriptOp::Keep { .. } => {}
        }
    }

    Ok(ScriptOutcome {
        dataset,
        hashed_uids,
    })
}

/// Shift the yyyymmdd prefix of a date value by whole days, preserving any
/// suffix (time component of a DT value).
pub fn shift_date_value(value: &str, days: i64) -> Result<String> {
    if value.len() < 8 {
        return Err(DeidError::InvalidDateValue(value.to_string()));
    }
    let (date_part, suffix) = value.split_at(8);
    let date = NaiveDate::parse_from_str(date_part, "%Y%m%d")
        .map_err(|_| DeidError::InvalidDateValue(value.to_string()))?;
    let shifted = date
        .checked_add_signed(Duration::days(days))
        .ok_or_else(|| DeidError::InvalidDateValue(value.to_string()))?;
    Ok(format!("{}{}", shifted.format("%Y%m%d"), suffix))
}

/// Stamp the de-identification markers the audit diff checks for.
pub fn stamp_markers(dataset: &mut AttributeSet, method: &str) {
    dataset.set_string(tags::PATIENT_IDENTITY_REMOVED, "YES");
    let existing = dataset
        .string(tags::DEIDENTIFICATION_METHOD)
        .unwrap_or_default()
        .to_string();
    let combined = if existing.is_empty() {
        method.to_string()
    } else if existing.split('\\').any(|m| m == method) {
        existing
    } else {
        format!("{existing}\\{method}")
    };
    dataset.set_string(tags::DEIDENTIFICATION_METHOD, combined);
}
