//! Rule evaluation: validate → filter → select destinations → rewrite
//! tags. All pure functions over a study's representative attributes
//! (tag values are assumed stable across a study for every tag a rule
//! touches).

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use studyrelay_common::{
    FilterAction, FilterRule, OnFailure, RouteDestination, RoutingRule, RuleOperator, TagAction,
    TagModification, ValidationKind, ValidationRule,
};
use studyrelay_dicom::{dictionary, AttributeSet, Tag};

use crate::error::{Result, RouterError};

/// Outcome of the validation pass: either a rejection reason or the
/// warnings produced by non-rejecting failures.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub warnings: Vec<String>,
}

fn resolve_tag(reference: &str) -> Result<Tag> {
    dictionary::resolve(reference)
        .ok_or_else(|| RouterError::BadRule(format!("unknown tag reference `{reference}`")))
}

fn operator_matches(operator: RuleOperator, actual: &str, expected: &str) -> bool {
    match operator {
        RuleOperator::Equals => actual == expected,
        RuleOperator::Contains => actual.contains(expected),
        RuleOperator::StartsWith => actual.starts_with(expected),
        RuleOperator::EndsWith => actual.ends_with(expected),
        RuleOperator::Matches => Regex::new(expected)
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
        RuleOperator::In => expected.split(',').any(|v| v.trim() == actual),
    }
}

/// Run the route's validation rules in order, fail-fast on `reject`.
pub fn validate(attrs: &AttributeSet, rules: &[ValidationRule]) -> Result<ValidationOutcome> {
    let mut outcome = ValidationOutcome::default();

    for rule in rules {
        let tag = resolve_tag(&rule.tag)?;
        let value = attrs.string(tag).unwrap_or_default();

        let (passed, description) = match rule.kind {
            ValidationKind::RequiredTag => (
                !value.is_empty(),
                format!("required tag {} is missing or empty", rule.tag),
            ),
            ValidationKind::TagValue => {
                let operator = rule.operator.ok_or_else(|| {
                    RouterError::BadRule(format!("tag_value rule on {} lacks an operator", rule.tag))
                })?;
                let expected = rule.value.as_deref().unwrap_or_default();
                (
                    operator_matches(operator, value, expected),
                    format!("tag {} value `{value}` failed {operator:?} `{expected}`", rule.tag),
                )
            }
            ValidationKind::TagLength => {
                let min = rule.min_length.unwrap_or(0);
                let max = rule.max_length.unwrap_or(usize::MAX);
                (
                    (min..=max).contains(&value.len()),
                    format!(
                        "tag {} length {} outside [{min}, {}]",
                        rule.tag,
                        value.len(),
                        rule.max_length.map_or("∞".to_string(), |m| m.to_string())
                    ),
                )
            }
        };

        if passed {
            continue;
        }
        match rule.on_failure {
            OnFailure::Reject => return Err(RouterError::ValidationFailed(description)),
            OnFailure::Warn => {
                warn!(rule = %rule.tag, "{description}");
                outcome.warnings.push(description);
            }
            OnFailure::Log => info!(rule = %rule.tag, "{description}"),
        }
    }
    Ok(outcome)
}

/// Apply the filter rules. Returns the reason the study was dropped, or
/// None when it is kept: every `exclude` rule must miss and every
/// `include` rule must match.
pub fn filter(attrs: &AttributeSet, rules: &[FilterRule]) -> Result<Option<String>> {
    for rule in rules {
        let tag = resolve_tag(&rule.tag)?;
        let value = attrs.string(tag).unwrap_or_default();
        let matched = operator_matches(rule.operator, value, &rule.value);
        match rule.action {
            FilterAction::Exclude if matched => {
                return Ok(Some(format!(
                    "excluded: tag {} value `{value}` matched {:?} `{}`",
                    rule.tag, rule.operator, rule.value
                )));
            }
            FilterAction::Include if !matched => {
                return Ok(Some(format!(
                    "not included: tag {} value `{value}` failed {:?} `{}`",
                    rule.tag, rule.operator, rule.value
                )));
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Choose destination edges: the first matching routing rule contributes
/// exactly its named destinations; with no match, every enabled edge is
/// used in ascending priority order.
pub fn select_destinations<'a>(
    attrs: &AttributeSet,
    rules: &[RoutingRule],
    edges: &'a [RouteDestination],
) -> Result<Vec<&'a RouteDestination>> {
    for rule in rules {
        let tag = resolve_tag(&rule.tag)?;
        let value = attrs.string(tag).unwrap_or_default();
        if operator_matches(rule.operator, value, &rule.value) {
            let selected: Vec<&RouteDestination> = rule
                .destinations
                .iter()
                .filter_map(|name| edges.iter().find(|e| &e.name == name && e.enabled))
                .collect();
            info!(
                rule = rule.name.as_deref().unwrap_or(&rule.tag),
                destinations = selected.len(),
                "Routing rule matched"
            );
            return Ok(selected);
        }
    }

    let mut defaults: Vec<&RouteDestination> = edges.iter().filter(|e| e.enabled).collect();
    defaults.sort_by_key(|e| e.priority);
    Ok(defaults)
}

/// Deterministic tag-hash rewrite: SHA-256, first 8 hex characters,
/// upper case.
pub fn hash_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode_upper(&hasher.finalize()[..4])
}

/// Apply the route's tag modifications in declaration order.
pub fn apply_modifications(attrs: &mut AttributeSet, mods: &[TagModification]) -> Result<()> {
    for modification in mods {
        let tag = resolve_tag(&modification.tag)?;
        match modification.action {
            TagAction::Set => {
                attrs.set_string(tag, modification.value.clone().unwrap_or_default());
            }
            TagAction::Remove => {
                attrs.remove(tag);
            }
            TagAction::CopyFromTag => {
                let source = modification.source_tag.as_deref().ok_or_else(|| {
                    RouterError::BadRule(format!(
                        "copy_from_tag on {} lacks a source tag",
                        modification.tag
                    ))
                })?;
                let source = resolve_tag(source)?;
                let value = attrs.string(source).unwrap_or_default().to_string();
                attrs.set_string(tag, value);
            }
            TagAction::Prefix => {
                let current = attrs.string(tag).unwrap_or_default();
                let value = format!(
                    "{}{current}",
                    modification.value.as_deref().unwrap_or_default()
                );
                attrs.set_string(tag, value);
            }
            TagAction::Suffix => {
                let current = attrs.string(tag).unwrap_or_default();
                let value = format!(
                    "{current}{}",
                    modification.value.as_deref().unwrap_or_default()
                );
                attrs.set_string(tag, value);
            }
            TagAction::Hash => {
                let current = attrs.string(tag).unwrap_or_default();
                if !current.is_empty() {
                    let hashed = hash_value(current);
                    attrs.set_string(tag, hashed);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyrelay_common::RouteDestination;
    use studyrelay_dicom::dictionary::tags;
    use studyrelay_dicom::Vr;

    fn attrs() -> AttributeSet {
        let mut ds = AttributeSet::new();
        ds.put_string(tags::PATIENT_ID, Vr::Lo, "P123");
        ds.put_string(tags::MODALITY, Vr::Cs, "CT");
        ds.put_string(tags::ACCESSION_NUMBER, Vr::Sh, "ACC42");
        ds.put_string(tags::STUDY_DESCRIPTION, Vr::Lo, "CHEST ROUTINE");
        ds
    }

    fn rule(kind: ValidationKind, tag: &str, on_failure: OnFailure) -> ValidationRule {
        ValidationRule {
            kind,
            tag: tag.to_string(),
            operator: None,
            value: None,
            min_length: None,
            max_length: None,
            on_failure,
        }
    }

    #[test]
    fn required_tag_rejects_when_missing() {
        let rules = vec![rule(
            ValidationKind::RequiredTag,
            "PatientBirthDate",
            OnFailure::Reject,
        )];
        let err = validate(&attrs(), &rules).unwrap_err();
        assert!(matches!(err, RouterError::ValidationFailed(_)));

        // Warn keeps going and records the problem.
        let rules = vec![rule(
            ValidationKind::RequiredTag,
            "PatientBirthDate",
            OnFailure::Warn,
        )];
        let outcome = validate(&attrs(), &rules).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn tag_value_operators() {
        let mut r = rule(ValidationKind::TagValue, "Modality", OnFailure::Reject);
        r.operator = Some(RuleOperator::In);
        r.value = Some("CT, MR".to_string());
        assert!(validate(&attrs(), &[r.clone()]).is_ok());

        r.value = Some("US, XA".to_string());
        assert!(validate(&attrs(), std::slice::from_ref(&r)).is_err());

        r.operator = Some(RuleOperator::Matches);
        r.value = Some("^C.$".to_string());
        assert!(validate(&attrs(), &[r]).is_ok());
    }

    #[test]
    fn tag_length_bounds() {
        let mut r = rule(ValidationKind::TagLength, "PatientID", OnFailure::Reject);
        r.min_length = Some(1);
        r.max_length = Some(4);
        assert!(validate(&attrs(), std::slice::from_ref(&r)).is_err());
        r.max_length = Some(8);
        assert!(validate(&attrs(), &[r]).is_ok());
    }

    #[test]
    fn unknown_tag_reference_is_a_bad_rule() {
        let r = rule(ValidationKind::RequiredTag, "NoSuchTag", OnFailure::Reject);
        assert!(matches!(
            validate(&attrs(), &[r]).unwrap_err(),
            RouterError::BadRule(_)
        ));
    }

    #[test]
    fn exclude_and_include_filters() {
        let exclude = FilterRule {
            action: FilterAction::Exclude,
            tag: "Modality".into(),
            operator: RuleOperator::Equals,
            value: "CT".into(),
        };
        assert!(filter(&attrs(), &[exclude]).unwrap().is_some());

        let include = FilterRule {
            action: FilterAction::Include,
            tag: "StudyDescription".into(),
            operator: RuleOperator::Contains,
            value: "CHEST".into(),
        };
        assert!(filter(&attrs(), std::slice::from_ref(&include)).unwrap().is_none());

        let include_miss = FilterRule {
            action: FilterAction::Include,
            tag: "StudyDescription".into(),
            operator: RuleOperator::StartsWith,
            value: "HEAD".into(),
        };
        assert!(filter(&attrs(), &[include_miss]).unwrap().is_some());
    }

    #[test]
    fn first_matching_routing_rule_wins() {
        let edges = vec![
            RouteDestination::named("pacs"),
            RouteDestination::named("xnat"),
            RouteDestination::named("disk"),
        ];
        let rules = vec![
            RoutingRule {
                name: Some("ct-to-xnat".into()),
                tag: "Modality".into(),
                operator: RuleOperator::Equals,
                value: "CT".into(),
                destinations: vec!["xnat".into()],
            },
            RoutingRule {
                name: None,
                tag: "Modality".into(),
                operator: RuleOperator::Equals,
                value: "CT".into(),
                destinations: vec!["pacs".into()],
            },
        ];
        let selected = select_destinations(&attrs(), &rules, &edges).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "xnat");
    }

    #[test]
    fn no_rule_match_uses_enabled_by_priority() {
        let mut pacs = RouteDestination::named("pacs");
        pacs.priority = 5;
        let mut xnat = RouteDestination::named("xnat");
        xnat.priority = 1;
        let mut disk = RouteDestination::named("disk");
        disk.enabled = false;
        let edges = vec![pacs, xnat, disk];

        let selected = select_destinations(&attrs(), &[], &edges).unwrap();
        let names: Vec<&str> = selected.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["xnat", "pacs"]);
    }

    #[test]
    fn modifications_apply_in_order() {
        let mut ds = attrs();
        let mods = vec![
            TagModification {
                action: TagAction::Set,
                tag: "StationName".into(),
                value: Some("RELAY".into()),
                source_tag: None,
            },
            TagModification {
                action: TagAction::CopyFromTag,
                tag: "StudyID".into(),
                value: None,
                source_tag: Some("AccessionNumber".into()),
            },
            TagModification {
                action: TagAction::Prefix,
                tag: "StudyID".into(),
                value: Some("RT-".into()),
                source_tag: None,
            },
            TagModification {
                action: TagAction::Suffix,
                tag: "StationName".into(),
                value: Some("-01".into()),
                source_tag: None,
            },
            TagModification {
                action: TagAction::Remove,
                tag: "StudyDescription".into(),
                value: None,
                source_tag: None,
            },
            TagModification {
                action: TagAction::Hash,
                tag: "AccessionNumber".into(),
                value: None,
                source_tag: None,
            },
        ];
        apply_modifications(&mut ds, &mods).unwrap();

        assert_eq!(ds.string(tags::STATION_NAME), Some("RELAY-01"));
        assert_eq!(ds.string(tags::STUDY_ID), Some("RT-ACC42"));
        assert!(!ds.contains(tags::STUDY_DESCRIPTION));
        let hashed = ds.string(tags::ACCESSION_NUMBER).unwrap();
        assert_eq!(hashed, hash_value("ACC42"));
        assert_eq!(hashed.len(), 8);
        assert!(hashed.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_value("ACC42"), hash_value("ACC42"));
        assert_ne!(hash_value("ACC42"), hash_value("ACC43"));
    }
}
