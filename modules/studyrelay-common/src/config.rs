//! The configuration surface consumed by the gateway core.
//!
//! Loading (file formats, legacy-shape migration) is owned by the embedding
//! binary; the core only sees these structs. A route is immutable once its
//! listener is bound: configuration changes imply a restart.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{
    BrokerScheme, FilterAction, OnFailure, RuleOperator, TagAction, ValidationKind,
};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Root under which every listener keeps its inbox, archive, and logs.
    pub base_dir: PathBuf,
    /// Scratch space (processing directories, crosswalk backups).
    pub cache_dir: PathBuf,
    /// Archived studies older than this are removed by retention cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Destination health probe cadence.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    /// Globally registered destinations, by name.
    #[serde(default)]
    pub destinations: HashMap<String, DestinationConfig>,
    /// Listener bindings.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Honest brokers, by name.
    #[serde(default)]
    pub brokers: HashMap<String, BrokerConfig>,
}

fn default_retention_days() -> u32 {
    30
}

fn default_health_check_interval() -> u64 {
    60
}

/// One of the three destination kinds, registered globally by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationConfig {
    PeerNode {
        called_ae_title: String,
        host: String,
        port: u16,
        #[serde(default = "default_calling_ae")]
        calling_ae_title: String,
        #[serde(default)]
        tls: bool,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    ArchiveApi {
        base_url: String,
        username: String,
        password: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_pool_size")]
        pool_size: u32,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    Filesystem {
        base_path: PathBuf,
        /// Directory pattern expanded against study attributes,
        /// e.g. `{PatientID}/{StudyDate}_{StudyTime}`.
        #[serde(default)]
        directory_pattern: String,
        #[serde(default)]
        naming_pattern: String,
        #[serde(default)]
        organize_by_listener: bool,
    },
}

fn default_calling_ae() -> String {
    "STUDYRELAY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_pool_size() -> u32 {
    4
}

impl DestinationConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            DestinationConfig::PeerNode { .. } => "peer_node",
            DestinationConfig::ArchiveApi { .. } => "archive_api",
            DestinationConfig::Filesystem { .. } => "filesystem",
        }
    }
}

/// A named listener binding. Ordered rule lists are evaluated in
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Called AE title this listener answers to. Also names the route.
    pub ae_title: String,
    pub port: u16,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    /// Seconds without inbox writes before a study is considered complete.
    #[serde(default = "default_quiet_period")]
    pub quiet_period_secs: u64,
    /// 0 disables admission rate limiting.
    #[serde(default)]
    pub rate_limit_per_minute: u32,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
    #[serde(default)]
    pub tag_modifications: Vec<TagModification>,
    #[serde(default)]
    pub destinations: Vec<RouteDestination>,
}

fn default_worker_threads() -> usize {
    2
}

fn default_max_concurrent() -> usize {
    4
}

fn default_quiet_period() -> u64 {
    60
}

/// Route → destination edge with per-edge delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDestination {
    /// Name of a globally registered destination.
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub anonymize: bool,
    /// Script-library name used when `anonymize` is set.
    #[serde(default)]
    pub script_name: Option<String>,
    #[serde(default)]
    pub use_broker: bool,
    #[serde(default)]
    pub broker_name: Option<String>,
    /// Archive-api metadata.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub subject_prefix: Option<String>,
    #[serde(default)]
    pub session_prefix: Option<String>,
    #[serde(default)]
    pub auto_archive: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_retry_delay() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

impl RouteDestination {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            priority: 0,
            anonymize: false,
            script_name: None,
            use_broker: false,
            broker_name: None,
            project_id: None,
            subject_prefix: None,
            session_prefix: None,
            auto_archive: false,
            retry_count: 0,
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Pass/fail check against the study's representative attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub kind: ValidationKind,
    /// `gggg,eeee` or a well-known name (PatientID, Modality, ...).
    pub tag: String,
    #[serde(default)]
    pub operator: Option<RuleOperator>,
    #[serde(default)]
    pub value: Option<String>,
    /// For `tag_length`: inclusive bounds.
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    pub on_failure: OnFailure,
}

/// Keep-or-drop predicate. A study survives filtering only if every
/// `exclude` rule misses and every `include` rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub action: FilterAction,
    pub tag: String,
    pub operator: RuleOperator,
    pub value: String,
}

/// Conditional destination selection. First matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(default)]
    pub name: Option<String>,
    pub tag: String,
    pub operator: RuleOperator,
    pub value: String,
    /// Names of destination edges contributed when the rule matches.
    pub destinations: Vec<String>,
}

/// One tag-rewrite step. Applied in declaration order to every instance
/// of the study before delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagModification {
    pub action: TagAction,
    pub tag: String,
    #[serde(default)]
    pub value: Option<String>,
    /// Source tag for `copy_from_tag`.
    #[serde(default)]
    pub source_tag: Option<String>,
}

/// Broker configuration (spec: one scheme per broker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub scheme: BrokerScheme,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub date_shift: DateShiftConfig,
    /// Store hashed UIDs in the crosswalk for later reversal.
    #[serde(default)]
    pub hash_uids: bool,
    #[serde(default = "default_cache_size")]
    pub max_cache_size: usize,
    /// Expression for the `script` scheme.
    #[serde(default)]
    pub script: Option<String>,
}

fn default_prefix() -> String {
    "SUBJ".to_string()
}

fn default_cache_size() -> usize {
    10_000
}

/// Random-but-sticky per-patient date shifting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateShiftConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_shift_min")]
    pub min_days: i32,
    #[serde(default = "default_shift_max")]
    pub max_days: i32,
}

impl Default for DateShiftConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_days: default_shift_min(),
            max_days: default_shift_max(),
        }
    }
}

fn default_shift_min() -> i32 {
    -365
}

fn default_shift_max() -> i32 {
    365
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_config_tagged_by_kind() {
        let toml = r#"
            kind = "peer_node"
            called_ae_title = "PACS1"
            host = "10.0.0.5"
            port = 104
        "#;
        let dest: DestinationConfig = toml::from_str(toml).unwrap();
        assert_eq!(dest.kind(), "peer_node");
        match dest {
            DestinationConfig::PeerNode {
                calling_ae_title,
                max_retries,
                ..
            } => {
                assert_eq!(calling_ae_title, "STUDYRELAY");
                assert_eq!(max_retries, 3);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn route_defaults_are_sane() {
        let toml = r#"
            ae_title = "R1"
            port = 11112
        "#;
        let route: RouteConfig = toml::from_str(toml).unwrap();
        assert_eq!(route.worker_threads, 2);
        assert_eq!(route.quiet_period_secs, 60);
        assert_eq!(route.rate_limit_per_minute, 0);
        assert!(route.destinations.is_empty());
    }
}
