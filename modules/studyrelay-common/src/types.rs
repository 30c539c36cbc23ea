use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall transfer lifecycle for one study through one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Processing,
    Forwarding,
    Completed,
    Partial,
    Failed,
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferState::Pending => write!(f, "pending"),
            TransferState::Processing => write!(f, "processing"),
            TransferState::Forwarding => write!(f, "forwarding"),
            TransferState::Completed => write!(f, "completed"),
            TransferState::Partial => write!(f, "partial"),
            TransferState::Failed => write!(f, "failed"),
        }
    }
}

/// Per-destination delivery state. Transitions are monotonic along
/// pending → success|failed; a scheduled retry moves failed → retry_pending
/// and back through the normal attempt path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationState {
    Pending,
    Success,
    Failed,
    RetryPending,
}

impl std::fmt::Display for DestinationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationState::Pending => write!(f, "pending"),
            DestinationState::Success => write!(f, "success"),
            DestinationState::Failed => write!(f, "failed"),
            DestinationState::RetryPending => write!(f, "retry_pending"),
        }
    }
}

/// Progress of one destination edge for one study. Lives on the transfer
/// record while in flight and is persisted verbatim into the archive's
/// per-destination status blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationDelivery {
    pub state: DestinationState,
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_retry: Option<DateTime<Utc>>,
    /// Duration of the most recent attempt.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub files_transferred: usize,
    #[serde(default)]
    pub error: Option<String>,
    /// One entry per attempt, oldest first.
    #[serde(default)]
    pub history: Vec<DeliveryAttempt>,
}

impl Default for DestinationDelivery {
    fn default() -> Self {
        Self {
            state: DestinationState::Pending,
            attempts: 0,
            last_attempt: None,
            next_retry: None,
            duration_ms: None,
            files_transferred: 0,
            error: None,
            history: Vec::new(),
        }
    }
}

/// One delivery attempt against one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub started: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Identifier classes a crosswalk entry can map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    PatientId,
    PatientName,
    Accession,
    StudyUid,
    SeriesUid,
    SopUid,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::PatientId => "patient_id",
            IdType::PatientName => "patient_name",
            IdType::Accession => "accession",
            IdType::StudyUid => "study_uid",
            IdType::SeriesUid => "series_uid",
            IdType::SopUid => "sop_uid",
        }
    }
}

impl std::fmt::Display for IdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IdType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient_id" => Ok(Self::PatientId),
            "patient_name" => Ok(Self::PatientName),
            "accession" => Ok(Self::Accession),
            "study_uid" => Ok(Self::StudyUid),
            "series_uid" => Ok(Self::SeriesUid),
            "sop_uid" => Ok(Self::SopUid),
            other => Err(format!("unknown IdType: {other}")),
        }
    }
}

/// What a validation rule checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    RequiredTag,
    TagValue,
    TagLength,
}

/// What happens when a validation rule fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Reject,
    Warn,
    Log,
}

/// Filter rules either keep matching studies or drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Include,
    Exclude,
}

/// Predicate operators shared by validation, filter, and routing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    In,
}

/// Tag-rewrite actions applied by a route before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagAction {
    Set,
    Remove,
    CopyFromTag,
    Prefix,
    Suffix,
    Hash,
}

/// Pseudonym generation schemes. Exactly one per broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerScheme {
    AdjectiveAnimal,
    ColorAnimal,
    NatoPhonetic,
    Sequential,
    Hash,
    Script,
}

impl std::fmt::Display for BrokerScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerScheme::AdjectiveAnimal => write!(f, "adjective_animal"),
            BrokerScheme::ColorAnimal => write!(f, "color_animal"),
            BrokerScheme::NatoPhonetic => write!(f, "nato_phonetic"),
            BrokerScheme::Sequential => write!(f, "sequential"),
            BrokerScheme::Hash => write!(f, "hash"),
            BrokerScheme::Script => write!(f, "script"),
        }
    }
}
