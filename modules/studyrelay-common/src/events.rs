use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted by a listener's completion watcher once a study's inbox has been
/// quiet for the route's quiet period. Claimed by the forward orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyReady {
    /// AE title of the listener that received the study.
    pub listener_ae: String,
    pub study_uid: String,
    /// The study's inbox directory (`.../incoming/{studyUID}`).
    pub path: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
    /// Calling AE of the peer that sent the study, when known.
    pub calling_ae: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl std::fmt::Display for StudyReady {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "study {} on {} ({} files, {} bytes)",
            self.study_uid, self.listener_ae, self.file_count, self.total_bytes
        )
    }
}
