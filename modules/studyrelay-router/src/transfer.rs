//! Transfer records: per-study pipeline progress with monotonic state
//! transitions, plus the in-memory ledger the forwarder mutates and the
//! admin surface reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use studyrelay_common::{DeliveryAttempt, DestinationDelivery, DestinationState, TransferState};

/// One study's journey through one route.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub route: String,
    pub study_uid: String,
    pub calling_peer: Option<String>,
    pub file_count: usize,
    pub bytes: u64,
    pub state: TransferState,
    pub destinations: BTreeMap<String, DestinationDelivery>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Only forward motion along
/// pending → processing → forwarding → {completed, partial, failed}.
fn state_rank(state: TransferState) -> u8 {
    match state {
        TransferState::Pending => 0,
        TransferState::Processing => 1,
        TransferState::Forwarding => 2,
        TransferState::Completed | TransferState::Partial | TransferState::Failed => 3,
    }
}

/// Per-destination motion: pending → {success, failed};
/// failed → retry_pending → pending for the next attempt.
fn destination_transition_allowed(from: DestinationState, to: DestinationState) -> bool {
    matches!(
        (from, to),
        (DestinationState::Pending, DestinationState::Success)
            | (DestinationState::Pending, DestinationState::Failed)
            | (DestinationState::Failed, DestinationState::RetryPending)
            | (DestinationState::RetryPending, DestinationState::Pending)
    )
}

#[derive(Default)]
pub struct TransferLedger {
    records: Mutex<HashMap<Uuid, TransferRecord>>,
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        route: &str,
        study_uid: &str,
        calling_peer: Option<String>,
        file_count: usize,
        bytes: u64,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = TransferRecord {
            id,
            route: route.to_string(),
            study_uid: study_uid.to_string(),
            calling_peer,
            file_count,
            bytes,
            state: TransferState::Pending,
            destinations: BTreeMap::new(),
            created: now,
            updated: now,
        };
        if let Ok(mut records) = self.records.lock() {
            records.insert(id, record);
        }
        id
    }

    /// Snapshot of one record.
    pub fn get(&self, id: Uuid) -> Option<TransferRecord> {
        self.records.lock().ok().and_then(|r| r.get(&id).cloned())
    }

    /// Snapshots of every record, newest first.
    pub fn list(&self) -> Vec<TransferRecord> {
        let mut records: Vec<TransferRecord> = self
            .records
            .lock()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| b.created.cmp(&a.created));
        records
    }

    pub fn list_active(&self) -> Vec<TransferRecord> {
        self.list()
            .into_iter()
            .filter(|r| {
                !matches!(
                    r.state,
                    TransferState::Completed | TransferState::Partial | TransferState::Failed
                )
            })
            .collect()
    }

    /// Advance the overall state; backwards transitions are refused.
    pub fn set_state(&self, id: Uuid, state: TransferState) {
        self.with_record(id, |record| {
            if state_rank(state) < state_rank(record.state) {
                warn!(
                    transfer = %id,
                    from = %record.state,
                    to = %state,
                    "Refusing backwards transfer transition"
                );
                return;
            }
            record.state = state;
        });
    }

    /// Register the chosen destinations, all pending.
    pub fn set_destinations(&self, id: Uuid, names: &[String]) {
        self.with_record(id, |record| {
            for name in names {
                record
                    .destinations
                    .entry(name.clone())
                    .or_insert_with(DestinationDelivery::default);
            }
        });
    }

    /// Move one destination edge, enforcing the per-edge state machine.
    pub fn set_destination_state(&self, id: Uuid, name: &str, state: DestinationState) {
        self.with_record(id, |record| {
            let delivery = record
                .destinations
                .entry(name.to_string())
                .or_insert_with(DestinationDelivery::default);
            if delivery.state == state {
                return;
            }
            if !destination_transition_allowed(delivery.state, state) {
                warn!(
                    transfer = %id,
                    destination = name,
                    from = %delivery.state,
                    to = %state,
                    "Refusing destination transition"
                );
                return;
            }
            delivery.state = state;
        });
    }

    /// Record the result of one attempt against one destination.
    pub fn record_attempt(
        &self,
        id: Uuid,
        name: &str,
        started: DateTime<Utc>,
        duration_ms: u64,
        files_transferred: usize,
        error: Option<String>,
    ) {
        self.with_record(id, |record| {
            let delivery = record
                .destinations
                .entry(name.to_string())
                .or_insert_with(DestinationDelivery::default);
            delivery.attempts += 1;
            delivery.last_attempt = Some(started);
            delivery.duration_ms = Some(duration_ms);
            delivery.files_transferred = files_transferred;
            delivery.history.push(DeliveryAttempt {
                started,
                duration_ms,
                success: error.is_none(),
                error: error.clone(),
            });
            delivery.error = error;
        });
    }

    pub fn set_next_retry(&self, id: Uuid, name: &str, next_retry: Option<DateTime<Utc>>) {
        self.with_record(id, |record| {
            if let Some(delivery) = record.destinations.get_mut(name) {
                delivery.next_retry = next_retry;
            }
        });
    }

    /// Derive and set the terminal state from the per-destination
    /// outcomes: completed if all succeeded, partial if some did, failed
    /// if none did.
    pub fn finalize(&self, id: Uuid) -> Option<TransferState> {
        let mut terminal = None;
        self.with_record(id, |record| {
            let total = record.destinations.len();
            let succeeded = record
                .destinations
                .values()
                .filter(|d| d.state == DestinationState::Success)
                .count();
            let state = if total == 0 || succeeded == total {
                TransferState::Completed
            } else if succeeded > 0 {
                TransferState::Partial
            } else {
                TransferState::Failed
            };
            record.state = state;
            terminal = Some(state);
        });
        terminal
    }

    /// Per-destination snapshot used by the archive status blobs.
    pub fn destination_snapshot(&self, id: Uuid) -> BTreeMap<String, DestinationDelivery> {
        self.get(id).map(|r| r.destinations).unwrap_or_default()
    }

    fn with_record<F: FnOnce(&mut TransferRecord)>(&self, id: Uuid, f: F) {
        if let Ok(mut records) = self.records.lock() {
            match records.get_mut(&id) {
                Some(record) => {
                    f(record);
                    record.updated = Utc::now();
                }
                None => warn!(transfer = %id, "Update for unknown transfer record"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_record() -> (TransferLedger, Uuid) {
        let ledger = TransferLedger::new();
        let id = ledger.create("R1", "1.2.3", Some("MODALITY".into()), 2, 2048);
        (ledger, id)
    }

    #[test]
    fn create_starts_pending() {
        let (ledger, id) = ledger_with_record();
        let record = ledger.get(id).unwrap();
        assert_eq!(record.state, TransferState::Pending);
        assert_eq!(record.study_uid, "1.2.3");
        assert!(ledger.list_active().iter().any(|r| r.id == id));
    }

    #[test]
    fn overall_state_is_monotonic() {
        let (ledger, id) = ledger_with_record();
        ledger.set_state(id, TransferState::Processing);
        ledger.set_state(id, TransferState::Forwarding);
        // Backwards move refused.
        ledger.set_state(id, TransferState::Pending);
        assert_eq!(ledger.get(id).unwrap().state, TransferState::Forwarding);
        ledger.set_state(id, TransferState::Completed);
        assert_eq!(ledger.get(id).unwrap().state, TransferState::Completed);
    }

    #[test]
    fn destination_machine_allows_retry_loop() {
        let (ledger, id) = ledger_with_record();
        ledger.set_destinations(id, &["pacs".to_string()]);

        ledger.set_destination_state(id, "pacs", DestinationState::Failed);
        ledger.set_destination_state(id, "pacs", DestinationState::RetryPending);
        ledger.set_destination_state(id, "pacs", DestinationState::Pending);
        ledger.set_destination_state(id, "pacs", DestinationState::Success);

        let record = ledger.get(id).unwrap();
        assert_eq!(
            record.destinations.get("pacs").unwrap().state,
            DestinationState::Success
        );
    }

    #[test]
    fn destination_machine_refuses_bad_moves() {
        let (ledger, id) = ledger_with_record();
        ledger.set_destinations(id, &["pacs".to_string()]);
        ledger.set_destination_state(id, "pacs", DestinationState::Success);
        // Success is terminal for the edge.
        ledger.set_destination_state(id, "pacs", DestinationState::Failed);
        assert_eq!(
            ledger.get(id).unwrap().destinations.get("pacs").unwrap().state,
            DestinationState::Success
        );
    }

    #[test]
    fn finalize_derives_terminal_state() {
        let (ledger, id) = ledger_with_record();
        ledger.set_destinations(id, &["a".to_string(), "b".to_string()]);
        ledger.set_destination_state(id, "a", DestinationState::Success);
        ledger.set_destination_state(id, "b", DestinationState::Failed);
        assert_eq!(ledger.finalize(id), Some(TransferState::Partial));

        let (ledger, id) = ledger_with_record();
        ledger.set_destinations(id, &["a".to_string()]);
        ledger.set_destination_state(id, "a", DestinationState::Failed);
        assert_eq!(ledger.finalize(id), Some(TransferState::Failed));

        let (ledger, id) = ledger_with_record();
        ledger.set_destinations(id, &["a".to_string()]);
        ledger.set_destination_state(id, "a", DestinationState::Success);
        assert_eq!(ledger.finalize(id), Some(TransferState::Completed));
    }

    #[test]
    fn attempts_accumulate_history() {
        let (ledger, id) = ledger_with_record();
        ledger.set_destinations(id, &["pacs".to_string()]);
        let now = Utc::now();
        ledger.record_attempt(id, "pacs", now, 120, 0, Some("refused".into()));
        ledger.record_attempt(id, "pacs", now, 80, 2, None);

        let delivery = ledger
            .get(id)
            .unwrap()
            .destinations
            .get("pacs")
            .cloned()
            .unwrap();
        assert_eq!(delivery.attempts, 2);
        assert_eq!(delivery.history.len(), 2);
        assert!(!delivery.history[0].success);
        assert!(delivery.history[1].success);
        assert!(delivery.error.is_none());
        assert_eq!(delivery.files_transferred, 2);
    }
}
