//! The global destination registry: one client per configured
//! destination, health probing on a single scheduler, and runtime
//! enable/disable.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use studyrelay_common::{DestinationConfig, RouteDestination};
use studyrelay_dicom::AttributeSet;
use studyrelay_protocol::{PeerConnector, PeerEndpoint};
use xnat_client::XnatClient;

use crate::clients::{
    ArchiveApiClient, DestinationClient, FilesystemClient, PeerClient, SendOutcome,
};
use crate::error::{Result, RouterError};

/// Availability bookkeeping for one destination.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub available: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_available: Option<DateTime<Utc>>,
    pub unavailable_since: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub successful_checks: u64,
}

impl Default for HealthStatus {
    fn default() -> Self {
        // Optimistic until the first probe says otherwise.
        Self {
            available: true,
            last_check: None,
            last_available: None,
            unavailable_since: None,
            consecutive_failures: 0,
            total_checks: 0,
            successful_checks: 0,
        }
    }
}

pub struct DestinationManager {
    clients: HashMap<String, DestinationClient>,
    health: Mutex<HashMap<String, HealthStatus>>,
    disabled: Mutex<HashSet<String>>,
}

impl DestinationManager {
    /// Build one client per configured destination.
    pub fn from_config(
        destinations: &HashMap<String, DestinationConfig>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self> {
        let mut clients = HashMap::new();
        for (name, config) in destinations {
            let client = match config {
                DestinationConfig::PeerNode {
                    called_ae_title,
                    host,
                    port,
                    calling_ae_title,
                    tls,
                    timeout_secs,
                    ..
                } => DestinationClient::Peer(PeerClient::new(
                    PeerEndpoint {
                        called_ae: called_ae_title.clone(),
                        calling_ae: calling_ae_title.clone(),
                        host: host.clone(),
                        port: *port,
                        tls: *tls,
                        timeout_secs: *timeout_secs,
                    },
                    connector.clone(),
                )),
                DestinationConfig::ArchiveApi {
                    base_url,
                    username,
                    password,
                    timeout_secs,
                    ..
                } => {
                    let client = XnatClient::new(
                        base_url,
                        username,
                        password,
                        Duration::from_secs(*timeout_secs),
                    )
                    .map_err(|e| RouterError::Delivery(e.to_string()))?;
                    DestinationClient::Archive(ArchiveApiClient::new(client))
                }
                DestinationConfig::Filesystem {
                    base_path,
                    directory_pattern,
                    naming_pattern,
                    organize_by_listener,
                } => DestinationClient::Filesystem(FilesystemClient::new(
                    base_path.clone(),
                    directory_pattern.clone(),
                    naming_pattern.clone(),
                    *organize_by_listener,
                )),
            };
            clients.insert(name.clone(), client);
        }
        Ok(Self {
            clients,
            health: Mutex::new(HashMap::new()),
            disabled: Mutex::new(HashSet::new()),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Enable or disable a destination at runtime. Disabled destinations
    /// fail fast on send and are skipped by default selection.
    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Ok(mut disabled) = self.disabled.lock() {
            if enabled {
                disabled.remove(name);
            } else {
                disabled.insert(name.to_string());
            }
        }
        info!(destination = name, enabled, "Destination toggled");
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.disabled
            .lock()
            .map(|d| !d.contains(name))
            .unwrap_or(true)
    }

    /// Last known availability (optimistic before the first probe).
    pub fn is_available(&self, name: &str) -> bool {
        self.health
            .lock()
            .ok()
            .and_then(|h| h.get(name).map(|s| s.available))
            .unwrap_or(true)
    }

    pub fn health(&self, name: &str) -> Option<HealthStatus> {
        self.health.lock().ok().and_then(|h| h.get(name).cloned())
    }

    /// Probe one destination and record the transition. Flips to
    /// unavailable on the first failure and back on the first success.
    pub async fn probe(&self, name: &str) -> bool {
        let Some(client) = self.clients.get(name) else {
            return false;
        };
        let result = client.probe().await;
        let now = Utc::now();
        let ok = result.is_ok();

        if let Ok(mut health) = self.health.lock() {
            let status = health.entry(name.to_string()).or_default();
            let was_available = status.available;
            status.last_check = Some(now);
            status.total_checks += 1;
            if ok {
                status.successful_checks += 1;
                status.consecutive_failures = 0;
                status.last_available = Some(now);
                status.unavailable_since = None;
                status.available = true;
                if !was_available {
                    info!(destination = name, "Destination recovered");
                }
            } else {
                status.consecutive_failures += 1;
                if was_available {
                    status.unavailable_since = Some(now);
                    warn!(
                        destination = name,
                        error = %result.as_ref().err().map(|e| e.to_string()).unwrap_or_default(),
                        "Destination became unavailable"
                    );
                }
                status.available = false;
            }
        }
        ok
    }

    pub async fn probe_all(&self) {
        for name in self.names() {
            self.probe(&name).await;
        }
    }

    /// Single probe scheduler for every destination.
    pub fn spawn_prober(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.probe_all().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Deliver through the named destination's client.
    pub async fn send(
        &self,
        name: &str,
        study_dir: &Path,
        edge: &RouteDestination,
        attrs: &AttributeSet,
        listener_ae: &str,
    ) -> Result<SendOutcome> {
        if !self.is_enabled(name) {
            return Err(RouterError::DestinationUnavailable(format!(
                "{name} is disabled"
            )));
        }
        let client = self
            .clients
            .get(name)
            .ok_or_else(|| RouterError::UnknownDestination(name.to_string()))?;
        client.send(study_dir, edge, attrs, listener_ae).await
    }

    pub async fn close_all(&self) {
        for client in self.clients.values() {
            client.close().await;
        }
        info!(count = self.clients.len(), "Destination clients closed");
    }
}
