//! Wiring and lifecycle.
//!
//! Construction is in dependency order: crosswalk store → brokers →
//! script library/executor → destination manager → archive → per-route
//! receivers and forwarders. Shutdown is cooperative: stop intake, drain
//! with a bounded grace period, close clients, flush.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use studyrelay_archive::ArchiveManager;
use studyrelay_broker::{backup, BackupManager, Broker, CrosswalkStore};
use studyrelay_common::GatewayConfig;
use studyrelay_deid::library::ScriptLibrary;
use studyrelay_deid::Executor;
use studyrelay_protocol::{PeerConnector, StoreScp};
use studyrelay_receiver::{InboxWriter, Listener, RouteLayout, StudyWatcher};
use studyrelay_router::{DestinationManager, ForwarderDeps, RouteForwarder, TransferLedger};

/// How long in-flight studies get to drain after shutdown is requested.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

pub struct Gateway {
    store: CrosswalkStore,
    manager: Arc<DestinationManager>,
    ledger: Arc<TransferLedger>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    pub async fn build(
        config: GatewayConfig,
        scp: Arc<dyn StoreScp>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir)?;
        std::fs::create_dir_all(&config.cache_dir)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Crosswalk store and its backup schedule.
        let store = CrosswalkStore::open(&config.cache_dir.join("crosswalk.db"))
            .await
            .context("opening crosswalk store")?;
        let backup_manager = Arc::new(
            BackupManager::new(config.cache_dir.join("backups"))
                .with_limits(backup::DEFAULT_MAX_BACKUPS, config.retention_days as i64),
        );
        tasks.push(backup::spawn_schedule(
            backup_manager,
            store.clone(),
            shutdown_rx.clone(),
        ));

        // Brokers share the store.
        let mut brokers = HashMap::new();
        for (name, broker_config) in &config.brokers {
            brokers.insert(
                name.clone(),
                Arc::new(Broker::new(name.clone(), broker_config.clone(), store.clone())),
            );
            info!(broker = %name, scheme = %broker_config.scheme, "Broker configured");
        }

        // Scripts and the de-id executor.
        let library = Arc::new(
            ScriptLibrary::open(config.cache_dir.join("scripts"))
                .context("opening script library")?,
        );
        let executor = Arc::new(Executor::new());

        // Destinations and the single health prober.
        let manager = Arc::new(
            DestinationManager::from_config(&config.destinations, connector)
                .context("building destination clients")?,
        );
        tasks.push(manager.clone().spawn_prober(
            Duration::from_secs(config.health_check_interval_secs),
            shutdown_rx.clone(),
        ));

        let archive = Arc::new(ArchiveManager::new(&config.base_dir));
        let ledger = Arc::new(TransferLedger::new());
        let deps = Arc::new(ForwarderDeps {
            manager: manager.clone(),
            executor,
            library,
            brokers,
            archive: archive.clone(),
            ledger: ledger.clone(),
            process_salt: Uuid::new_v4().to_string(),
        });

        // One receiver + forwarder pair per route.
        for route in &config.routes {
            let layout = RouteLayout::new(&config.base_dir, &route.ae_title);
            layout.ensure()?;

            let sink = Arc::new(InboxWriter::new(layout.clone()));
            let watcher = Arc::new(
                StudyWatcher::new(
                    layout.clone(),
                    Duration::from_secs(route.quiet_period_secs),
                    sink.calling_map(),
                )
                .with_context(|| format!("watching inbox for {}", route.ae_title))?,
            );

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            tasks.push(watcher.spawn_sweeper(events_tx, shutdown_rx.clone()));

            let (_addr, listener_task) = Listener::new(
                &route.ae_title,
                route.port,
                route.max_concurrent_transfers.max(1) * 4,
            )
            .spawn(scp.clone(), sink, shutdown_rx.clone())
            .await
            .with_context(|| format!("binding listener {} on port {}", route.ae_title, route.port))?;
            tasks.push(listener_task);

            tasks.extend(
                RouteForwarder::new(route.clone(), layout, deps.clone())
                    .spawn(events_rx, shutdown_rx.clone()),
            );
            info!(
                route = %route.ae_title,
                port = route.port,
                workers = route.worker_threads,
                quiet_period_secs = route.quiet_period_secs,
                "Route online"
            );
        }

        // Daily-ish retention sweep for every route's archive.
        {
            let archive = archive.clone();
            let routes: Vec<String> = config.routes.iter().map(|r| r.ae_title.clone()).collect();
            let retention_days = config.retention_days;
            let mut shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(6 * 60 * 60));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            for route in &routes {
                                match archive.cleanup(route, retention_days) {
                                    Ok(removed) if removed > 0 => {
                                        info!(route = %route, removed, "Archive retention cleanup");
                                    }
                                    Ok(_) => {}
                                    Err(e) => warn!(route = %route, error = %e, "Retention cleanup failed"),
                                }
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }));
        }

        Ok(Self {
            store,
            manager,
            ledger,
            shutdown: shutdown_tx,
            tasks,
        })
    }

    /// Read access for an embedding admin surface.
    pub fn ledger(&self) -> &Arc<TransferLedger> {
        &self.ledger
    }

    /// Generate (or regenerate) the audit diff for an archived study and
    /// attach it as `audit_report.json`. The script named in the archive
    /// metadata supplies the conformance expectations.
    pub async fn audit_archived_study(
        archive: &ArchiveManager,
        library: &ScriptLibrary,
        listener_ae: &str,
        study_uid: &str,
    ) -> Result<studyrelay_deid::audit::AuditReport> {
        let archived = archive.locate(listener_ae, study_uid)?;
        let mut metadata = archived.read_metadata()?;

        let script = match &metadata.script_name {
            Some(name) => {
                let content = library.content(name)?;
                Some(studyrelay_deid::AnonymizationScript::parse(&content)?)
            }
            None => None,
        };

        let original = archived.original_dir();
        let anonymized = archived.anonymized_dir();
        let report = tokio::task::spawn_blocking(move || {
            studyrelay_deid::audit::audit_directories(&original, &anonymized, script.as_ref())
        })
        .await??;

        archived.write_audit_report(&report)?;
        metadata.audit_generated_at = Some(report.generated_at);
        metadata.phi_fields_modified = Some(report.phi_fields_modified());
        metadata.conformance_issues = Some(report.non_conformant_files);
        archived.write_metadata(&metadata)?;
        info!(
            listener = %listener_ae,
            study = %study_uid,
            conformant = report.fully_conformant,
            "Audit report generated"
        );
        Ok(report)
    }

    /// Serve until SIGINT, then shut down cooperatively.
    pub async fn run_until_shutdown(self) -> Result<()> {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown requested");
        self.shutdown_now().await
    }

    /// Stop intake, drain with bounded grace, close clients and stores.
    pub async fn shutdown_now(self) -> Result<()> {
        let _ = self.shutdown.send(true);

        let drain_deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        loop {
            let active = self.ledger.list_active().len();
            if active == 0 {
                break;
            }
            if tokio::time::Instant::now() >= drain_deadline {
                warn!(active, "Drain grace expired with studies still in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        for task in &self.tasks {
            task.abort();
        }
        self.manager.close_all().await;
        self.store.checkpoint().await.ok();
        self.store.close().await;
        info!("Gateway stopped");
        Ok(())
    }
}
