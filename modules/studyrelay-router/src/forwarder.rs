//! The per-route forward orchestrator: a fixed worker pool over the
//! route's StudyReady queue, sliding-window admission, the per-study
//! pipeline (validate → filter → select → rewrite → deliver → archive),
//! and per-edge retries.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use studyrelay_archive::ArchiveManager;
use studyrelay_broker::Broker;
use studyrelay_common::{
    DestinationState, IdType, RouteConfig, RouteDestination, StudyReady, TransferState,
};
use studyrelay_deid::library::ScriptLibrary;
use studyrelay_deid::script::HashedUid;
use studyrelay_deid::{Executor, ExecutorOptions, SaltedUidHasher};
use studyrelay_dicom::dictionary::tags;
use studyrelay_dicom::{codec, AttributeSet};
use studyrelay_receiver::RouteLayout;

use crate::clients::study_files;
use crate::destinations::DestinationManager;
use crate::error::{Result, RouterError};
use crate::rules;
use crate::transfer::TransferLedger;

/// Everything a route's workers need, shared across routes.
pub struct ForwarderDeps {
    pub manager: Arc<DestinationManager>,
    pub executor: Arc<Executor>,
    pub library: Arc<ScriptLibrary>,
    pub brokers: HashMap<String, Arc<Broker>>,
    pub archive: Arc<ArchiveManager>,
    pub ledger: Arc<TransferLedger>,
    /// hashUID salt when no broker scopes the hashing. Stable for the
    /// life of the process.
    pub process_salt: String,
}

/// Sliding-window admission counter: at most `limit` admissions in any
/// `window`.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn try_admit(&self) -> bool {
        if self.limit == 0 {
            return true;
        }
        let Ok(mut admissions) = self.admissions.lock() else {
            return true;
        };
        let now = Instant::now();
        while admissions
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            admissions.pop_front();
        }
        if admissions.len() < self.limit as usize {
            admissions.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Over-limit studies wait `2^attempt` minutes, capped.
pub fn admission_backoff(attempt: u32) -> Duration {
    Duration::from_secs(60 * 2u64.pow(attempt.min(6)))
}

struct Job {
    ready: StudyReady,
    admission_attempts: u32,
}

pub struct RouteForwarder {
    route: Arc<RouteConfig>,
    layout: RouteLayout,
    deps: Arc<ForwarderDeps>,
    limiter: Arc<RateLimiter>,
}

impl RouteForwarder {
    pub fn new(route: RouteConfig, layout: RouteLayout, deps: Arc<ForwarderDeps>) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            route.rate_limit_per_minute,
            Duration::from_secs(60),
        ));
        Self {
            route: Arc::new(route),
            layout,
            deps,
            limiter,
        }
    }

    /// Start the worker pool consuming StudyReady events.
    pub fn spawn(
        self,
        mut events: mpsc::UnboundedReceiver<StudyReady>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel::<Job>();
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));
        let mut handles = Vec::new();

        // Bridge StudyReady events into the job queue.
        let bridge_tx = jobs_tx.clone();
        let mut bridge_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(ready) => {
                            if bridge_tx.send(Job { ready, admission_attempts: 0 }).is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                    changed = bridge_shutdown.changed() => {
                        if changed.is_err() || *bridge_shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }));

        let edge_slots = Arc::new(Semaphore::new(self.route.max_concurrent_transfers.max(1)));
        for worker in 0..self.route.worker_threads.max(1) {
            let route = self.route.clone();
            let layout = self.layout.clone();
            let deps = self.deps.clone();
            let limiter = self.limiter.clone();
            let jobs_rx = jobs_rx.clone();
            let jobs_tx = jobs_tx.clone();
            let edge_slots = edge_slots.clone();
            let mut shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = jobs_rx.lock().await;
                        tokio::select! {
                            job = rx.recv() => match job {
                                Some(job) => job,
                                None => return,
                            },
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    return;
                                }
                                continue;
                            }
                        }
                    };

                    if !limiter.try_admit() {
                        let delay = admission_backoff(job.admission_attempts);
                        info!(
                            route = %route.ae_title,
                            study = %job.ready.study_uid,
                            retry_in_secs = delay.as_secs(),
                            "Admission rate limit reached, requeueing study"
                        );
                        let tx = jobs_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(Job {
                                ready: job.ready,
                                admission_attempts: job.admission_attempts + 1,
                            });
                        });
                        continue;
                    }

                    let study = job.ready.study_uid.clone();
                    if let Err(e) =
                        process_study(&route, &layout, &deps, &edge_slots, job.ready).await
                    {
                        error!(
                            route = %route.ae_title,
                            worker,
                            study = %study,
                            error = %e,
                            "Study pipeline failed"
                        );
                    }
                }
            }));
        }
        handles
    }
}

/// The worker body for one study.
async fn process_study(
    route: &RouteConfig,
    layout: &RouteLayout,
    deps: &Arc<ForwarderDeps>,
    edge_slots: &Arc<Semaphore>,
    ready: StudyReady,
) -> Result<()> {
    let transfer_id = deps.ledger.create(
        &route.ae_title,
        &ready.study_uid,
        ready.calling_ae.clone(),
        ready.file_count,
        ready.total_bytes,
    );
    info!(
        route = %route.ae_title,
        study = %ready.study_uid,
        transfer = %transfer_id,
        files = ready.file_count,
        "Study admitted"
    );

    // Representative attributes from the first stored instance.
    let mut attrs = match representative_attrs(&ready.path) {
        Ok(attrs) => attrs,
        Err(e) => {
            let reason = format!("unreadable study: {e}");
            fail_study(route, layout, deps, transfer_id, &ready.path, &ready.study_uid, &reason)?;
            return Ok(());
        }
    };

    // Validate (fail-fast on reject).
    match rules::validate(&attrs, &route.validation_rules) {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                warn!(route = %route.ae_title, study = %ready.study_uid, "{warning}");
            }
        }
        Err(e) => {
            fail_study(
                route,
                layout,
                deps,
                transfer_id,
                &ready.path,
                &ready.study_uid,
                &e.to_string(),
            )?;
            return Ok(());
        }
    }

    // Filter: a dropped study is archived with its outcome and leaves the
    // pipeline as a clean terminal state.
    if let Some(reason) = rules::filter(&attrs, &route.filter_rules)? {
        info!(route = %route.ae_title, study = %ready.study_uid, reason = %reason, "Study filtered");
        let archived = deps.archive.archive_original(
            &route.ae_title,
            &ready.study_uid,
            &ready.path,
            ready.calling_ae.as_deref(),
        )?;
        let mut metadata = archived.read_metadata()?;
        metadata.outcome = Some(format!("filtered: {reason}"));
        archived.write_metadata(&metadata)?;
        std::fs::remove_dir_all(&ready.path)?;
        deps.ledger.finalize(transfer_id);
        return Ok(());
    }

    // Select destination edges (config order, runtime disables honored).
    let selected: Vec<RouteDestination> =
        rules::select_destinations(&attrs, &route.routing_rules, &route.destinations)?
            .into_iter()
            .filter(|edge| deps.manager.is_enabled(&edge.name))
            .cloned()
            .collect();
    if selected.is_empty() {
        let reason = "no destinations selected";
        fail_study(route, layout, deps, transfer_id, &ready.path, &ready.study_uid, reason)?;
        return Ok(());
    }

    // Original snapshot must be durable before anything is delivered.
    let archived = deps.archive.archive_original(
        &route.ae_title,
        &ready.study_uid,
        &ready.path,
        ready.calling_ae.as_deref(),
    )?;

    // Claim the study into this transfer's processing directory.
    let processing_dir = layout.processing().join(transfer_id.to_string());
    if let Some(parent) = processing_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&ready.path, &processing_dir)?;

    deps.ledger.set_state(transfer_id, TransferState::Processing);

    // Route-level tag rewrite, applied to every file in place.
    if !route.tag_modifications.is_empty() {
        apply_modifications_to_dir(&processing_dir, &route.tag_modifications)?;
        rules::apply_modifications(&mut attrs, &route.tag_modifications)?;
    }

    let names: Vec<String> = selected.iter().map(|e| e.name.clone()).collect();
    deps.ledger.set_destinations(transfer_id, &names);
    deps.ledger.set_state(transfer_id, TransferState::Forwarding);

    // Edges proceed concurrently up to max_concurrent_transfers.
    let mut edge_tasks = Vec::new();
    for edge in selected {
        let deps = deps.clone();
        let route_ae = route.ae_title.clone();
        let study_uid = ready.study_uid.clone();
        let processing_dir = processing_dir.clone();
        let attrs = attrs.clone();
        let slots = edge_slots.clone();
        edge_tasks.push(tokio::spawn(async move {
            // The semaphore lives for the whole run; acquire cannot fail.
            let _permit = slots.acquire_owned().await.ok();
            deliver_edge(
                deps,
                route_ae,
                transfer_id,
                edge,
                processing_dir,
                attrs,
                study_uid,
            )
            .await
        }));
    }

    let mut anon_dirs: Vec<PathBuf> = Vec::new();
    let mut staging_dirs: Vec<PathBuf> = Vec::new();
    let mut script_name = None;
    let mut broker_name = None;
    let mut hash_uids_enabled = false;
    for task in edge_tasks {
        match task.await {
            Ok(outcome) => {
                if let Some(dir) = outcome.staging_dir {
                    if outcome.anonymized {
                        anon_dirs.push(dir.clone());
                    }
                    staging_dirs.push(dir);
                }
                script_name = script_name.or(outcome.script_name);
                broker_name = broker_name.or(outcome.broker_name);
                hash_uids_enabled |= outcome.hash_uids;
            }
            Err(e) => error!(transfer = %transfer_id, error = %e, "Edge task panicked"),
        }
    }

    // Archive: anonymized snapshot, per-destination statuses, metadata.
    let mut metadata = archived.read_metadata()?;
    if let Some(first_anon) = anon_dirs.first() {
        let count = archived.add_anonymized(first_anon)?;
        metadata.anonymized_file_count = count;
        metadata.anonymized_at = Some(Utc::now());
    }
    metadata.script_name = script_name;
    metadata.broker_name = broker_name;
    metadata.hash_uids_enabled = hash_uids_enabled;
    archived.write_metadata(&metadata)?;

    let snapshot = deps.ledger.destination_snapshot(transfer_id);
    for (name, delivery) in &snapshot {
        archived.write_destination_status(name, delivery)?;
    }

    // Terminal move: any success lands in completed/, none in failed/.
    let terminal = deps
        .ledger
        .finalize(transfer_id)
        .unwrap_or(TransferState::Failed);
    let succeeded = snapshot
        .values()
        .any(|d| d.state == DestinationState::Success);
    let terminal_root = if succeeded {
        layout.completed()
    } else {
        layout.failed()
    };
    let final_dir = terminal_dir(&terminal_root, &ready.study_uid)?;
    std::fs::rename(&processing_dir, &final_dir)?;
    if !succeeded {
        let reasons: Vec<String> = snapshot
            .iter()
            .map(|(name, d)| {
                format!(
                    "{name}: {}",
                    d.error.as_deref().unwrap_or("no attempt recorded")
                )
            })
            .collect();
        std::fs::write(
            final_dir.join("rejection_reason.txt"),
            format!("delivery failed for every destination\n{}\n", reasons.join("\n")),
        )?;
    }

    // Per-edge staging directories are no longer needed.
    for dir in staging_dirs {
        let _ = std::fs::remove_dir_all(dir);
    }

    info!(
        route = %route.ae_title,
        study = %ready.study_uid,
        transfer = %transfer_id,
        state = %terminal,
        "Study settled"
    );
    Ok(())
}

/// What one edge delivery produced, for archive metadata and staging
/// cleanup.
struct EdgeOutcome {
    /// A per-edge upload directory distinct from the processing directory.
    staging_dir: Option<PathBuf>,
    /// Whether that directory is a de-identified snapshot (vs a broker
    /// rewrite only).
    anonymized: bool,
    script_name: Option<String>,
    broker_name: Option<String>,
    hash_uids: bool,
}

async fn deliver_edge(
    deps: Arc<ForwarderDeps>,
    route_ae: String,
    transfer_id: Uuid,
    edge: RouteDestination,
    processing_dir: PathBuf,
    attrs: AttributeSet,
    study_uid: String,
) -> EdgeOutcome {
    let broker = edge
        .use_broker
        .then(|| edge.broker_name.as_ref())
        .flatten()
        .and_then(|name| deps.brokers.get(name))
        .cloned();
    if edge.use_broker && broker.is_none() {
        warn!(
            destination = %edge.name,
            broker = edge.broker_name.as_deref().unwrap_or("-"),
            "Edge wants a broker that is not configured; continuing without"
        );
    }

    let mut outcome = EdgeOutcome {
        staging_dir: None,
        anonymized: false,
        script_name: None,
        broker_name: broker.as_ref().map(|b| b.name().to_string()),
        hash_uids: broker.as_ref().map(|b| b.hash_uids()).unwrap_or(false),
    };

    let mut prepared: Option<(PathBuf, AttributeSet)> = None;
    let total_attempts = edge.retry_count + 1;

    for attempt in 0..total_attempts {
        if attempt > 0 {
            deps.ledger
                .set_destination_state(transfer_id, &edge.name, DestinationState::RetryPending);
            let delay = Duration::from_secs(edge.retry_delay_secs.max(1));
            deps.ledger.set_next_retry(
                transfer_id,
                &edge.name,
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()),
            );
            tokio::time::sleep(delay).await;
            deps.ledger
                .set_destination_state(transfer_id, &edge.name, DestinationState::Pending);
            deps.ledger.set_next_retry(transfer_id, &edge.name, None);
        }

        let started = Utc::now();
        let attempt_start = Instant::now();

        // Unavailable destinations fail the attempt immediately.
        if !deps.manager.is_available(&edge.name) || !deps.manager.is_enabled(&edge.name) {
            record_failure(
                &deps,
                transfer_id,
                &edge,
                started,
                attempt_start,
                attempt,
                total_attempts,
                format!("destination {} unavailable", edge.name),
            );
            continue;
        }

        // Prepare the upload directory once; reused across retries.
        if prepared.is_none() {
            match prepare_upload(
                &deps,
                &route_ae,
                &edge,
                &broker,
                &processing_dir,
                &attrs,
                &study_uid,
                transfer_id,
            )
            .await
            {
                Ok((dir, upload_attrs, script_used)) => {
                    if dir != processing_dir {
                        outcome.staging_dir = Some(dir.clone());
                        outcome.anonymized = edge.anonymize;
                    }
                    outcome.script_name = script_used;
                    prepared = Some((dir, upload_attrs));
                }
                Err(e) => {
                    record_failure(
                        &deps,
                        transfer_id,
                        &edge,
                        started,
                        attempt_start,
                        attempt,
                        total_attempts,
                        e.to_string(),
                    );
                    continue;
                }
            }
        }
        let (upload_dir, upload_attrs) = prepared.as_ref().map(|(d, a)| (d.clone(), a.clone()))
            .unwrap_or((processing_dir.clone(), attrs.clone()));

        match deps
            .manager
            .send(&edge.name, &upload_dir, &edge, &upload_attrs, &route_ae)
            .await
        {
            Ok(sent) => {
                deps.ledger.record_attempt(
                    transfer_id,
                    &edge.name,
                    started,
                    attempt_start.elapsed().as_millis() as u64,
                    sent.files_transferred,
                    None,
                );
                deps.ledger
                    .set_destination_state(transfer_id, &edge.name, DestinationState::Success);
                info!(
                    route = %route_ae,
                    destination = %edge.name,
                    study = %study_uid,
                    files = sent.files_transferred,
                    attempt = attempt + 1,
                    "Delivery succeeded"
                );
                return outcome;
            }
            Err(e) => {
                record_failure(
                    &deps,
                    transfer_id,
                    &edge,
                    started,
                    attempt_start,
                    attempt,
                    total_attempts,
                    e.to_string(),
                );
            }
        }
    }

    outcome
}

/// Record one failed attempt and leave the edge in the right state for
/// either a retry or its terminal failure.
#[allow(clippy::too_many_arguments)]
fn record_failure(
    deps: &Arc<ForwarderDeps>,
    transfer_id: Uuid,
    edge: &RouteDestination,
    started: chrono::DateTime<Utc>,
    attempt_start: Instant,
    attempt: u32,
    total_attempts: u32,
    message: String,
) {
    warn!(
        destination = %edge.name,
        attempt = attempt + 1,
        of = total_attempts,
        error = %message,
        "Delivery attempt failed"
    );
    deps.ledger.record_attempt(
        transfer_id,
        &edge.name,
        started,
        attempt_start.elapsed().as_millis() as u64,
        0,
        Some(message),
    );
    deps.ledger
        .set_destination_state(transfer_id, &edge.name, DestinationState::Failed);
}

/// Build the directory this edge uploads: the processing directory as-is,
/// a de-identified copy, or a broker-rewritten copy.
#[allow(clippy::too_many_arguments)]
async fn prepare_upload(
    deps: &Arc<ForwarderDeps>,
    route_ae: &str,
    edge: &RouteDestination,
    broker: &Option<Arc<Broker>>,
    processing_dir: &Path,
    attrs: &AttributeSet,
    study_uid: &str,
    transfer_id: Uuid,
) -> Result<(PathBuf, AttributeSet, Option<String>)> {
    if let Some(broker) = broker {
        broker
            .record_route_use(route_ae, &edge.name, study_uid)
            .await;
    }

    if edge.anonymize {
        let script_name = edge.script_name.clone().unwrap_or_else(|| "baseline".to_string());
        let mut content = deps
            .library
            .content(&script_name)
            .map_err(RouterError::Deid)?;

        // Broker-backed identity and date handling rides on the same
        // script so the result goes through the verification gate whole.
        if let Some(broker) = broker {
            if let Some(patient_id) = attrs.patient_id().filter(|p| !p.is_empty()) {
                let pseudonym = broker.pseudonym(patient_id, IdType::PatientId).await?;
                // The name form keeps to the verifier's anonymous-name
                // alphabet.
                let pseudonym_name = pseudonym.replace('-', "_");
                content.push_str(&format!(
                    "\n(0010,0020) := \"{pseudonym}\"\n(0010,0010) := \"{pseudonym_name}\"\n"
                ));
                let shift = broker.date_shift(patient_id).await?;
                if shift != 0 {
                    for tag in ["0008,0020", "0008,0021", "0010,0030"] {
                        content.push_str(&format!(
                            "({tag}) := shiftDateTimeByIncrement[({tag}), \"{shift}\", \"days\"]\n"
                        ));
                    }
                }
            }
        }

        let script = deps.executor.parse_cached(&content).map_err(|e| {
            // A broken script disables the edge until fixed; surfaced loudly.
            error!(
                destination = %edge.name,
                script = %script_name,
                error = %e,
                "Anonymization script rejected"
            );
            RouterError::Deid(e)
        })?;

        let salt = broker
            .as_ref()
            .map(|b| b.uid_salt())
            .unwrap_or_else(|| deps.process_salt.clone());

        let anon_dir = processing_dir.with_file_name(format!(
            "{transfer_id}-{}-anon",
            sanitize_edge_name(&edge.name)
        ));
        let files = study_files(processing_dir)?;
        let mut hashed: Vec<HashedUid> = Vec::new();

        for file in files {
            let rel = file
                .strip_prefix(processing_dir)
                .unwrap_or(&file)
                .to_path_buf();
            let output = anon_dir.join(&rel);
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let executor = deps.executor.clone();
            let script = script.clone();
            let hasher = SaltedUidHasher::new(salt.clone());
            let input = file.clone();
            let result = tokio::task::spawn_blocking(move || {
                executor.anonymize_file(
                    &input,
                    &output,
                    &script,
                    &hasher,
                    &ExecutorOptions::default(),
                )
            })
            .await
            .map_err(|e| RouterError::Delivery(format!("anonymization task failed: {e}")));
            match result.and_then(|r| r.map_err(RouterError::Deid)) {
                Ok(out) => hashed.extend(out.hashed_uids),
                Err(e) => {
                    // Leave no partial anonymized snapshot behind.
                    let _ = std::fs::remove_dir_all(&anon_dir);
                    return Err(e);
                }
            }
        }

        if let Some(broker) = broker {
            if broker.hash_uids() {
                for uid in &hashed {
                    let id_type = match uid.tag {
                        t if t == tags::STUDY_INSTANCE_UID => IdType::StudyUid,
                        t if t == tags::SERIES_INSTANCE_UID => IdType::SeriesUid,
                        t if t == tags::SOP_INSTANCE_UID => IdType::SopUid,
                        _ => continue,
                    };
                    broker
                        .record_hashed_uid(&uid.original, &uid.hashed, id_type)
                        .await?;
                }
            }
        }

        let upload_attrs = representative_attrs(&anon_dir)?;
        return Ok((anon_dir, upload_attrs, Some(script_name)));
    }

    if let Some(broker) = broker {
        // Pseudonymization without anonymization: a tag-rewrite pass on a
        // copy of the study.
        let Some(patient_id) = attrs.patient_id().filter(|p| !p.is_empty()) else {
            return Ok((processing_dir.to_path_buf(), attrs.clone(), None));
        };
        let pseudonym = broker.pseudonym(patient_id, IdType::PatientId).await?;
        let pseudonym_name = pseudonym.replace('-', "_");

        let broker_dir = processing_dir.with_file_name(format!(
            "{transfer_id}-{}-broker",
            sanitize_edge_name(&edge.name)
        ));
        for file in study_files(processing_dir)? {
            let rel = file
                .strip_prefix(processing_dir)
                .unwrap_or(&file)
                .to_path_buf();
            let output = broker_dir.join(&rel);
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let pseudonym = pseudonym.clone();
            let pseudonym_name = pseudonym_name.clone();
            let input = file.clone();
            let result = tokio::task::spawn_blocking(move || -> Result<()> {
                let mut decoded = codec::read_file(&input)?;
                decoded.dataset.set_string(tags::PATIENT_ID, pseudonym);
                decoded.dataset.set_string(tags::PATIENT_NAME, pseudonym_name);
                codec::write_file(&output, &decoded.meta, &decoded.dataset)?;
                Ok(())
            })
            .await
            .map_err(|e| RouterError::Delivery(format!("broker rewrite task failed: {e}")));
            if let Err(e) = result.and_then(|r| r) {
                let _ = std::fs::remove_dir_all(&broker_dir);
                return Err(e);
            }
        }

        let mut upload_attrs = attrs.clone();
        upload_attrs.set_string(tags::PATIENT_ID, pseudonym.clone());
        upload_attrs.set_string(tags::PATIENT_NAME, pseudonym_name);
        return Ok((broker_dir, upload_attrs, None));
    }

    Ok((processing_dir.to_path_buf(), attrs.clone(), None))
}

fn sanitize_edge_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Attributes of the study's first stored instance.
fn representative_attrs(study_dir: &Path) -> Result<AttributeSet> {
    let files = study_files(study_dir)?;
    let first = files
        .first()
        .ok_or_else(|| RouterError::Delivery(format!("{} is empty", study_dir.display())))?;
    Ok(codec::read_header(first)?.header)
}

fn apply_modifications_to_dir(
    dir: &Path,
    mods: &[studyrelay_common::TagModification],
) -> Result<()> {
    for file in study_files(dir)? {
        let mut decoded = codec::read_file(&file)?;
        rules::apply_modifications(&mut decoded.dataset, mods)?;
        let tmp = file.with_extension("dcm.rewrite");
        codec::write_file(&tmp, &decoded.meta, &decoded.dataset)?;
        std::fs::rename(&tmp, &file)?;
    }
    Ok(())
}

/// Route a study that can never be delivered into failed/{date}/ with a
/// reason artifact.
fn fail_study(
    route: &RouteConfig,
    layout: &RouteLayout,
    deps: &Arc<ForwarderDeps>,
    transfer_id: Uuid,
    study_path: &Path,
    study_uid: &str,
    reason: &str,
) -> Result<()> {
    warn!(route = %route.ae_title, study = %study_uid, reason = %reason, "Study rejected");
    let final_dir = terminal_dir(&layout.failed(), study_uid)?;
    if study_path.exists() {
        std::fs::rename(study_path, &final_dir)?;
    } else {
        std::fs::create_dir_all(&final_dir)?;
    }
    std::fs::write(final_dir.join("rejection_reason.txt"), format!("{reason}\n"))?;
    deps.ledger.set_state(transfer_id, TransferState::Failed);
    Ok(())
}

/// `{root}/{YYYY-MM-DD}/{study}` with a numeric suffix if the study
/// already settled once today.
fn terminal_dir(root: &Path, study_uid: &str) -> std::io::Result<PathBuf> {
    let date_dir = root.join(Utc::now().format("%Y-%m-%d").to_string());
    std::fs::create_dir_all(&date_dir)?;
    let sanitized = studyrelay_archive::archive::sanitize_uid(study_uid);
    let mut candidate = date_dir.join(&sanitized);
    let mut n = 2;
    while candidate.exists() {
        candidate = date_dir.join(format!("{sanitized}-{n}"));
        n += 1;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_respects_window() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));
        assert!(limiter.try_admit());
        assert!(limiter.try_admit());
        assert!(!limiter.try_admit());
        std::thread::sleep(Duration::from_millis(250));
        assert!(limiter.try_admit());
    }

    #[test]
    fn zero_limit_disables_admission_control() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..100 {
            assert!(limiter.try_admit());
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(admission_backoff(0), Duration::from_secs(60));
        assert_eq!(admission_backoff(1), Duration::from_secs(120));
        assert_eq!(admission_backoff(3), Duration::from_secs(480));
        assert_eq!(admission_backoff(6), admission_backoff(12));
    }
}
