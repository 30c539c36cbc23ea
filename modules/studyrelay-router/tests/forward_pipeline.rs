//! End-to-end forwarder scenarios over a temp filesystem, the sim peer
//! stack, and a real sqlite-backed broker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use studyrelay_archive::ArchiveManager;
use studyrelay_broker::{Broker, CrosswalkStore};
use studyrelay_common::{
    BrokerConfig, BrokerScheme, DateShiftConfig, DestinationConfig, DestinationState, FilterAction,
    FilterRule, OnFailure, RouteConfig, RouteDestination, RuleOperator, StudyReady, TransferState,
    ValidationKind, ValidationRule,
};
use studyrelay_deid::library::ScriptLibrary;
use studyrelay_deid::Executor;
use studyrelay_dicom::dictionary::tags;
use studyrelay_dicom::{codec, syntax, Attribute, AttributeSet, AttributeValue, FileMeta, Vr};
use studyrelay_protocol::sim::SimConnector;
use studyrelay_receiver::RouteLayout;
use studyrelay_router::{DestinationManager, ForwarderDeps, RouteForwarder, TransferLedger};
use tempfile::TempDir;

struct World {
    _dir: TempDir,
    base: PathBuf,
    layout: RouteLayout,
    deps: Arc<ForwarderDeps>,
    connector: Arc<SimConnector>,
    events: mpsc::UnboundedSender<StudyReady>,
    shutdown: watch::Sender<bool>,
}

async fn build_world(route: RouteConfig) -> World {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_path_buf();

    let layout = RouteLayout::new(&base.join("data"), &route.ae_title);
    layout.ensure().unwrap();

    let connector = Arc::new(SimConnector::new(base.join("peers")));
    let destinations = HashMap::from([
        (
            "disk".to_string(),
            DestinationConfig::Filesystem {
                base_path: base.join("fsdest"),
                directory_pattern: "{PatientID}".into(),
                naming_pattern: String::new(),
                organize_by_listener: true,
            },
        ),
        (
            "pacs".to_string(),
            DestinationConfig::PeerNode {
                called_ae_title: "PACS1".into(),
                host: "127.0.0.1".into(),
                port: 11112,
                calling_ae_title: "RELAY".into(),
                tls: false,
                timeout_secs: 5,
                max_retries: 1,
            },
        ),
    ]);
    let manager =
        Arc::new(DestinationManager::from_config(&destinations, connector.clone()).unwrap());

    let store = CrosswalkStore::open(&base.join("crosswalk.db")).await.unwrap();
    let broker = Arc::new(Broker::new(
        "b1",
        BrokerConfig {
            scheme: BrokerScheme::Sequential,
            prefix: "SUBJ".into(),
            date_shift: DateShiftConfig::default(),
            hash_uids: true,
            max_cache_size: 100,
            script: None,
        },
        store,
    ));

    let deps = Arc::new(ForwarderDeps {
        manager,
        executor: Arc::new(Executor::new()),
        library: Arc::new(ScriptLibrary::open(base.join("scripts")).unwrap()),
        brokers: HashMap::from([("b1".to_string(), broker)]),
        archive: Arc::new(ArchiveManager::new(base.join("data"))),
        ledger: Arc::new(TransferLedger::new()),
        process_salt: "test-salt".into(),
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    RouteForwarder::new(route, layout.clone(), deps.clone()).spawn(events_rx, shutdown_rx);

    World {
        _dir: dir,
        base,
        layout,
        deps,
        connector,
        events: events_tx,
        shutdown: shutdown_tx,
    }
}

fn route(edges: Vec<RouteDestination>) -> RouteConfig {
    RouteConfig {
        ae_title: "R1".into(),
        port: 0,
        worker_threads: 2,
        max_concurrent_transfers: 4,
        quiet_period_secs: 1,
        rate_limit_per_minute: 0,
        validation_rules: Vec::new(),
        filter_rules: Vec::new(),
        routing_rules: Vec::new(),
        tag_modifications: Vec::new(),
        destinations: edges,
    }
}

fn write_instance(path: &Path, sop: &str, patient: &str) {
    let mut ds = AttributeSet::new();
    ds.put_string(tags::SOP_CLASS_UID, Vr::Ui, "1.2.840.10008.5.1.4.1.1.2");
    ds.put_string(tags::SOP_INSTANCE_UID, Vr::Ui, sop);
    ds.put_string(tags::STUDY_INSTANCE_UID, Vr::Ui, "1.2.3");
    ds.put_string(tags::SERIES_INSTANCE_UID, Vr::Ui, "1.2.3.1");
    ds.put_string(tags::PATIENT_NAME, Vr::Pn, "DOE^JANE");
    ds.put_string(tags::PATIENT_ID, Vr::Lo, patient);
    ds.put_string(tags::MODALITY, Vr::Cs, "CT");
    ds.put_string(tags::STUDY_DATE, Vr::Da, "20240115");
    ds.insert(Attribute {
        tag: tags::PIXEL_DATA,
        vr: Vr::Ow,
        value: AttributeValue::Bytes(vec![0x5A; 128]),
    });
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let meta = FileMeta::for_dataset(&ds, syntax::EXPLICIT_VR_LE);
    codec::write_file(path, &meta, &ds).unwrap();
}

fn seed_study(world: &World) -> StudyReady {
    let study_dir = world.layout.incoming().join("1.2.3");
    write_instance(&study_dir.join("1.2.3.1/1.2.3.1.1.dcm"), "1.2.3.1.1", "P1");
    write_instance(&study_dir.join("1.2.3.1/1.2.3.1.2.dcm"), "1.2.3.1.2", "P1");
    StudyReady {
        listener_ae: "R1".into(),
        study_uid: "1.2.3".into(),
        path: study_dir,
        file_count: 2,
        total_bytes: 0,
        calling_ae: Some("MODALITY".into()),
        completed_at: chrono::Utc::now(),
    }
}

async fn settled_state(world: &World) -> TransferState {
    for _ in 0..200 {
        if let Some(record) = world.deps.ledger.list().into_iter().next() {
            if matches!(
                record.state,
                TransferState::Completed | TransferState::Partial | TransferState::Failed
            ) {
                return record.state;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("study never settled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filesystem_delivery_without_anonymization() {
    let world = build_world(route(vec![RouteDestination::named("disk")])).await;
    let ready = seed_study(&world);
    let original_bytes =
        std::fs::read(ready.path.join("1.2.3.1/1.2.3.1.1.dcm")).unwrap();

    world.events.send(ready).unwrap();
    assert_eq!(settled_state(&world).await, TransferState::Completed);

    // Files copied verbatim to {dest}/{listener}/{PatientID}/...
    let delivered = world.base.join("fsdest/R1/P1");
    assert!(delivered.join("1.2.3.1/1.2.3.1.1.dcm").is_file());
    assert!(delivered.join("1.2.3.1/1.2.3.1.2.dcm").is_file());

    // Archive holds a byte-for-byte original snapshot.
    let archived = world.deps.archive.locate("R1", "1.2.3").unwrap();
    assert_eq!(
        std::fs::read(archived.original_dir().join("1.2.3.1/1.2.3.1.1.dcm")).unwrap(),
        original_bytes
    );
    assert!(!archived.anonymized_dir().exists());

    // Destination status blob recorded the success.
    let status = archived.read_destination_status("disk").unwrap();
    assert_eq!(status.state, DestinationState::Success);
    assert_eq!(status.files_transferred, 2);

    // The study left incoming and processing.
    assert!(!world.layout.incoming().join("1.2.3").exists());
    assert_eq!(std::fs::read_dir(world.layout.processing()).unwrap().count(), 0);
    let _ = world.shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn verification_failure_suppresses_output() {
    let mut edge = RouteDestination::named("disk");
    edge.anonymize = true;
    edge.script_name = Some("noop".into());
    let world = build_world(route(vec![edge])).await;

    // A script that claims to anonymize but changes nothing.
    world
        .deps
        .library
        .add("noop", "No-op", "", "(0010,0040) keep")
        .unwrap();

    world.events.send(seed_study(&world)).unwrap();
    assert_eq!(settled_state(&world).await, TransferState::Failed);

    let record = world.deps.ledger.list().into_iter().next().unwrap();
    let delivery = record.destinations.get("disk").unwrap();
    assert_eq!(delivery.state, DestinationState::Failed);
    assert!(
        delivery.error.as_deref().unwrap_or("").contains("Verification failed"),
        "{:?}",
        delivery.error
    );

    // Originals preserved, no anonymized output anywhere.
    let archived = world.deps.archive.locate("R1", "1.2.3").unwrap();
    assert!(archived.original_dir().join("1.2.3.1/1.2.3.1.1.dcm").is_file());
    assert!(!archived.anonymized_dir().exists());
    assert!(!world.base.join("fsdest").join("R1").exists());

    // Failed studies land in failed/{date} with a reason artifact.
    let failed_days: Vec<_> = std::fs::read_dir(world.layout.failed())
        .unwrap()
        .collect();
    assert_eq!(failed_days.len(), 1);
    let _ = world.shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broker_backed_anonymization_delivers_pseudonyms() {
    let mut edge = RouteDestination::named("disk");
    edge.anonymize = true;
    edge.script_name = Some("baseline".into());
    edge.use_broker = true;
    edge.broker_name = Some("b1".into());
    let world = build_world(route(vec![edge])).await;

    world.events.send(seed_study(&world)).unwrap();
    assert_eq!(settled_state(&world).await, TransferState::Completed);

    // The filesystem directory pattern expanded against the anonymized
    // attributes: the pseudonym, not P1.
    let delivered = world.base.join("fsdest/R1/SUBJ-00001");
    assert!(delivered.is_dir(), "pseudonymized directory missing");

    let file = delivered.join("1.2.3.1/1.2.3.1.1.dcm");
    let anonymized = codec::read_file(&file).unwrap();
    assert_eq!(anonymized.dataset.patient_id(), Some("SUBJ-00001"));
    // The name uses the verifier's anonymous alphabet (no hyphen).
    assert_eq!(anonymized.dataset.patient_name(), Some("SUBJ_00001"));
    assert_ne!(anonymized.dataset.study_uid(), Some("1.2.3"));
    assert_eq!(
        anonymized.dataset.string(tags::PATIENT_IDENTITY_REMOVED),
        Some("YES")
    );

    // Crosswalk: one patient mapping plus the three hashed UID kinds.
    let broker = world.deps.brokers.get("b1").unwrap();
    assert_eq!(
        broker
            .pseudonym("P1", studyrelay_common::IdType::PatientId)
            .await
            .unwrap(),
        "SUBJ-00001"
    );
    assert_eq!(
        broker
            .reverse(
                anonymized.dataset.study_uid().unwrap(),
                studyrelay_common::IdType::StudyUid
            )
            .await
            .unwrap(),
        Some("1.2.3".to_string())
    );

    // Anonymized snapshot archived alongside the original.
    let archived = world.deps.archive.locate("R1", "1.2.3").unwrap();
    assert!(archived.anonymized_dir().join("1.2.3.1/1.2.3.1.1.dcm").is_file());
    let metadata = archived.read_metadata().unwrap();
    assert_eq!(metadata.script_name.as_deref(), Some("baseline"));
    assert_eq!(metadata.broker_name.as_deref(), Some("b1"));
    assert!(metadata.hash_uids_enabled);
    assert_eq!(metadata.anonymized_file_count, 2);
    let _ = world.shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peer_outage_recovers_through_retry() {
    let mut edge = RouteDestination::named("pacs");
    edge.retry_count = 2;
    edge.retry_delay_secs = 1;
    let world = build_world(route(vec![edge])).await;

    // Peer down when the study arrives.
    world.connector.health_flag().store(false, Ordering::SeqCst);
    let flag = world.connector.health_flag();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        flag.store(true, Ordering::SeqCst);
    });

    world.events.send(seed_study(&world)).unwrap();
    assert_eq!(settled_state(&world).await, TransferState::Completed);

    let record = world.deps.ledger.list().into_iter().next().unwrap();
    let delivery = record.destinations.get("pacs").unwrap();
    assert_eq!(delivery.state, DestinationState::Success);
    assert!(delivery.attempts >= 2, "expected a retry, got {}", delivery.attempts);
    assert!(!delivery.history.first().unwrap().success);
    assert!(delivery.history.last().unwrap().success);

    // The sim peer actually received the files.
    let peer_dir = world.base.join("peers/PACS1");
    assert_eq!(std::fs::read_dir(peer_dir).unwrap().count(), 2);
    let _ = world.shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filtered_study_is_archived_with_outcome() {
    let mut config = route(vec![RouteDestination::named("disk")]);
    config.filter_rules = vec![FilterRule {
        action: FilterAction::Exclude,
        tag: "Modality".into(),
        operator: RuleOperator::Equals,
        value: "CT".into(),
    }];
    let world = build_world(config).await;

    world.events.send(seed_study(&world)).unwrap();
    assert_eq!(settled_state(&world).await, TransferState::Completed);

    // Nothing delivered; archived with the filter outcome; inbox cleared.
    assert!(!world.base.join("fsdest/R1").exists());
    let archived = world.deps.archive.locate("R1", "1.2.3").unwrap();
    let metadata = archived.read_metadata().unwrap();
    assert!(metadata.outcome.as_deref().unwrap_or("").starts_with("filtered:"));
    assert!(!world.layout.incoming().join("1.2.3").exists());
    let _ = world.shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejecting_validation_moves_study_to_failed() {
    let mut config = route(vec![RouteDestination::named("disk")]);
    config.validation_rules = vec![ValidationRule {
        kind: ValidationKind::RequiredTag,
        tag: "AccessionNumber".into(),
        operator: None,
        value: None,
        min_length: None,
        max_length: None,
        on_failure: OnFailure::Reject,
    }];
    let world = build_world(config).await;

    world.events.send(seed_study(&world)).unwrap();
    assert_eq!(settled_state(&world).await, TransferState::Failed);

    // Study moved under failed/{date}/ with a reason artifact; nothing
    // was delivered or archived.
    let date_dirs: Vec<_> = std::fs::read_dir(world.layout.failed())
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(date_dirs.len(), 1);
    let study_dir = date_dirs[0].path().join("1.2.3");
    assert!(study_dir.is_dir());
    let reason = std::fs::read_to_string(study_dir.join("rejection_reason.txt")).unwrap();
    assert!(reason.contains("AccessionNumber"), "{reason}");
    assert!(world.deps.archive.locate("R1", "1.2.3").is_err());
    let _ = world.shutdown.send(true);
}
