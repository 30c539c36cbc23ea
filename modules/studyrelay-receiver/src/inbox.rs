//! The instance sink behind a listener: durable inbox writes plus the
//! store audit trail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error};

use studyrelay_dicom::codec;
use studyrelay_protocol::{AssociationContext, InstanceSink, ReceivedInstance, StoreOutcome};

use crate::audit_log::{StoreAuditLog, StoreAuditRecord};
use crate::layout::RouteLayout;
use crate::{UNKNOWN_SERIES, UNKNOWN_STUDY};

/// Writes received instances into the listener's inbox:
/// `incoming/{StudyUID}/{SeriesUID}/{SOPInstanceUID}.dcm`, tmp + fsync +
/// rename, success answered only after durability.
pub struct InboxWriter {
    layout: RouteLayout,
    audit: StoreAuditLog,
    /// Which peer sent each study, for the StudyReady event.
    calling_by_study: Arc<Mutex<HashMap<String, String>>>,
}

impl InboxWriter {
    pub fn new(layout: RouteLayout) -> Self {
        let audit = StoreAuditLog::new(layout.logs());
        Self {
            layout,
            audit,
            calling_by_study: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Shared with the watcher so StudyReady can carry the calling AE.
    pub fn calling_map(&self) -> Arc<Mutex<HashMap<String, String>>> {
        self.calling_by_study.clone()
    }

    fn write_instance(&self, instance: &ReceivedInstance) -> std::io::Result<(String, u64)> {
        let dataset = &instance.dataset;
        let study_uid = dataset
            .study_uid()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_STUDY)
            .to_string();
        let series_uid = dataset
            .series_uid()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SERIES)
            .to_string();
        let sop_uid = dataset
            .sop_uid()
            .filter(|s| !s.is_empty())
            .unwrap_or(&instance.meta.media_storage_sop_instance_uid)
            .to_string();

        let path = self.layout.instance_path(&study_uid, &series_uid, &sop_uid);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("dcm.part");
        codec::write_file(&tmp, &instance.meta, dataset)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::rename(&tmp, &path)?;
        let bytes = std::fs::metadata(&path)?.len();
        Ok((study_uid, bytes))
    }
}

#[async_trait]
impl InstanceSink for InboxWriter {
    async fn store(&self, assoc: &AssociationContext, instance: ReceivedInstance) -> StoreOutcome {
        let sop_uid = instance
            .dataset
            .sop_uid()
            .unwrap_or(&instance.meta.media_storage_sop_instance_uid)
            .to_string();
        let record_base = StoreAuditRecord {
            calling_ae: assoc.calling_ae.clone(),
            patient_id: instance.dataset.patient_id().unwrap_or_default().to_string(),
            study_uid: String::new(),
            series_uid: instance
                .dataset
                .series_uid()
                .unwrap_or(UNKNOWN_SERIES)
                .to_string(),
            sop_uid: sop_uid.clone(),
            modality: instance.dataset.modality().unwrap_or_default().to_string(),
            bytes: 0,
        };

        // File IO off the async executor; one instance at a time per call.
        let this = self;
        let result = tokio::task::block_in_place(|| this.write_instance(&instance));

        match result {
            Ok((study_uid, bytes)) => {
                if let Ok(mut map) = self.calling_by_study.lock() {
                    map.entry(study_uid.clone())
                        .or_insert_with(|| assoc.calling_ae.clone());
                }
                self.audit.append(&StoreAuditRecord {
                    study_uid: study_uid.clone(),
                    bytes,
                    ..record_base
                });
                debug!(
                    listener = self.layout.ae_title(),
                    study = %study_uid,
                    sop = %sop_uid,
                    bytes,
                    "Instance stored"
                );
                StoreOutcome::Success
            }
            Err(e) => {
                // A single instance failure answers that instance only;
                // the association continues.
                error!(
                    listener = self.layout.ae_title(),
                    sop = %sop_uid,
                    error = %e,
                    "Failed to store instance"
                );
                StoreOutcome::Failure {
                    message: e.to_string(),
                }
            }
        }
    }
}
