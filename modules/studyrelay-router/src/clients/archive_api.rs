//! Research-archive destination: one ZIP per study through the import
//! API.

use std::path::Path;

use tracing::debug;

use studyrelay_archive::archive::sanitize_uid;
use studyrelay_common::RouteDestination;
use studyrelay_dicom::dictionary::tags;
use studyrelay_dicom::AttributeSet;
use xnat_client::{UploadOptions, XnatClient};

use crate::clients::study_files;
use crate::error::{Result, RouterError};

pub struct ArchiveApiClient {
    client: XnatClient,
}

impl ArchiveApiClient {
    pub fn new(client: XnatClient) -> Self {
        Self { client }
    }

    pub async fn probe(&self) -> Result<()> {
        self.client
            .probe()
            .await
            .map_err(|e| RouterError::DestinationUnavailable(e.to_string()))
    }

    pub async fn send(
        &self,
        study_dir: &Path,
        edge: &RouteDestination,
        attrs: &AttributeSet,
    ) -> Result<usize> {
        let file_count = study_files(study_dir)?.len();

        let dir = study_dir.to_path_buf();
        let zip_bytes = tokio::task::spawn_blocking(move || xnat_client::zip_directory(&dir))
            .await
            .map_err(|e| RouterError::Delivery(format!("zip task failed: {e}")))?
            .map_err(|e| RouterError::Delivery(e.to_string()))?;

        let opts = upload_options(edge, attrs);
        debug!(
            project = opts.project.as_deref().unwrap_or("-"),
            subject = opts.subject.as_deref().unwrap_or("-"),
            bytes = zip_bytes.len(),
            "Uploading study to research archive"
        );
        self.client
            .upload_study(zip_bytes, &opts)
            .await
            .map_err(|e| RouterError::Delivery(e.to_string()))?;
        Ok(file_count)
    }
}

/// Derive upload metadata from the edge settings and the study's (already
/// rewritten) attributes.
pub fn upload_options(edge: &RouteDestination, attrs: &AttributeSet) -> UploadOptions {
    let patient_id = attrs.patient_id().unwrap_or_default();
    let subject = match (&edge.subject_prefix, patient_id) {
        (_, "") => None,
        (Some(prefix), id) => Some(format!("{prefix}{id}")),
        (None, id) => Some(id.to_string()),
    };

    let session_base = attrs
        .string(tags::STUDY_ID)
        .filter(|s| !s.is_empty())
        .or_else(|| attrs.string(tags::ACCESSION_NUMBER).filter(|s| !s.is_empty()))
        .map(str::to_string)
        .or_else(|| attrs.study_uid().map(|uid| sanitize_uid(uid)));
    let session = session_base.map(|base| match &edge.session_prefix {
        Some(prefix) => format!("{prefix}{base}"),
        None => base,
    });

    UploadOptions {
        project: edge.project_id.clone(),
        subject,
        session,
        auto_archive: edge.auto_archive,
    }
}
