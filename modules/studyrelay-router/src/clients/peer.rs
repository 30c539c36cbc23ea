//! Peer imaging-node client over the outbound protocol seam.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use studyrelay_dicom::codec;
use studyrelay_dicom::syntax;
use studyrelay_protocol::{PeerConnector, PeerEndpoint, PresentationContext};

use crate::clients::study_files;
use crate::error::{Result, RouterError};

pub struct PeerClient {
    endpoint: PeerEndpoint,
    connector: Arc<dyn PeerConnector>,
}

impl PeerClient {
    pub fn new(endpoint: PeerEndpoint, connector: Arc<dyn PeerConnector>) -> Self {
        Self { endpoint, connector }
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.endpoint.timeout_secs.max(1))
    }

    /// Protocol echo.
    pub async fn probe(&self) -> Result<()> {
        tokio::time::timeout(self.deadline(), self.connector.echo(&self.endpoint))
            .await
            .map_err(|_| {
                RouterError::DestinationUnavailable(format!(
                    "{} echo timed out",
                    self.endpoint.called_ae
                ))
            })??;
        Ok(())
    }

    /// One association per study: presentation contexts for each unique
    /// storage class among the files, each with the full advertised
    /// transfer-syntax list; released when the last file is sent.
    pub async fn send(&self, study_dir: &Path) -> Result<usize> {
        let files = study_files(study_dir)?;
        if files.is_empty() {
            return Ok(0);
        }

        // Unique storage classes across the outgoing files.
        let mut sop_classes = BTreeSet::new();
        for file in &files {
            let readout = codec::read_header(file)?;
            if !readout.meta.media_storage_sop_class_uid.is_empty() {
                sop_classes.insert(readout.meta.media_storage_sop_class_uid);
            }
        }
        let contexts: Vec<PresentationContext> = sop_classes
            .iter()
            .map(|sop| PresentationContext::new(sop, syntax::ADVERTISED))
            .collect();

        let deadline = self.deadline();
        let mut session = tokio::time::timeout(
            deadline,
            self.connector.connect(&self.endpoint, &contexts),
        )
        .await
        .map_err(|_| {
            RouterError::DestinationUnavailable(format!(
                "association with {} timed out",
                self.endpoint.called_ae
            ))
        })??;

        let mut sent = 0usize;
        for file in &files {
            tokio::time::timeout(deadline, session.store_file(file))
                .await
                .map_err(|_| {
                    RouterError::Delivery(format!(
                        "store to {} timed out after {sent} files",
                        self.endpoint.called_ae
                    ))
                })??;
            sent += 1;
        }
        session.release().await?;
        debug!(peer = %self.endpoint.called_ae, files = sent, "Study sent to peer");
        Ok(sent)
    }
}
