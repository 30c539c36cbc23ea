//! The three destination client flavors behind one capability surface:
//! probe, kind-specific send, close. Dispatch is by variant.

pub mod archive_api;
pub mod filesystem;
pub mod peer;

use std::path::Path;
use std::time::Duration;

use studyrelay_common::RouteDestination;
use studyrelay_dicom::AttributeSet;

use crate::error::Result;

pub use archive_api::ArchiveApiClient;
pub use filesystem::FilesystemClient;
pub use peer::PeerClient;

/// What one successful send produced.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub files_transferred: usize,
    pub duration: Duration,
}

pub enum DestinationClient {
    Peer(PeerClient),
    Archive(ArchiveApiClient),
    Filesystem(FilesystemClient),
}

impl DestinationClient {
    pub fn kind(&self) -> &'static str {
        match self {
            DestinationClient::Peer(_) => "peer_node",
            DestinationClient::Archive(_) => "archive_api",
            DestinationClient::Filesystem(_) => "filesystem",
        }
    }

    /// Cheap health probe.
    pub async fn probe(&self) -> Result<()> {
        match self {
            DestinationClient::Peer(c) => c.probe().await,
            DestinationClient::Archive(c) => c.probe().await,
            DestinationClient::Filesystem(c) => c.probe().await,
        }
    }

    /// Deliver one prepared study directory.
    pub async fn send(
        &self,
        study_dir: &Path,
        edge: &RouteDestination,
        attrs: &AttributeSet,
        listener_ae: &str,
    ) -> Result<SendOutcome> {
        let started = std::time::Instant::now();
        let files_transferred = match self {
            DestinationClient::Peer(c) => c.send(study_dir).await?,
            DestinationClient::Archive(c) => c.send(study_dir, edge, attrs).await?,
            DestinationClient::Filesystem(c) => c.send(study_dir, attrs, listener_ae).await?,
        };
        Ok(SendOutcome {
            files_transferred,
            duration: started.elapsed(),
        })
    }

    pub async fn close(&self) {
        // Peer associations are per-send and the HTTP pool drops with the
        // client; nothing holds an open handle between studies.
    }
}

/// Recursively list the files of a prepared study directory, sorted for
/// stable transfer order.
pub(crate) fn study_files(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    fn walk(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                walk(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }
    let mut files = Vec::new();
    walk(dir, &mut files)?;
    files.sort();
    Ok(files)
}
