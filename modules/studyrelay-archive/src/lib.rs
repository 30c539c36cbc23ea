//! Long-term study archive: original and anonymized snapshots, per-
//! destination delivery status, audit reports, and retention cleanup.

pub mod archive;
pub mod error;

pub use archive::{ArchiveManager, ArchiveMetadata, ArchivedStudy};
pub use error::{ArchiveError, Result};
