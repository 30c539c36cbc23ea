/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Association failure: {0}")]
    Association(String),

    #[error("Association rejected by peer: {0}")]
    Rejected(String),

    #[error("No acceptable presentation context for {0}")]
    NoPresentationContext(String),

    #[error("Peer returned failure status {status:#06x}: {message}")]
    Status { status: u16, message: String },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Dicom(#[from] studyrelay_dicom::DicomError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
