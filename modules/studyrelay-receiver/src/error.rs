/// Result type alias for receiver operations.
pub type Result<T> = std::result::Result<T, ReceiverError>;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Watcher error: {0}")]
    Watch(String),

    #[error(transparent)]
    Protocol(#[from] studyrelay_protocol::ProtocolError),

    #[error(transparent)]
    Dicom(#[from] studyrelay_dicom::DicomError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
