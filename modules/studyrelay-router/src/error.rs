/// Result type alias for routing operations.
pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// A rejecting validation rule fired; the study moves to failed/.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Delivery failure: {0}")]
    Delivery(String),

    #[error("Bad rule: {0}")]
    BadRule(String),

    #[error(transparent)]
    Deid(#[from] studyrelay_deid::DeidError),

    #[error(transparent)]
    Broker(#[from] studyrelay_broker::BrokerError),

    #[error(transparent)]
    Archive(#[from] studyrelay_archive::ArchiveError),

    #[error(transparent)]
    Dicom(#[from] studyrelay_dicom::DicomError),

    #[error(transparent)]
    Protocol(#[from] studyrelay_protocol::ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RouterError {
    /// Whether a delivery retry can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::DestinationUnavailable(_)
                | RouterError::Delivery(_)
                | RouterError::Protocol(_)
                | RouterError::Deid(studyrelay_deid::DeidError::Verification { .. })
        )
    }
}
