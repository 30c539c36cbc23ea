/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Crosswalk integrity violation: {0}")]
    Integrity(String),

    #[error("Scheme error: {0}")]
    Scheme(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
