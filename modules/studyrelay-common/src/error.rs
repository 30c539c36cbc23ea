use thiserror::Error;

/// Gateway-wide error taxonomy. Each variant maps to a disposition:
/// retryable errors stay inside the forward orchestrator, non-retryable
/// ones surface on the transfer record as a terminal failure.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Protocol failure: {0}")]
    Protocol(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Script syntax error: {0}")]
    ScriptSyntax(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    #[error("Broker failure: {0}")]
    BrokerFailure(String),

    #[error("Crosswalk integrity violation: {0}")]
    CrosswalkIntegrity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether the forward orchestrator may retry the operation that
    /// produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::DestinationUnavailable(_)
                | GatewayError::DeliveryFailure(_)
                | GatewayError::VerificationFailed(_)
        )
    }
}
