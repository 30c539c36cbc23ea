/// Result type alias for research-archive API calls.
pub type Result<T> = std::result::Result<T, XnatError>;

#[derive(Debug, thiserror::Error)]
pub enum XnatError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Packaging error: {0}")]
    Zip(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
