/// Result type alias for DICOM model and codec operations.
pub type Result<T> = std::result::Result<T, DicomError>;

#[derive(Debug, thiserror::Error)]
pub enum DicomError {
    #[error("Not a DICOM part-10 file: {0}")]
    NotDicom(String),

    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: u64, message: String },

    #[error("Unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    #[error("Invalid tag reference: {0}")]
    InvalidTag(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DicomError {
    pub(crate) fn parse(offset: u64, message: impl Into<String>) -> Self {
        DicomError::Parse {
            offset,
            message: message.into(),
        }
    }
}
