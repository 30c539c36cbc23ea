use crate::verify::VerificationReport;

/// Result type alias for de-identification operations.
pub type Result<T> = std::result::Result<T, DeidError>;

#[derive(Debug, thiserror::Error)]
pub enum DeidError {
    /// The script is rejected before any file is touched.
    #[error("Script syntax error on line {line}: {message}")]
    ScriptSyntax { line: usize, message: String },

    #[error("Invalid date value: {0}")]
    InvalidDateValue(String),

    /// The anonymized output failed one or more verification checks and
    /// was not written.
    #[error("Verification failed for {}: {}", report.sop_uid, report.summary())]
    Verification { report: Box<VerificationReport> },

    #[error("Script library error: {0}")]
    Library(String),

    #[error(transparent)]
    Dicom(#[from] studyrelay_dicom::DicomError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeidError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        DeidError::ScriptSyntax {
            line,
            message: message.into(),
        }
    }
}
