//! De-identification: the anonymization-script runtime, the executor with
//! its pre-write verification gate and large-file streaming path, the
//! named script library, and the original-vs-anonymized audit diff.

pub mod audit;
pub mod error;
pub mod executor;
pub mod library;
pub mod script;
pub mod verify;

pub use error::{DeidError, Result};
pub use executor::{DeidOutcome, Executor, ExecutorOptions, STREAMING_THRESHOLD};
pub use script::{AnonymizationScript, SaltedUidHasher, ScriptOp, UidHasher};
pub use verify::{VerificationReport, VerifyOptions};
