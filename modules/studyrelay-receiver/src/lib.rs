//! The store-SCP front end: one listener per route, a durable per-study
//! inbox, a CSV store-audit log, and quiet-period study completion.

pub mod audit_log;
pub mod error;
pub mod inbox;
pub mod layout;
pub mod listener;
pub mod watcher;

pub use error::{ReceiverError, Result};
pub use inbox::InboxWriter;
pub use layout::RouteLayout;
pub use listener::Listener;
pub use watcher::StudyWatcher;

/// Substituted when a received instance lacks a StudyInstanceUID.
pub const UNKNOWN_STUDY: &str = "UNKNOWN_STUDY";
/// Substituted when a received instance lacks a SeriesInstanceUID.
pub const UNKNOWN_SERIES: &str = "UNKNOWN_SERIES";

/// Make an identifier safe as a single path component.
pub(crate) fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
