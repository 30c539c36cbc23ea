use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::sanitize_component;

/// The filesystem areas one listener owns:
/// `{base}/{AE}/{incoming|processing|completed|failed|logs}`.
///
/// Ownership crosses by move or copy only: `incoming/` belongs to the
/// receiver, `processing/` to a forward worker, the terminal directories
/// to whoever finished the study.
#[derive(Debug, Clone)]
pub struct RouteLayout {
    root: PathBuf,
    ae_title: String,
}

impl RouteLayout {
    pub fn new(base: &Path, ae_title: &str) -> Self {
        Self {
            root: base.join(sanitize_component(ae_title)),
            ae_title: ae_title.to_string(),
        }
    }

    /// Create every area this listener writes into.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.incoming(),
            self.processing(),
            self.completed(),
            self.failed(),
            self.logs(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn ae_title(&self) -> &str {
        &self.ae_title
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn incoming(&self) -> PathBuf {
        self.root.join("incoming")
    }

    pub fn processing(&self) -> PathBuf {
        self.root.join("processing")
    }

    pub fn completed(&self) -> PathBuf {
        self.root.join("completed")
    }

    pub fn failed(&self) -> PathBuf {
        self.root.join("failed")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn study_dir(&self, study_uid: &str) -> PathBuf {
        self.incoming().join(sanitize_component(study_uid))
    }

    pub fn instance_path(&self, study_uid: &str, series_uid: &str, sop_uid: &str) -> PathBuf {
        self.study_dir(study_uid)
            .join(sanitize_component(series_uid))
            .join(format!("{}.dcm", sanitize_component(sop_uid)))
    }
}
