//! Per-day CSV log of stored instances.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use crate::error::Result;

const HEADER: &str = "timestamp,calling_ae,patient_id,study_uid,series_uid,sop_uid,modality,bytes";

/// One row per stored instance.
#[derive(Debug, Clone)]
pub struct StoreAuditRecord {
    pub calling_ae: String,
    pub patient_id: String,
    pub study_uid: String,
    pub series_uid: String,
    pub sop_uid: String,
    pub modality: String,
    pub bytes: u64,
}

/// Appends to `logs/store_{YYYYMMDD}.csv`, starting a new file (with
/// header) at each day boundary.
pub struct StoreAuditLog {
    dir: PathBuf,
    file: Mutex<()>,
}

impl StoreAuditLog {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            file: Mutex::new(()),
        }
    }

    /// Append one line. Failures are logged, not propagated: a broken
    /// audit line must not fail the instance response.
    pub fn append(&self, record: &StoreAuditRecord) {
        if let Err(e) = self.try_append(record) {
            warn!(error = %e, sop = %record.sop_uid, "Failed to write store audit line");
        }
    }

    fn try_append(&self, record: &StoreAuditRecord) -> Result<()> {
        let _guard = self.file.lock().map_err(|_| {
            crate::error::ReceiverError::Storage("store audit lock poisoned".to_string())
        })?;
        std::fs::create_dir_all(&self.dir)?;
        let now = Utc::now();
        let path = self.dir.join(format!("store_{}.csv", now.format("%Y%m%d")));
        let new_file = !path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        if new_file {
            writeln!(file, "{HEADER}")?;
        }
        writeln!(
            file,
            "{},{},{},{},{},{},{},{}",
            now.to_rfc3339(),
            csv_field(&record.calling_ae),
            csv_field(&record.patient_id),
            csv_field(&record.study_uid),
            csv_field(&record.series_uid),
            csv_field(&record.sop_uid),
            csv_field(&record.modality),
            record.bytes
        )?;
        Ok(())
    }
}

/// Quote fields that would break the row.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_with_header_once() {
        let dir = TempDir::new().unwrap();
        let log = StoreAuditLog::new(dir.path().to_path_buf());
        let record = StoreAuditRecord {
            calling_ae: "MODALITY".into(),
            patient_id: "P1".into(),
            study_uid: "1.2.3".into(),
            series_uid: "1.2.3.1".into(),
            sop_uid: "1.2.3.1.1".into(),
            modality: "CT".into(),
            bytes: 1024,
        };
        log.append(&record);
        log.append(&record);

        let path = dir
            .path()
            .join(format!("store_{}.csv", Utc::now().format("%Y%m%d")));
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].contains("MODALITY"));
        assert!(lines[1].ends_with(",1024"));
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        assert_eq!(csv_field("DOE,JANE"), "\"DOE,JANE\"");
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("sa\"y"), "\"sa\"\"y\"");
    }
}
