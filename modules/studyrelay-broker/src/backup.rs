//! Crosswalk snapshots.
//!
//! A snapshot is a plain copy of the sqlite file taken after a WAL
//! truncate checkpoint, named `crosswalk_{YYYYMMDD_HHMMSS}.db`. Snapshots
//! are taken at startup, daily at local midnight, on demand, and
//! immediately before any restore. Retention keeps at most `max_backups`
//! and nothing older than `retention_days`, but never deletes the last
//! remaining snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Local, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::crosswalk::CrosswalkStore;
use crate::error::{BrokerError, Result};

pub const DEFAULT_MAX_BACKUPS: usize = 10;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupReason {
    Startup,
    Scheduled,
    Manual,
    PreRestore,
}

impl BackupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupReason::Startup => "startup",
            BackupReason::Scheduled => "scheduled",
            BackupReason::Manual => "manual",
            BackupReason::PreRestore => "pre-restore",
        }
    }
}

/// Metadata for one snapshot.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub mappings: u64,
    pub log_entries: u64,
    pub bytes: u64,
    pub reason: BackupReason,
    pub created: DateTime<Utc>,
}

pub struct BackupManager {
    backup_dir: PathBuf,
    max_backups: usize,
    retention_days: i64,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            max_backups: DEFAULT_MAX_BACKUPS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_limits(mut self, max_backups: usize, retention_days: i64) -> Self {
        self.max_backups = max_backups.max(1);
        self.retention_days = retention_days.max(1);
        self
    }

    /// Take a consistent snapshot: checkpoint, copy, prune.
    pub async fn backup(&self, store: &CrosswalkStore, reason: BackupReason) -> Result<BackupInfo> {
        std::fs::create_dir_all(&self.backup_dir)?;
        store.checkpoint().await?;

        let (mappings, log_entries) = store.total_counts().await?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut name = format!("crosswalk_{stamp}.db");
        // Two snapshots within one second keep distinct names.
        let mut n = 2;
        while self.backup_dir.join(&name).exists() {
            name = format!("crosswalk_{stamp}_{n}.db");
            n += 1;
        }
        let dest = self.backup_dir.join(&name);
        std::fs::copy(store.path(), &dest)?;
        let bytes = std::fs::metadata(&dest)?.len();

        info!(
            snapshot = %name,
            reason = reason.as_str(),
            mappings,
            log_entries,
            bytes,
            "Crosswalk snapshot taken"
        );
        self.prune()?;

        Ok(BackupInfo {
            path: dest,
            mappings,
            log_entries,
            bytes,
            reason,
            created: Utc::now(),
        })
    }

    /// Snapshots on disk, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots: Vec<PathBuf> = std::fs::read_dir(&self.backup_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("crosswalk_") && n.ends_with(".db"))
            })
            .collect();
        snapshots.sort();
        Ok(snapshots)
    }

    /// Apply both retention policies, always keeping at least one
    /// snapshot.
    fn prune(&self) -> Result<()> {
        let snapshots = self.list()?;
        if snapshots.len() <= 1 {
            return Ok(());
        }

        let cutoff = Local::now() - Duration::days(self.retention_days);
        let cutoff_name = format!("crosswalk_{}.db", cutoff.format("%Y%m%d_%H%M%S"));

        let mut keep = snapshots.clone();
        // Oldest-first: drop over-count from the front.
        while keep.len() > self.max_backups {
            keep.remove(0);
        }
        // Lexicographic order matches chronological order for this naming
        // pattern, so age comparison is a name comparison.
        keep.retain(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n >= cutoff_name.as_str())
        });
        if keep.is_empty() {
            if let Some(newest) = snapshots.last() {
                keep.push(newest.clone());
            }
        }

        for snapshot in &snapshots {
            if !keep.contains(snapshot) {
                if let Err(e) = std::fs::remove_file(snapshot) {
                    warn!(snapshot = %snapshot.display(), error = %e, "Failed to prune snapshot");
                }
            }
        }
        Ok(())
    }

    /// Replace the live store with a snapshot. Takes a pre-restore
    /// snapshot, closes the handle, swaps the file atomically, and
    /// reopens. The returned store supersedes every clone of the old one.
    pub async fn restore(
        &self,
        store: CrosswalkStore,
        snapshot: &Path,
    ) -> Result<CrosswalkStore> {
        if !snapshot.exists() {
            return Err(BrokerError::Backup(format!(
                "snapshot {} does not exist",
                snapshot.display()
            )));
        }
        self.backup(&store, BackupReason::PreRestore).await?;

        let live = store.path().to_path_buf();
        store.checkpoint().await?;
        store.close().await;

        // Stage the snapshot next to the live file, then rename over it.
        let staged = live.with_extension("db.restore");
        std::fs::copy(snapshot, &staged)?;
        std::fs::rename(&staged, &live)?;
        for sidecar in ["-wal", "-shm"] {
            let mut name = live.as_os_str().to_os_string();
            name.push(sidecar);
            let _ = std::fs::remove_file(PathBuf::from(name));
        }

        info!(snapshot = %snapshot.display(), "Crosswalk restored from snapshot");
        CrosswalkStore::open(&live).await
    }
}

/// Startup snapshot plus a daily run at local midnight, until shutdown.
pub fn spawn_schedule(
    manager: Arc<BackupManager>,
    store: CrosswalkStore,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = manager.backup(&store, BackupReason::Startup).await {
            error!(error = %e, "Startup crosswalk snapshot failed");
        }
        loop {
            let wait = match until_next_local_midnight() {
                Some(d) => d,
                None => std::time::Duration::from_secs(24 * 60 * 60),
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = manager.backup(&store, BackupReason::Scheduled).await {
                        error!(error = %e, "Scheduled crosswalk snapshot failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A closed channel means the gateway is gone.
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

fn until_next_local_midnight() -> Option<std::time::Duration> {
    let now = Local::now();
    let tomorrow = now.date_naive().succ_opt()?;
    let midnight = tomorrow.and_hms_opt(0, 0, 0)?;
    let next = midnight.and_local_timezone(Local).single()?;
    (next - now).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyrelay_common::IdType;
    use tempfile::TempDir;

    async fn seeded_store(dir: &TempDir) -> CrosswalkStore {
        let store = CrosswalkStore::open(&dir.path().join("crosswalk.db"))
            .await
            .unwrap();
        store
            .store("b1", "P1", "SUBJ-00001", IdType::PatientId)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn backup_copies_a_complete_store() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let manager = BackupManager::new(dir.path().join("backups"));

        let info = manager.backup(&store, BackupReason::Manual).await.unwrap();
        assert_eq!(info.mappings, 1);
        assert!(info.bytes > 0);
        assert!(info.path.exists());

        // The snapshot opens on its own and contains the mapping.
        let restored = CrosswalkStore::open(&info.path).await.unwrap();
        assert_eq!(
            restored.lookup("b1", "P1", IdType::PatientId).await.unwrap(),
            Some("SUBJ-00001".to_string())
        );
    }

    #[tokio::test]
    async fn prune_keeps_at_most_max_backups() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let backups = dir.path().join("backups");
        let manager = BackupManager::new(&backups).with_limits(2, 30);

        // Fabricate distinct recent snapshot names so retention keeps them
        // all and only the count limit applies.
        std::fs::create_dir_all(&backups).unwrap();
        for days_ago in [3, 2, 1] {
            let stamp = (Local::now() - Duration::days(days_ago)).format("%Y%m%d_%H%M%S");
            std::fs::copy(store.path(), backups.join(format!("crosswalk_{stamp}.db"))).unwrap();
        }
        manager.backup(&store, BackupReason::Manual).await.unwrap();

        let remaining = manager.list().unwrap();
        assert_eq!(remaining.len(), 2, "{remaining:?}");
    }

    #[tokio::test]
    async fn prune_always_keeps_one() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let backups = dir.path().join("backups");
        // Everything is older than a 1-day retention window.
        let manager = BackupManager::new(&backups).with_limits(5, 1);
        std::fs::create_dir_all(&backups).unwrap();
        for stamp in ["20200101_000000", "20200102_000000"] {
            std::fs::copy(store.path(), backups.join(format!("crosswalk_{stamp}.db"))).unwrap();
        }
        manager.prune().unwrap();
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restore_round_trips_and_takes_pre_restore_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let manager = BackupManager::new(dir.path().join("backups"));

        let snapshot = manager.backup(&store, BackupReason::Manual).await.unwrap();

        // Diverge the live store after the snapshot.
        store
            .store("b1", "P2", "SUBJ-00002", IdType::PatientId)
            .await
            .unwrap();

        let restored = manager.restore(store, &snapshot.path).await.unwrap();
        assert_eq!(
            restored.lookup("b1", "P1", IdType::PatientId).await.unwrap(),
            Some("SUBJ-00001".to_string())
        );
        assert_eq!(
            restored.lookup("b1", "P2", IdType::PatientId).await.unwrap(),
            None
        );
        // Pre-restore snapshot exists alongside the manual one.
        assert!(manager.list().unwrap().len() >= 2);
    }
}
