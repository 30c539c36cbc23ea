//! Quiet-period study completion.
//!
//! A filesystem watcher over the listener's inbox keeps a per-study
//! last-activity clock; a 5-second sweeper declares any study complete
//! once it has been quiet for the route's quiet period, walks it for
//! counts, and emits a StudyReady event. A completed study is only
//! reconsidered after an explicit reset.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use studyrelay_common::StudyReady;

use crate::error::{ReceiverError, Result};
use crate::layout::RouteLayout;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct WatchState {
    last_activity: Mutex<HashMap<String, Instant>>,
    completed: Mutex<HashSet<String>>,
}

/// Owns the notify watcher and the sweeper task for one listener.
pub struct StudyWatcher {
    layout: RouteLayout,
    quiet_period: Duration,
    state: Arc<WatchState>,
    calling_by_study: Arc<Mutex<HashMap<String, String>>>,
    /// Kept for RAII; events flow through the shared state.
    _watcher: RecommendedWatcher,
}

impl StudyWatcher {
    /// Register the watcher and seed activity from studies already on
    /// disk (their newest mtime counts as their last activity).
    pub fn new(
        layout: RouteLayout,
        quiet_period: Duration,
        calling_by_study: Arc<Mutex<HashMap<String, String>>>,
    ) -> Result<Self> {
        let state = Arc::new(WatchState {
            last_activity: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
        });

        let incoming = layout.incoming();
        std::fs::create_dir_all(&incoming)?;

        let event_state = state.clone();
        let event_root = incoming.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    for path in &event.paths {
                        if let Some(study) = study_for_path(&event_root, path) {
                            if let Ok(mut map) = event_state.last_activity.lock() {
                                map.insert(study, Instant::now());
                            }
                        }
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| ReceiverError::Watch(e.to_string()))?;
        watcher
            .watch(&incoming, RecursiveMode::Recursive)
            .map_err(|e| ReceiverError::Watch(e.to_string()))?;

        let this = Self {
            layout,
            quiet_period,
            state,
            calling_by_study,
            _watcher: watcher,
        };
        this.rescan()?;
        Ok(this)
    }

    /// Seed last-activity for studies that existed before this process
    /// started, so they complete once their quiet period elapses.
    fn rescan(&self) -> Result<()> {
        let incoming = self.layout.incoming();
        let now = Instant::now();
        let wall_now = std::time::SystemTime::now();
        let mut seeded = 0usize;

        for entry in std::fs::read_dir(&incoming)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let study = entry.file_name().to_string_lossy().into_owned();
            let newest = newest_mtime(&entry.path())?.unwrap_or(wall_now);
            // Map wall-clock age onto the monotonic clock.
            let age = wall_now
                .duration_since(newest)
                .unwrap_or(Duration::ZERO);
            let instant = now.checked_sub(age).unwrap_or(now);
            if let Ok(mut map) = self.state.last_activity.lock() {
                map.insert(study, instant);
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!(
                listener = self.layout.ae_title(),
                studies = seeded,
                "Re-seeded study activity from existing inbox"
            );
        }
        Ok(())
    }

    /// Allow a completed study to fire again after new files appear.
    pub fn reset_study(&self, study_uid: &str) {
        if let Ok(mut completed) = self.state.completed.lock() {
            completed.remove(study_uid);
        }
        if let Ok(mut map) = self.state.last_activity.lock() {
            map.insert(study_uid.to_string(), Instant::now());
        }
        info!(
            listener = self.layout.ae_title(),
            study = study_uid,
            "Study reset for re-completion"
        );
    }

    /// Run the 5-second sweeper until shutdown, emitting StudyReady into
    /// `events`.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        events: mpsc::UnboundedSender<StudyReady>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => self.sweep(&events),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    fn sweep(&self, events: &mpsc::UnboundedSender<StudyReady>) {
        let due: Vec<String> = {
            let Ok(map) = self.state.last_activity.lock() else {
                return;
            };
            let Ok(completed) = self.state.completed.lock() else {
                return;
            };
            map.iter()
                .filter(|(study, last)| {
                    last.elapsed() >= self.quiet_period && !completed.contains(*study)
                })
                .map(|(study, _)| study.clone())
                .collect()
        };

        for study in due {
            let dir = self.layout.incoming().join(&study);
            if !dir.is_dir() {
                // Claimed or cleaned up while waiting; forget it.
                if let Ok(mut map) = self.state.last_activity.lock() {
                    map.remove(&study);
                }
                continue;
            }
            let (file_count, total_bytes) = match walk_counts(&dir) {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(study = %study, error = %e, "Failed to size completed study");
                    continue;
                }
            };
            if let Ok(mut completed) = self.state.completed.lock() {
                completed.insert(study.clone());
            }
            let calling_ae = self
                .calling_by_study
                .lock()
                .ok()
                .and_then(|m| m.get(&study).cloned());

            let ready = StudyReady {
                listener_ae: self.layout.ae_title().to_string(),
                study_uid: study.clone(),
                path: dir,
                file_count,
                total_bytes,
                calling_ae,
                completed_at: Utc::now(),
            };
            info!(
                listener = self.layout.ae_title(),
                study = %study,
                files = file_count,
                bytes = total_bytes,
                "Study complete"
            );
            if events.send(ready).is_err() {
                // Forwarder has shut down; stop emitting.
                return;
            }
        }
    }
}

/// The study component of an event path, when the path is inside a study
/// directory (not the inbox root itself).
fn study_for_path(incoming: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(incoming).ok()?;
    let first = rel.components().next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}

fn newest_mtime(dir: &Path) -> Result<Option<std::time::SystemTime>> {
    let mut newest = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let candidate = if path.is_dir() {
            newest_mtime(&path)?
        } else {
            entry.metadata().ok().and_then(|m| m.modified().ok())
        };
        if let Some(t) = candidate {
            if newest.is_none_or(|n| t > n) {
                newest = Some(t);
            }
        }
    }
    Ok(newest)
}

fn walk_counts(dir: &Path) -> std::io::Result<(usize, u64)> {
    let mut files = 0usize;
    let mut bytes = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let (f, b) = walk_counts(&path)?;
            files += f;
            bytes += b;
        } else {
            files += 1;
            bytes += entry.metadata()?.len();
        }
    }
    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    async fn wait_for_ready(
        rx: &mut mpsc::UnboundedReceiver<StudyReady>,
        timeout: Duration,
    ) -> Option<StudyReady> {
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quiet_study_completes_once() {
        let dir = TempDir::new().unwrap();
        let layout = RouteLayout::new(dir.path(), "R1");
        layout.ensure().unwrap();

        let calling = Arc::new(Mutex::new(HashMap::from([(
            "1.2.3".to_string(),
            "MODALITY".to_string(),
        )])));
        let watcher = Arc::new(
            StudyWatcher::new(layout.clone(), Duration::from_millis(300), calling).unwrap(),
        );

        touch(&layout.incoming().join("1.2.3/1.2.3.1/a.dcm"), b"aaaa");
        touch(&layout.incoming().join("1.2.3/1.2.3.1/b.dcm"), b"bbbbbb");
        // Make sure the events (or the rescan) registered the study.
        watcher.reset_study("1.2.3");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watcher.clone().spawn_sweeper(tx, shutdown_rx);

        let ready = wait_for_ready(&mut rx, Duration::from_secs(15)).await.unwrap();
        assert_eq!(ready.study_uid, "1.2.3");
        assert_eq!(ready.listener_ae, "R1");
        assert_eq!(ready.file_count, 2);
        assert_eq!(ready.total_bytes, 10);
        assert_eq!(ready.calling_ae.as_deref(), Some("MODALITY"));

        // No second event without a reset.
        assert!(wait_for_ready(&mut rx, Duration::from_secs(6)).await.is_none());
        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_allows_recompletion() {
        let dir = TempDir::new().unwrap();
        let layout = RouteLayout::new(dir.path(), "R1");
        layout.ensure().unwrap();
        let calling = Arc::new(Mutex::new(HashMap::new()));
        let watcher = Arc::new(
            StudyWatcher::new(layout.clone(), Duration::from_millis(200), calling).unwrap(),
        );

        touch(&layout.incoming().join("1.2.9/s/a.dcm"), b"data");
        watcher.reset_study("1.2.9");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watcher.clone().spawn_sweeper(tx, shutdown_rx);

        let first = wait_for_ready(&mut rx, Duration::from_secs(15)).await.unwrap();
        assert_eq!(first.study_uid, "1.2.9");

        touch(&layout.incoming().join("1.2.9/s/late.dcm"), b"late");
        watcher.reset_study("1.2.9");
        let second = wait_for_ready(&mut rx, Duration::from_secs(15)).await.unwrap();
        assert_eq!(second.file_count, 2);
        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn startup_rescan_seeds_existing_studies() {
        let dir = TempDir::new().unwrap();
        let layout = RouteLayout::new(dir.path(), "R1");
        layout.ensure().unwrap();

        // Study written before the watcher exists.
        touch(&layout.incoming().join("9.8.7/s/a.dcm"), b"old");

        let calling = Arc::new(Mutex::new(HashMap::new()));
        let watcher = Arc::new(
            StudyWatcher::new(layout.clone(), Duration::from_millis(100), calling).unwrap(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watcher.clone().spawn_sweeper(tx, shutdown_rx);

        let ready = wait_for_ready(&mut rx, Duration::from_secs(15)).await.unwrap();
        assert_eq!(ready.study_uid, "9.8.7");
        assert!(ready.calling_ae.is_none());
        handle.abort();
    }
}
