// Filesystem watcher over the sync export directory (C12): coalesces
// change events with a debounce window and re-runs the importer.

use crate::db::DatabasePool;
use crate::error::{KotaError, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

pub struct SyncWatcher {
    dir: PathBuf,
    started: Arc<AtomicBool>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl SyncWatcher {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            started: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            _watcher: None,
        }
    }

    /// Begin watching. Asserts the directory exists; a second call is a
    /// no-op with a warning (§4.10).
    pub async fn start(&mut self, pool: DatabasePool) -> Result<()> {
        if !self.dir.exists() {
            return Err(KotaError::NotFound(format!("sync directory does not exist: {}", self.dir.display())));
        }

        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("sync watcher already started, ignoring duplicate start()");
            return Ok(());
        }

        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<notify::Event>>(256);
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.blocking_send(res);
        })
        .map_err(|e| KotaError::Internal(format!("failed to create file watcher: {e}")))?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| KotaError::Internal(format!("failed to watch {}: {e}", self.dir.display())))?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self._watcher = Some(watcher);

        let dir = self.dir.clone();
        tokio::spawn(async move {
            let mut pending = false;
            let mut debounce = tokio::time::interval(DEFAULT_DEBOUNCE);
            debounce.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("sync watcher received shutdown signal");
                        break;
                    }
                    Some(event) = raw_rx.recv() => {
                        if relevant_event(&event) {
                            pending = true;
                        }
                    }
                    _ = debounce.tick() => {
                        if pending {
                            pending = false;
                            match crate::sync::import_all(&pool, &dir).await {
                                Ok(report) if report.errors.is_empty() && report.security_issues.is_empty() => {
                                    tracing::info!(deleted = report.deleted_count, "sync watcher applied import");
                                }
                                Ok(report) => {
                                    tracing::warn!(?report.errors, ?report.security_issues, "sync watcher import had issues");
                                }
                                Err(e) => tracing::warn!("sync watcher import failed: {e}"),
                            }
                        }
                    }
                }
            }
            tracing::info!("sync watcher stopped");
        });

        Ok(())
    }

    /// Idempotent stop.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.started.store(false, Ordering::SeqCst);
    }
}

fn relevant_event(event: &notify::Result<notify::Event>) -> bool {
    let Ok(event) = event else { return false };
    event.paths.iter().any(|p| is_relevant_path(p))
}

fn is_relevant_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".jsonl") && name != ".deletions.jsonl"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_deletions_log_and_non_jsonl() {
        assert!(!is_relevant_path(Path::new("/tmp/.deletions.jsonl")));
        assert!(!is_relevant_path(Path::new("/tmp/notes.txt")));
        assert!(is_relevant_path(Path::new("/tmp/repositories.jsonl")));
    }
}
