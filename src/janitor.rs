//! # Background Janitor
//!
//! Periodic maintenance task that keeps the service healthy without any
//! request traffic: promoting stuck jobs to timeout, sweeping expired job
//! records and orphaned artifacts, and pruning idle rate-limiter windows.
//!
//! The task runs on a tokio interval and stops promptly when signalled
//! through a watch channel, so shutdown never waits out a sleep.

use crate::state::AppState;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a cancellable background task.
pub struct TaskHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Signal the task and wait for it to finish its current pass.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Background task did not stop cleanly: {}", e);
        }
    }
}

/// Spawn the maintenance loop. The first sweep happens one full interval
/// after startup.
pub fn spawn_janitor(state: AppState, interval: Duration) -> TaskHandle {
    let (shutdown, mut rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Consume the immediate first tick so sweeps are evenly spaced
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep(&state),
                _ = rx.changed() => {
                    tracing::info!("Janitor shutting down");
                    break;
                }
            }
        }
    });
    TaskHandle { shutdown, handle }
}

fn sweep(state: &AppState) {
    tracing::debug!("Janitor sweep starting");

    // Promote jobs that blew their deadline while nobody was looking
    match state.registry.stale_active_ids() {
        Ok(ids) => {
            for id in ids {
                if let Err(e) = state.registry.reconcile_timeout(&id) {
                    tracing::warn!(job_id = %id, "Failed to reconcile stale job: {}", e);
                }
            }
        }
        Err(e) => tracing::warn!("Failed to scan for stale jobs: {}", e),
    }

    let retention = state.config.retention();
    match state.registry.cleanup_older_than(retention) {
        Ok(removed) if removed > 0 => {
            tracing::info!(removed, "Expired job records removed");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Job record cleanup failed: {}", e),
    }

    let swept = state.artifacts.reclaim_aged(retention);
    if swept > 0 {
        tracing::info!(swept, "Aged artifacts reclaimed");
    }

    let purged = state.limiter.purge_idle();
    if purged > 0 {
        tracing::debug!(purged, "Idle rate-limit windows purged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::jobs::{FileInfo, JobOptions, JobRecord};

    fn test_state(root: &std::path::Path) -> AppState {
        let mut config = AppConfig::default();
        config.storage.upload_dir = root.join("uploads");
        config.storage.temp_dir = root.join("temp");
        config.storage.output_dir = root.join("outputs");
        config.storage.jobs_dir = root.join("jobs");
        config.jobs.timeout_secs = 1;
        AppState::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_janitor_stops_on_signal() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let handle = spawn_janitor(state, Duration::from_secs(3600));
        // Returns promptly even though the interval is an hour
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_promotes_stale_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let mut record = JobRecord::new(
            "stale".to_string(),
            "en-US".to_string(),
            FileInfo {
                name: "a.wav".to_string(),
                size: 1,
            },
            JobOptions::default(),
        );
        record.created_at = record.created_at - chrono::Duration::seconds(5);
        record.updated_at = record.created_at;
        state.registry.create(record).unwrap();

        sweep(&state);

        let seen = state.registry.get("stale").unwrap().unwrap();
        assert_eq!(seen.status, crate::jobs::JobStatus::Timeout);
    }
}
