//! # Job Registry
//!
//! The single authority for job lifecycle state. All mutations go through
//! this type so that status transitions stay monotonic even when the HTTP
//! layer, the worker, and the janitor race each other.
//!
//! ## Key responsibilities:
//! - **Transitions:** enforce the pending → processing → terminal state
//!   machine and stamp `completed_at` / `total_processing_time` exactly once
//! - **Lazy timeout:** any read of a stale active job promotes it to
//!   `Timeout` before the caller sees it
//! - **Admission:** count live active jobs so the pipeline can decide
//!   whether to spawn another worker

use crate::error::{AppError, AppResult};
use crate::jobs::record::{JobRecord, JobStatus, JobUpdate};
use crate::jobs::store::JobStore;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One page of job listings, newest first.
#[derive(Debug, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub pages: usize,
}

/// Aggregate counters over every stored job.
#[derive(Debug, Serialize)]
pub struct JobStats {
    pub total_jobs: usize,
    pub by_status: HashMap<String, usize>,
    pub last_24h: usize,
    pub average_processing_time: Option<f64>,
    pub total_processing_time: f64,
}

/// Lifecycle authority over the job store.
pub struct JobRegistry {
    store: Arc<dyn JobStore>,
    job_timeout: Duration,
    // Serializes read-modify-write sequences against the store
    lock: Mutex<()>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>, job_timeout: Duration) -> Self {
        Self {
            store,
            job_timeout,
            lock: Mutex::new(()),
        }
    }

    /// Create a new pending record. Fails if the id already exists.
    pub fn create(&self, record: JobRecord) -> AppResult<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        if self.store.read(&record.id)?.is_some() {
            return Err(AppError::Internal(format!(
                "Job {} already exists",
                record.id
            )));
        }
        self.store.write(&record)
    }

    /// Fetch a record, promoting it to `Timeout` first when it has been
    /// active longer than the configured deadline.
    pub fn get(&self, id: &str) -> AppResult<Option<JobRecord>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        match self.store.read(id)? {
            Some(record) => Ok(Some(self.promote_if_stale(record)?.0)),
            None => Ok(None),
        }
    }

    /// Promote a stale active job to `Timeout`; used directly by the
    /// janitor sweep. Returns whether a promotion happened.
    pub fn reconcile_timeout(&self, id: &str) -> AppResult<bool> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let Some(record) = self.store.read(id)? else {
            return Ok(false);
        };
        let (_, promoted) = self.promote_if_stale(record)?;
        Ok(promoted)
    }

    fn promote_if_stale(&self, mut record: JobRecord) -> AppResult<(JobRecord, bool)> {
        let now = Utc::now();
        let timeout_ms = self.job_timeout.as_millis() as i64;
        if !record.status.is_active() || record.age_ms(now) <= timeout_ms {
            return Ok((record, false));
        }

        tracing::warn!(
            job_id = %record.id,
            age_ms = record.age_ms(now),
            "Job exceeded processing deadline, marking as timed out"
        );
        record.status = JobStatus::Timeout;
        record.error = Some(format!(
            "Job exceeded maximum processing time of {} seconds",
            self.job_timeout.as_secs()
        ));
        record.updated_at = now;
        record.completed_at = Some(now);
        record.total_processing_time =
            Some((now - record.created_at).num_milliseconds() as f64 / 1000.0);
        self.store.write(&record)?;
        Ok((record, true))
    }

    fn require(&self, id: &str) -> AppResult<JobRecord> {
        self.store
            .read(id)?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    /// Move a job to a new non-terminal status (e.g. pending → processing).
    pub fn update_status(&self, id: &str, next: JobStatus) -> AppResult<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut record = self.require(id)?;
        if !record.status.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "Invalid job transition {} -> {} for {}",
                record.status, next, id
            )));
        }
        record.status = next;
        record.updated_at = Utc::now();
        self.store.write(&record)
    }

    /// Apply the worker's result. A terminal incoming status stamps the
    /// completion fields; writes against an already-terminal record are
    /// rejected so a cancelled job stays cancelled.
    pub fn update_result(&self, id: &str, update: JobUpdate) -> AppResult<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut record = self.require(id)?;
        if record.status.is_terminal() {
            return Err(AppError::Internal(format!(
                "Job {} is already {} and cannot be updated",
                id, record.status
            )));
        }

        let now = Utc::now();
        if let Some(next) = update.status {
            if !record.status.can_transition_to(next) {
                return Err(AppError::Internal(format!(
                    "Invalid job transition {} -> {} for {}",
                    record.status, next, id
                )));
            }
            record.status = next;
            if next.is_terminal() {
                record.completed_at = Some(now);
                record.total_processing_time =
                    Some((now - record.created_at).num_milliseconds() as f64 / 1000.0);
            }
        }
        if update.transcription.is_some() {
            record.transcription = update.transcription;
        }
        if update.audio_info.is_some() {
            record.audio_info = update.audio_info;
        }
        if update.processing_info.is_some() {
            record.processing_info = update.processing_info;
        }
        if update.error.is_some() {
            record.error = update.error;
        }
        record.updated_at = now;
        self.store.write(&record)
    }

    /// Cancel an active job. Terminal jobs cannot be cancelled.
    pub fn cancel(&self, id: &str) -> AppResult<JobRecord> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut record = self.require(id)?;
        if !record.status.is_active() {
            return Err(AppError::Validation(format!(
                "Job {} is {} and cannot be cancelled",
                id, record.status
            )));
        }
        let now = Utc::now();
        record.status = JobStatus::Cancelled;
        record.updated_at = now;
        record.completed_at = Some(now);
        record.total_processing_time =
            Some((now - record.created_at).num_milliseconds() as f64 / 1000.0);
        self.store.write(&record)?;
        Ok(record)
    }

    /// List jobs newest first, optionally filtered by status.
    pub fn list(
        &self,
        page: usize,
        per_page: usize,
        status: Option<JobStatus>,
    ) -> AppResult<JobPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut jobs = self.store.list_all()?;
        if let Some(wanted) = status {
            jobs.retain(|j| j.status == wanted);
        }
        // Stable ordering even for records created in the same millisecond
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = jobs.len();
        let pages = total.div_ceil(per_page).max(1);
        let start = (page - 1) * per_page;
        let jobs = if start >= total {
            Vec::new()
        } else {
            jobs.into_iter().skip(start).take(per_page).collect()
        };

        Ok(JobPage {
            jobs,
            pagination: Pagination {
                page,
                per_page,
                total,
                pages,
            },
        })
    }

    /// Aggregate counters across every stored job.
    pub fn stats(&self) -> AppResult<JobStats> {
        let jobs = self.store.list_all()?;
        let now = Utc::now();

        let mut by_status: HashMap<String, usize> = JobStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut last_24h = 0;
        let mut total_time = 0.0;
        let mut timed = 0usize;

        for job in &jobs {
            *by_status.entry(job.status.as_str().to_string()).or_insert(0) += 1;
            if now - job.created_at <= ChronoDuration::hours(24) {
                last_24h += 1;
            }
            if let Some(t) = job.total_processing_time {
                total_time += t;
                timed += 1;
            }
        }

        Ok(JobStats {
            total_jobs: jobs.len(),
            by_status,
            last_24h,
            average_processing_time: if timed > 0 {
                Some(total_time / timed as f64)
            } else {
                None
            },
            total_processing_time: total_time,
        })
    }

    /// Delete terminal jobs whose completion is older than `age`.
    pub fn cleanup_older_than(&self, age: Duration) -> AppResult<usize> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let cutoff = Utc::now()
            - ChronoDuration::from_std(age)
                .map_err(|e| AppError::Internal(format!("Invalid cleanup age: {}", e)))?;

        let mut removed = 0;
        for job in self.store.list_all()? {
            if !job.status.is_terminal() {
                continue;
            }
            let finished = job.completed_at.unwrap_or(job.updated_at);
            if finished < cutoff && self.store.delete(&job.id)? {
                tracing::debug!(job_id = %job.id, "Removed expired job record");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of jobs currently pending or processing, excluding ones that
    /// have already blown their deadline. Read-only: promotion happens on
    /// `get` or in the janitor sweep.
    pub fn active_count(&self) -> AppResult<usize> {
        let now = Utc::now();
        let timeout_ms = self.job_timeout.as_millis() as i64;
        Ok(self
            .store
            .list_all()?
            .iter()
            .filter(|j| j.status.is_active() && j.age_ms(now) <= timeout_ms)
            .count())
    }

    /// IDs of active jobs that have exceeded the deadline; the janitor
    /// feeds these through `reconcile_timeout`.
    pub fn stale_active_ids(&self) -> AppResult<Vec<String>> {
        let now = Utc::now();
        let timeout_ms = self.job_timeout.as_millis() as i64;
        Ok(self
            .store
            .list_all()?
            .into_iter()
            .filter(|j| j.status.is_active() && j.age_ms(now) > timeout_ms)
            .map(|j| j.id)
            .collect())
    }

    pub fn can_accept_new_job(&self, max_concurrent: usize) -> AppResult<bool> {
        Ok(self.active_count()? < max_concurrent)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> AppError {
    AppError::Internal("Job registry lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::record::{FileInfo, JobOptions};
    use crate::jobs::store::FileJobStore;
    use tempfile::tempdir;

    fn backdate(record: &mut JobRecord, by: ChronoDuration) {
        record.created_at = record.created_at - by;
        record.updated_at = record.updated_at - by;
    }

    fn registry(dir: &std::path::Path, timeout: Duration) -> JobRegistry {
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::new(dir).unwrap());
        JobRegistry::new(store, timeout)
    }

    fn record(id: &str) -> JobRecord {
        JobRecord::new(
            id.to_string(),
            "en-US".to_string(),
            FileInfo {
                name: "a.wav".to_string(),
                size: 10,
            },
            JobOptions::default(),
        )
    }

    #[test]
    fn test_create_rejects_duplicate_id() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("j1")).unwrap();
        assert!(reg.create(record("j1")).is_err());
    }

    #[test]
    fn test_get_promotes_stale_job_to_timeout() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(1));

        // Write a record backdated past the deadline straight to the store
        let store = FileJobStore::new(dir.path()).unwrap();
        let mut r = record("stale");
        backdate(&mut r, ChronoDuration::seconds(2));
        store.write(&r).unwrap();

        let seen = reg.get("stale").unwrap().unwrap();
        assert_eq!(seen.status, JobStatus::Timeout);
        assert!(seen.error.as_deref().unwrap_or("").contains("maximum"));
        assert!(seen.completed_at.is_some());
        assert!(seen.total_processing_time.unwrap() >= 2.0);

        // Idempotent: a second read does not restamp anything
        let again = reg.get("stale").unwrap().unwrap();
        assert_eq!(again.completed_at, seen.completed_at);
        assert_eq!(again.total_processing_time, seen.total_processing_time);
    }

    #[test]
    fn test_reconcile_reports_promotion_once() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(1));

        let store = FileJobStore::new(dir.path()).unwrap();
        let mut r = record("stale");
        backdate(&mut r, ChronoDuration::seconds(2));
        store.write(&r).unwrap();

        assert!(reg.reconcile_timeout("stale").unwrap());
        // Already terminal, nothing left to promote
        assert!(!reg.reconcile_timeout("stale").unwrap());
        assert!(!reg.reconcile_timeout("missing").unwrap());
    }

    #[test]
    fn test_fresh_job_is_not_promoted() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("fresh")).unwrap();
        assert_eq!(
            reg.get("fresh").unwrap().unwrap().status,
            JobStatus::Pending
        );
    }

    #[test]
    fn test_update_result_stamps_completion() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("j1")).unwrap();
        reg.update_status("j1", JobStatus::Processing).unwrap();

        let update = JobUpdate {
            status: Some(JobStatus::Completed),
            ..Default::default()
        };
        reg.update_result("j1", update).unwrap();

        let r = reg.get("j1").unwrap().unwrap();
        assert_eq!(r.status, JobStatus::Completed);
        assert!(r.completed_at.is_some());
        assert!(r.total_processing_time.is_some());
    }

    #[test]
    fn test_update_result_rejects_terminal_record() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("j1")).unwrap();
        reg.cancel("j1").unwrap();

        let err = reg
            .update_result("j1", JobUpdate::failed("late write"))
            .unwrap_err();
        assert!(err.to_string().contains("cannot be updated"));
        // The cancelled status survives the worker's late write
        assert_eq!(
            reg.get("j1").unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[test]
    fn test_pending_cannot_jump_to_completed() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("j1")).unwrap();

        let update = JobUpdate {
            status: Some(JobStatus::Completed),
            ..Default::default()
        };
        assert!(reg.update_result("j1", update).is_err());
    }

    #[test]
    fn test_cancel_rejects_terminal_job() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("j1")).unwrap();
        reg.cancel("j1").unwrap();
        assert!(reg.cancel("j1").is_err());
    }

    #[test]
    fn test_admission_gate_counts_only_live_jobs() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(1));
        reg.create(record("live")).unwrap();

        let store = FileJobStore::new(dir.path()).unwrap();
        let mut stale = record("stale");
        backdate(&mut stale, ChronoDuration::seconds(5));
        store.write(&stale).unwrap();

        // Stale job is excluded even before anything promotes it
        assert_eq!(reg.active_count().unwrap(), 1);
        assert!(reg.can_accept_new_job(2).unwrap());
        assert!(!reg.can_accept_new_job(1).unwrap());
        assert_eq!(reg.stale_active_ids().unwrap(), vec!["stale".to_string()]);
    }

    #[test]
    fn test_list_orders_newest_first_and_paginates() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        let store = FileJobStore::new(dir.path()).unwrap();

        for (i, days) in [3i64, 1, 2].iter().enumerate() {
            let mut r = record(&format!("j{}", i));
            backdate(&mut r, ChronoDuration::days(*days));
            store.write(&r).unwrap();
        }

        let page = reg.list(1, 2, None).unwrap();
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.pages, 2);
        assert_eq!(page.jobs[0].id, "j1"); // youngest (1 day old)
        assert_eq!(page.jobs[1].id, "j2");

        let page2 = reg.list(2, 2, None).unwrap();
        assert_eq!(page2.jobs.len(), 1);
        assert_eq!(page2.jobs[0].id, "j0");

        let empty = reg.list(5, 2, None).unwrap();
        assert!(empty.jobs.is_empty());
    }

    #[test]
    fn test_list_filters_by_status() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("a")).unwrap();
        reg.create(record("b")).unwrap();
        reg.cancel("b").unwrap();

        let pending = reg.list(1, 10, Some(JobStatus::Pending)).unwrap();
        assert_eq!(pending.jobs.len(), 1);
        assert_eq!(pending.jobs[0].id, "a");
    }

    #[test]
    fn test_stats_seeds_every_status() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        reg.create(record("a")).unwrap();

        let stats = reg.stats().unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.by_status.len(), 6);
        assert_eq!(stats.by_status["pending"], 1);
        assert_eq!(stats.by_status["completed"], 0);
        assert_eq!(stats.last_24h, 1);
        assert!(stats.average_processing_time.is_none());
    }

    #[test]
    fn test_cleanup_removes_only_old_terminal_jobs() {
        let dir = tempdir().unwrap();
        let reg = registry(dir.path(), Duration::from_secs(600));
        let store = FileJobStore::new(dir.path()).unwrap();

        let mut old_done = record("old_done");
        old_done.status = JobStatus::Completed;
        backdate(&mut old_done, ChronoDuration::days(3));
        old_done.completed_at = Some(old_done.updated_at);
        store.write(&old_done).unwrap();

        let mut old_pending = record("old_pending");
        backdate(&mut old_pending, ChronoDuration::days(3));
        store.write(&old_pending).unwrap();

        reg.create(record("fresh")).unwrap();
        reg.cancel("fresh").unwrap();

        let removed = reg
            .cleanup_older_than(Duration::from_secs(24 * 3600))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(reg.get("old_done").unwrap().is_none());
        assert!(reg.get("fresh").unwrap().is_some());
    }
}
