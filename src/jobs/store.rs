//! # Job Document Store
//!
//! Keyed document persistence for job records: create, full read, full
//! overwrite, delete-by-key, enumerate-all. The production implementation
//! keeps one pretty-printed JSON file per job id, which makes individual
//! jobs inspectable with nothing but a text editor.

use crate::error::{AppError, AppResult};
use crate::jobs::record::JobRecord;
use std::fs;
use std::path::{Path, PathBuf};

/// Keyed document store contract consumed by the registry.
///
/// Implementations must be safe to call from multiple threads; the registry
/// serializes read-modify-write sequences above this layer.
pub trait JobStore: Send + Sync {
    /// Write (create or fully overwrite) the document for `record.id`.
    fn write(&self, record: &JobRecord) -> AppResult<()>;

    /// Read the document for `id`, or `None` when absent.
    fn read(&self, id: &str) -> AppResult<Option<JobRecord>>;

    /// Delete the document for `id`; returns whether it existed.
    fn delete(&self, id: &str) -> AppResult<bool>;

    /// Enumerate every stored document. Unreadable documents are skipped
    /// with a warning rather than failing the whole listing.
    fn list_all(&self) -> AppResult<Vec<JobRecord>>;
}

/// File-backed job store: `<dir>/<job_id>.json`.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// Open (and create if needed) the store directory.
    pub fn new(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::Persistence(format!("Failed to create jobs dir: {}", e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read_path(path: &Path) -> AppResult<JobRecord> {
        let data = fs::read_to_string(path)
            .map_err(|e| AppError::Persistence(format!("Failed to read job document: {}", e)))?;
        serde_json::from_str(&data)
            .map_err(|e| AppError::Persistence(format!("Corrupt job document: {}", e)))
    }
}

impl JobStore for FileJobStore {
    fn write(&self, record: &JobRecord) -> AppResult<()> {
        let path = self.path_for(&record.id);
        let data = serde_json::to_string_pretty(record)
            .map_err(|e| AppError::Persistence(format!("Failed to encode job document: {}", e)))?;
        fs::write(&path, data)
            .map_err(|e| AppError::Persistence(format!("Failed to write job document: {}", e)))
    }

    fn read(&self, id: &str) -> AppResult<Option<JobRecord>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_path(&path).map(Some)
    }

    fn delete(&self, id: &str) -> AppResult<bool> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Persistence(format!(
                "Failed to delete job document: {}",
                e
            ))),
        }
    }

    fn list_all(&self) -> AppResult<Vec<JobRecord>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| AppError::Persistence(format!("Failed to read jobs dir: {}", e)))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Failed to read jobs dir entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match Self::read_path(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // One corrupt document must not hide every other job
                    tracing::warn!("Skipping unreadable job document {}: {}", path.display(), e);
                }
            }
        }

        Ok(records)
    }
}
