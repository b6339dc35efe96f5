//! # Artifact Storage
//!
//! Owns every file the pipeline touches: uploads, intermediate WAVs, and
//! enhanced outputs. Each artifact is registered against its job id so an
//! entire job's footprint can be reclaimed in one call, and an mtime
//! sweep catches anything a crashed worker left behind.

use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "m4a", "ogg", "webm"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Per-directory usage counters for the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StorageStats {
    pub upload_files: usize,
    pub upload_bytes: u64,
    pub temp_files: usize,
    pub temp_bytes: u64,
    pub output_files: usize,
    pub output_bytes: u64,
}

pub struct ArtifactStore {
    upload_dir: PathBuf,
    temp_dir: PathBuf,
    output_dir: PathBuf,
    max_file_size: u64,
    // job id -> every path created on its behalf
    manifest: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl ArtifactStore {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        max_file_size: u64,
    ) -> AppResult<Self> {
        let store = Self {
            upload_dir: upload_dir.into(),
            temp_dir: temp_dir.into(),
            output_dir: output_dir.into(),
            max_file_size,
            manifest: Mutex::new(HashMap::new()),
        };
        for dir in [&store.upload_dir, &store.temp_dir, &store.output_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| AppError::Persistence(format!("Failed to create {}: {}", dir.display(), e)))?;
        }
        Ok(store)
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Whether the extension belongs to a supported audio or video format.
    pub fn is_allowed_file(name: &str) -> bool {
        Self::file_category(name).is_some()
    }

    /// "audio" or "video", by extension.
    pub fn file_category(name: &str) -> Option<&'static str> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())?
            .to_lowercase();
        if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some("audio")
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some("video")
        } else {
            None
        }
    }

    /// Strip path components and shell-hostile characters from a client
    /// supplied filename.
    pub fn sanitize_filename(name: &str) -> String {
        let base = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let cleaned: String = base
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned.trim_matches('_').is_empty() {
            "upload".to_string()
        } else {
            cleaned
        }
    }

    /// Persist an upload under `<upload_dir>/<job_id>_<sanitized_name>`
    /// and register it against the job.
    pub fn save_upload(&self, job_id: &str, file_name: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        if bytes.len() as u64 > self.max_file_size {
            return Err(AppError::Validation(format!(
                "File exceeds the {}MB size limit",
                self.max_file_size / (1024 * 1024)
            )));
        }
        let path = self
            .upload_dir
            .join(format!("{}_{}", job_id, Self::sanitize_filename(file_name)));
        std::fs::write(&path, bytes)
            .map_err(|e| AppError::Persistence(format!("Failed to save upload: {}", e)))?;
        self.register(job_id, &path);
        Ok(path)
    }

    /// Reserve a temp WAV path for intermediate processing output.
    pub fn temp_wav_path(&self, job_id: &str, stage: &str) -> PathBuf {
        let path = self.temp_dir.join(format!("{}_{}.wav", job_id, stage));
        self.register(job_id, &path);
        path
    }

    /// Path for a final output artifact, registered for later reclaim.
    pub fn output_path(&self, job_id: &str, file_name: &str) -> PathBuf {
        let path = self
            .output_dir
            .join(format!("{}_{}", job_id, Self::sanitize_filename(file_name)));
        self.register(job_id, &path);
        path
    }

    /// Track a path against a job so reclaim can find it.
    pub fn register(&self, job_id: &str, path: &Path) {
        if let Ok(mut manifest) = self.manifest.lock() {
            manifest
                .entry(job_id.to_string())
                .or_default()
                .push(path.to_path_buf());
        }
    }

    pub fn manifest_for(&self, job_id: &str) -> Vec<PathBuf> {
        self.manifest
            .lock()
            .map(|m| m.get(job_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Delete every artifact registered for a job. Missing files are
    /// fine; the call is idempotent. Returns the number removed.
    pub fn reclaim_job(&self, job_id: &str) -> usize {
        let paths = match self.manifest.lock() {
            Ok(mut manifest) => manifest.remove(job_id).unwrap_or_default(),
            Err(_) => return 0,
        };
        let mut removed = 0;
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            tracing::debug!(job_id, removed, "Reclaimed job artifacts");
        }
        removed
    }

    /// Sweep all managed directories for files older than `age`, catching
    /// artifacts whose owning job never reclaimed them.
    pub fn reclaim_aged(&self, age: Duration) -> usize {
        let cutoff = match SystemTime::now().checked_sub(age) {
            Some(cutoff) => cutoff,
            None => return 0,
        };
        let mut removed = 0;
        for dir in [&self.upload_dir, &self.temp_dir, &self.output_dir] {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Cannot sweep {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let old_enough = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(|mtime| mtime < cutoff)
                    .unwrap_or(false);
                if old_enough && std::fs::remove_file(&path).is_ok() {
                    tracing::debug!("Swept aged artifact {}", path.display());
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn storage_stats(&self) -> StorageStats {
        let count = |dir: &Path| -> (usize, u64) {
            let mut files = 0;
            let mut bytes = 0;
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if let Ok(meta) = entry.metadata() {
                        if meta.is_file() {
                            files += 1;
                            bytes += meta.len();
                        }
                    }
                }
            }
            (files, bytes)
        };
        let (upload_files, upload_bytes) = count(&self.upload_dir);
        let (temp_files, temp_bytes) = count(&self.temp_dir);
        let (output_files, output_bytes) = count(&self.output_dir);
        StorageStats {
            upload_files,
            upload_bytes,
            temp_files,
            temp_bytes,
            output_files,
            output_bytes,
        }
    }
}
