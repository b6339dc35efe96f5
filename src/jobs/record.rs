//! # Job Records
//!
//! The persisted job document and its status state machine.
//!
//! ## Status Lifecycle:
//! 1. **Pending**: record created, waiting for a worker
//! 2. **Processing**: a worker claimed the job
//! 3. **Completed / Failed / Timeout**: terminal outcomes
//! 4. **Cancelled**: terminal, reachable from Pending or Processing only
//!
//! Transitions are monotonic; nothing leaves a terminal status. The single
//! exception is the lazy promotion of a stale pending/processing record to
//! `Timeout`, which the registry performs idempotently on read.

use crate::audio::probe::AudioDescriptor;
use crate::recognition::TranscriptionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current status of a transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Record created, not yet claimed by a worker
    Pending,
    /// A worker is running the pipeline
    Processing,
    /// Transcription finished and the result is stored
    Completed,
    /// Pipeline failed terminally (conversion exhausted, all engines failed, ...)
    Failed,
    /// Cancelled by the caller before completion
    Cancelled,
    /// Exceeded the configured job timeout
    Timeout,
}

impl JobStatus {
    /// Status string used in persisted documents and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }

    /// Every status a job can be counted under, in reporting order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Timeout,
    ];

    /// True for statuses that occupy a concurrency slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// True for statuses from which no further transition occurs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            // A pending job can fail or time out without ever being claimed
            (JobStatus::Pending, JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled) => {
                true
            }
            (
                JobStatus::Processing,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled,
            ) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and size of the uploaded input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

/// Caller-supplied processing options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Run the enhancement chain before recognition
    pub enhance_audio: bool,
    /// Completion callback target; delivery is best-effort
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// How the worker prepared the audio for recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub enhanced: bool,
    /// Which conversion backend produced the WAV ("ffmpeg", "symphonia",
    /// "resample", or "none" for inputs already in WAV form)
    pub conversion_method: Option<String>,
    /// Enhancement stages that actually ran
    pub enhancements: Vec<String>,
    /// Non-blocking validation warnings carried into the result
    pub warnings: Vec<String>,
}

/// One job document. Owned exclusively by the registry; one JSON file per
/// job id in the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub file_info: FileInfo,
    pub options: JobOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_info: Option<AudioDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_info: Option<ProcessingInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds from creation to the terminal transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_processing_time: Option<f64>,
}

impl JobRecord {
    /// Create a fresh pending record with creation timestamps stamped.
    pub fn new(id: String, language: String, file_info: FileInfo, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            language,
            created_at: now,
            updated_at: now,
            completed_at: None,
            file_info,
            options,
            transcription: None,
            audio_info: None,
            processing_info: None,
            error: None,
            total_processing_time: None,
        }
    }

    /// Milliseconds elapsed since creation, as seen at `now`.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_milliseconds()
    }
}

/// Partial update merged into a record by `JobRegistry::update_result`.
#[derive(Debug, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub transcription: Option<TranscriptionResult>,
    pub audio_info: Option<AudioDescriptor>,
    pub processing_info: Option<ProcessingInfo>,
    pub error: Option<String>,
}

impl JobUpdate {
    /// Convenience constructor for a terminal failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(
            "job-1".to_string(),
            "en-US".to_string(),
            FileInfo {
                name: "clip.mp3".to_string(),
                size: 1024,
            },
            JobOptions::default(),
        )
    }

    #[test]
    fn test_new_record_is_pending() {
        let r = record();
        assert_eq!(r.status, JobStatus::Pending);
        assert!(r.completed_at.is_none());
        assert!(r.error.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_transition_rules() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Timeout));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));

        // Nothing leaves a terminal status
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Timeout.can_transition_to(Pending));
        // Pending cannot skip straight to completed
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
        let back: JobStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(back, JobStatus::Processing);
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let r = record();
        let json = serde_json::to_string(&r).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, r.id);
        assert_eq!(back.status, JobStatus::Pending);
        assert_eq!(back.file_info.size, 1024);
    }
}
