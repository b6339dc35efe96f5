//! # Transcription Pipeline
//!
//! Orchestrates the full journey of an upload: validation, probing,
//! admission, the background worker (convert, enhance, recognize), and
//! the completion callback.
//!
//! ## Key Flow (async path):
//! 1. **Submit**: validate the file and language, persist the upload,
//!    probe it, and create a pending job record
//! 2. **Admission**: a worker is spawned only while the concurrent-job
//!    cap has headroom; over-cap jobs stay pending until capacity frees
//!    up or the deadline promotes them to timeout
//! 3. **Worker**: convert to canonical WAV, optionally enhance, fan out
//!    to the recognition engines, persist the result
//! 4. **Callback**: POST the finished record to the client's URL, then
//!    reclaim every artifact the job created
//!
//! Cancellation is cooperative: the worker keeps going, but its final
//! write is rejected by the registry and the result is discarded.

use crate::error::{AppError, AppResult};
use crate::jobs::{FileInfo, JobOptions, JobRecord, JobStatus, JobUpdate, ProcessingInfo};
use crate::recognition::TranscriptionResult;
use crate::state::AppState;
use crate::storage::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// An upload plus its processing options.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub file_name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub language: Option<String>,
    #[serde(default)]
    pub enhance_audio: bool,
    pub callback_url: Option<String>,
}

/// What the client gets back immediately from an async submission.
#[derive(Debug, Serialize)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
    pub language: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Full result of the synchronous (blocking) path.
#[derive(Debug, Serialize)]
pub struct SyncTranscription {
    pub transcription: TranscriptionResult,
    pub audio_info: crate::audio::AudioDescriptor,
    pub processing_info: ProcessingInfo,
}

/// Rate-gate a transcription-class request.
pub fn gate_transcribe(state: &AppState, client_key: &str) -> AppResult<()> {
    state.limiter.check_request(
        &state.config.rate_limit,
        client_key,
        "transcribe",
        state.config.rate_limit.transcribe_limit,
        state.config.rate_limit.transcribe_window_secs,
    )
}

/// Rate-gate a status-class request.
pub fn gate_status(state: &AppState, client_key: &str) -> AppResult<()> {
    state.limiter.check_request(
        &state.config.rate_limit,
        client_key,
        "status",
        state.config.rate_limit.status_limit,
        state.config.rate_limit.status_window_secs,
    )
}

struct PreparedUpload {
    job_id: String,
    language: String,
    upload_path: PathBuf,
    file_info: FileInfo,
    audio_info: crate::audio::AudioDescriptor,
    warnings: Vec<String>,
}

/// Validate, persist, and probe an upload. Shared by both the async and
/// sync paths. Rejected uploads leave nothing on disk.
async fn prepare_upload(state: &AppState, request: &SubmitRequest) -> AppResult<PreparedUpload> {
    if !ArtifactStore::is_allowed_file(&request.file_name) {
        return Err(AppError::Validation(format!(
            "Unsupported file type: {}",
            request.file_name
        )));
    }
    if request.bytes.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }

    let language = request
        .language
        .clone()
        .unwrap_or_else(|| state.config.languages.default.clone());
    if !state.config.supports_language(&language) {
        return Err(AppError::Validation(format!(
            "Unsupported language: {}",
            language
        )));
    }

    let job_id = Uuid::new_v4().to_string();
    let upload_path = state
        .artifacts
        .save_upload(&job_id, &request.file_name, &request.bytes)?;

    // Probing decodes headers and sometimes shells out; keep it off the
    // async runtime threads.
    let probe_path = upload_path.clone();
    let audio_info = tokio::task::spawn_blocking(move || crate::audio::probe::probe_file(&probe_path))
        .await
        .map_err(|e| AppError::Internal(format!("Probe task panicked: {}", e)))??;

    let report = audio_info.validate_for_recognition();
    if !report.valid {
        state.artifacts.reclaim_job(&job_id);
        return Err(AppError::Validation(format!(
            "Audio failed validation: {}",
            report.errors.join("; ")
        )));
    }

    Ok(PreparedUpload {
        job_id,
        language,
        upload_path,
        file_info: FileInfo {
            name: request.file_name.clone(),
            size: request.bytes.len() as u64,
        },
        audio_info,
        warnings: report.warnings,
    })
}

/// Accept an upload and return a receipt immediately; processing happens
/// in a spawned worker when capacity allows.
pub async fn submit_async(state: &AppState, request: SubmitRequest) -> AppResult<SubmitReceipt> {
    let prepared = prepare_upload(state, &request).await?;

    let options = JobOptions {
        enhance_audio: request.enhance_audio,
        callback_url: request.callback_url.clone(),
    };
    let mut record = JobRecord::new(
        prepared.job_id.clone(),
        prepared.language.clone(),
        prepared.file_info,
        options.clone(),
    );
    record.audio_info = Some(prepared.audio_info);
    state.registry.create(record)?;

    if state
        .registry
        .can_accept_new_job(state.config.jobs.max_concurrent)?
    {
        let worker_state = state.clone();
        let job_id = prepared.job_id.clone();
        let upload_path = prepared.upload_path;
        let language = prepared.language.clone();
        let worker_warnings = prepared.warnings.clone();
        tokio::spawn(async move {
            process_job(
                worker_state,
                job_id,
                upload_path,
                language,
                options,
                worker_warnings,
            )
            .await;
        });
    } else {
        tracing::warn!(
            job_id = %prepared.job_id,
            "Concurrent job limit reached, job stays pending"
        );
    }

    Ok(SubmitReceipt {
        job_id: prepared.job_id,
        status: JobStatus::Pending,
        language: prepared.language,
        warnings: prepared.warnings,
    })
}

/// Blocking path: run the whole pipeline inline and return the result.
pub async fn transcribe_sync(
    state: &AppState,
    request: SubmitRequest,
) -> AppResult<SyncTranscription> {
    let prepared = prepare_upload(state, &request).await?;
    let job_id = prepared.job_id.clone();

    // The caller is waiting inline, so the deadline is enforced here
    // rather than by the registry's lazy promotion
    let deadline = state.config.job_timeout();
    let outcome = match tokio::time::timeout(
        deadline,
        run_processing(
            state,
            &job_id,
            &prepared.upload_path,
            &prepared.language,
            request.enhance_audio,
            prepared.warnings.clone(),
        ),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(AppError::Timeout(format!(
            "Transcription exceeded maximum processing time of {} seconds",
            deadline.as_secs()
        ))),
    };

    state.artifacts.reclaim_job(&job_id);

    let (transcription, processing_info) = outcome?;
    Ok(SyncTranscription {
        transcription,
        audio_info: prepared.audio_info,
        processing_info,
    })
}

/// The background worker for one job. Every failure path lands in the
/// job record; panics are confined to the spawned task.
async fn process_job(
    state: AppState,
    job_id: String,
    upload_path: PathBuf,
    language: String,
    options: JobOptions,
    warnings: Vec<String>,
) {
    // A job cancelled between submission and pickup is skipped outright
    match state.registry.get(&job_id) {
        Ok(Some(record)) if record.status.is_terminal() => {
            tracing::info!(job_id = %job_id, status = %record.status, "Skipping finished job");
            state.artifacts.reclaim_job(&job_id);
            return;
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::warn!(job_id = %job_id, "Job record vanished before processing");
            state.artifacts.reclaim_job(&job_id);
            return;
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, "Cannot load job record: {}", e);
            return;
        }
    }

    if let Err(e) = state.registry.update_status(&job_id, JobStatus::Processing) {
        tracing::info!(job_id = %job_id, "Job no longer startable: {}", e);
        state.artifacts.reclaim_job(&job_id);
        return;
    }
    tracing::info!(job_id = %job_id, language = %language, "Processing job");

    let outcome = run_processing(
        &state,
        &job_id,
        &upload_path,
        &language,
        options.enhance_audio,
        warnings,
    )
    .await;

    let update = match outcome {
        Ok((transcription, processing_info)) => JobUpdate {
            status: Some(JobStatus::Completed),
            transcription: Some(transcription),
            processing_info: Some(processing_info),
            ..Default::default()
        },
        Err(e) => {
            tracing::warn!(job_id = %job_id, "Job failed: {}", e);
            JobUpdate::failed(e.to_string())
        }
    };

    match state.registry.update_result(&job_id, update) {
        Ok(()) => {
            if let Some(url) = &options.callback_url {
                notify_callback(&state, &job_id, url).await;
            }
        }
        // The record went terminal under us (cancelled or timed out);
        // the late result is discarded
        Err(e) => {
            tracing::info!(job_id = %job_id, "Discarding result for finished job: {}", e);
        }
    }

    state.artifacts.reclaim_job(&job_id);
}

/// Convert, optionally enhance, and recognize. Returns the transcription
/// plus a record of what processing actually happened.
async fn run_processing(
    state: &AppState,
    job_id: &str,
    upload_path: &std::path::Path,
    language: &str,
    enhance: bool,
    warnings: Vec<String>,
) -> AppResult<(TranscriptionResult, ProcessingInfo)> {
    let converted_path = state.artifacts.temp_wav_path(job_id, "converted");
    let converter = state.converter.clone();
    let conv_in = upload_path.to_path_buf();
    let conv_out = converted_path.clone();
    let conversion = tokio::task::spawn_blocking(move || converter.convert_to_wav(&conv_in, &conv_out))
        .await
        .map_err(|e| AppError::Internal(format!("Conversion task panicked: {}", e)))??;

    let mut recognition_input = converted_path.clone();
    let mut enhancements = Vec::new();
    if enhance {
        let enhanced_path = state.artifacts.temp_wav_path(job_id, "enhanced");
        let enhancer = state.enhancer.clone();
        let enh_in = converted_path.clone();
        let enh_out = enhanced_path.clone();
        let enhanced = tokio::task::spawn_blocking(move || enhancer.enhance_file(&enh_in, &enh_out))
            .await
            .map_err(|e| AppError::Internal(format!("Enhancement task panicked: {}", e)))?;
        // Enhancement failures degrade gracefully to the converted audio
        match enhanced {
            Ok(info) => {
                enhancements = info.applied;
                recognition_input = enhanced_path;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, "Enhancement skipped: {}", e);
            }
        }
    }

    let transcription = state.broker.transcribe(&recognition_input, language).await?;

    let processing_info = ProcessingInfo {
        enhanced: !enhancements.is_empty(),
        conversion_method: Some(conversion.method),
        enhancements,
        warnings,
    };
    Ok((transcription, processing_info))
}

/// POST the finished job to the client's callback URL. Failures are
/// logged and never bounce the job.
async fn notify_callback(state: &AppState, job_id: &str, url: &str) {
    let record = match state.registry.get(job_id) {
        Ok(Some(record)) => record,
        _ => return,
    };

    let payload = serde_json::json!({
        "job_id": job_id,
        "result": record,
    });

    let timeout = Duration::from_secs(state.config.callback.timeout_secs);
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(job_id, "Cannot build callback client: {}", e);
            return;
        }
    };

    match client.post(url).json(&payload).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::info!(job_id, url, "Callback delivered");
        }
        Ok(response) => {
            tracing::warn!(job_id, url, status = %response.status(), "Callback rejected");
        }
        Err(e) => {
            tracing::warn!(job_id, url, "Callback failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn test_config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.upload_dir = root.join("uploads");
        config.storage.temp_dir = root.join("temp");
        config.storage.output_dir = root.join("outputs");
        config.storage.jobs_dir = root.join("jobs");
        config
    }

    fn test_state(root: &std::path::Path) -> AppState {
        AppState::new(test_config(root)).unwrap()
    }

    fn wav_bytes(seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..(16000.0 * seconds) as usize {
                writer
                    .write_sample(((i as f32 * 0.05).sin() * 10000.0) as i16)
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn request(file_name: &str, bytes: Vec<u8>) -> SubmitRequest {
        SubmitRequest {
            file_name: file_name.to_string(),
            bytes,
            language: None,
            enhance_audio: false,
            callback_url: None,
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let err = submit_async(&state, request("notes.txt", vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_upload() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let err = submit_async(&state, request("a.wav", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_language() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut req = request("a.wav", wav_bytes(1.0));
        req.language = Some("xx-XX".to_string());
        let err = submit_async(&state, req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_garbage_audio_and_leaves_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let err = submit_async(&state, request("a.wav", b"definitely not audio".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let uploads: Vec<_> = std::fs::read_dir(dir.path().join("uploads"))
            .unwrap()
            .collect();
        assert!(uploads.is_empty());
    }

    #[tokio::test]
    async fn test_submit_creates_pending_record_with_audio_info() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let receipt = submit_async(&state, request("a.wav", wav_bytes(2.0)))
            .await
            .unwrap();

        assert_eq!(receipt.status, JobStatus::Pending);
        assert_eq!(receipt.language, state.config.languages.default);

        let record = state.registry.get(&receipt.job_id).unwrap().unwrap();
        let audio = record.audio_info.unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert!((audio.duration_seconds - 2.0).abs() < 0.05);
    }

    #[tokio::test]
    async fn test_sync_transcription_enforces_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.jobs.timeout_secs = 0;
        let state = AppState::new(config).unwrap();

        let err = transcribe_sync(&state, request("a.wav", wav_bytes(1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));

        // The upload is reclaimed even when the deadline cuts processing off
        let uploads: Vec<_> = std::fs::read_dir(dir.path().join("uploads"))
            .unwrap()
            .collect();
        assert!(uploads.is_empty());
    }

    #[tokio::test]
    async fn test_short_audio_warns_but_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let receipt = submit_async(&state, request("a.wav", wav_bytes(0.3)))
            .await
            .unwrap();
        assert!(receipt
            .warnings
            .iter()
            .any(|w| w.contains("0.5 seconds")));
    }
}
