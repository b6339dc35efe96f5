//! # Application State
//!
//! The shared state every pipeline task runs against: configuration, the
//! job registry, the rate limiter, artifact storage, and the processing
//! components. Everything sits behind `Arc` so the state clones cheaply
//! into spawned workers and background tasks.

use crate::audio::{Converter, Enhancer};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::jobs::{FileJobStore, JobRegistry, JobStore};
use crate::limiter::RateLimiter;
use crate::recognition::{EngineCredentials, RecognitionBroker};
use crate::storage::ArtifactStore;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<JobRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub artifacts: Arc<ArtifactStore>,
    pub broker: Arc<RecognitionBroker>,
    pub converter: Arc<Converter>,
    pub enhancer: Arc<Enhancer>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire up every component from a validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let store: Arc<dyn JobStore> =
            Arc::new(FileJobStore::new(&config.storage.jobs_dir)?);
        let registry = Arc::new(JobRegistry::new(store, config.job_timeout()));

        let artifacts = Arc::new(ArtifactStore::new(
            &config.storage.upload_dir,
            &config.storage.temp_dir,
            &config.storage.output_dir,
            config.storage.max_file_size,
        )?);

        let credentials = EngineCredentials::from_env();
        let configured = credentials.configured_engines();
        tracing::info!(
            engines = ?configured.iter().map(|e| e.id()).collect::<Vec<_>>(),
            "Recognition engines available"
        );
        let broker = Arc::new(RecognitionBroker::new(credentials)?);

        let converter = Arc::new(Converter::new(
            config.audio.target_sample_rate,
            config.audio.target_channels,
        ));
        let enhancer = Arc::new(Enhancer::new(config.audio.target_sample_rate));

        Ok(Self {
            config: Arc::new(config),
            registry,
            limiter: Arc::new(RateLimiter::new()),
            artifacts,
            broker,
            converter,
            enhancer,
            start_time: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
