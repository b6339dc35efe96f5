//! # Speech Pipeline Backend - Main Entry Point
//!
//! Boots the transcription service: configuration, logging, the shared
//! application state, and the background maintenance task, then parks
//! until a shutdown signal arrives.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config.toml, APP_* env)
//! - **state**: shared state wiring every component together
//! - **limiter**: sliding-window rate limiting
//! - **jobs**: job records, lifecycle registry, and persistence
//! - **audio**: probing, conversion, and enhancement
//! - **recognition**: multi-engine transcription broker
//! - **storage**: artifact tracking and reclamation
//! - **janitor**: periodic maintenance sweeps
//! - **pipeline**: the submit/process/callback orchestration

use anyhow::Result;
use speech_pipeline_backend::config::AppConfig;
use speech_pipeline_backend::janitor;
use speech_pipeline_backend::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting speech-pipeline-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Jobs: max {} concurrent, {}s timeout, {}h retention",
        config.jobs.max_concurrent, config.jobs.timeout_secs, config.storage.retention_hours
    );

    let cleanup_interval =
        std::time::Duration::from_secs(config.jobs.cleanup_interval_secs);
    let app_state = AppState::new(config)?;

    setup_signal_handlers();

    let janitor = janitor::spawn_janitor(app_state.clone(), cleanup_interval);
    info!("Service ready");

    wait_for_shutdown().await;

    info!("Shutdown signal received, stopping background tasks...");
    janitor.stop().await;

    info!("Service stopped gracefully");
    Ok(())
}

/// Console logging via tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_pipeline_backend=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
