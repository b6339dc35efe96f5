//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_JOBS__MAX_CONCURRENT, APP_SERVER__PORT, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// Broken into logical groups (server, storage, jobs, rate limiting, audio,
/// languages, callbacks) so each component takes only the slice it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub jobs: JobsConfig,
    pub rate_limit: RateLimitConfig,
    pub audio: AudioConfig,
    pub languages: LanguagesConfig,
    pub callback: CallbackConfig,
}

/// Server bind settings, consumed by whichever ingress layer fronts the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Artifact directory layout and upload constraints.
///
/// ## Fields:
/// - `upload_dir` / `temp_dir` / `output_dir`: the three artifact directories
///   swept by the janitor
/// - `jobs_dir`: one JSON document per job id
/// - `max_file_size`: upload size ceiling in bytes
/// - `retention_hours`: age after which terminal jobs and orphaned artifacts
///   are reclaimed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub max_file_size: u64,
    pub retention_hours: u64,
}

/// Job lifecycle tuning.
///
/// ## Fields:
/// - `max_concurrent`: admission gate for simultaneously active jobs
/// - `timeout_secs`: elapsed time after which a pending/processing job is
///   promoted to `timeout` on the next read
/// - `cleanup_interval_secs`: how often the janitor sweeps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

/// Sliding-window rate limit thresholds.
///
/// Two tiers compose: the global tier applies to every request, the
/// transcribe tier layers a stricter limit onto the expensive endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub global_limit: u32,
    pub global_window_secs: u64,
    pub transcribe_limit: u32,
    pub transcribe_window_secs: u64,
    pub status_limit: u32,
    pub status_window_secs: u64,
}

/// Normalization target for every recognition input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub target_sample_rate: u32,
    pub target_channels: u16,
}

/// Supported language tags (BCP-47 style, e.g. "id-ID", "en-US").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagesConfig {
    pub default: String,
    pub supported: Vec<String>,
}

/// Outbound completion-callback behavior. Delivery is fire-and-forget with
/// this timeout and no retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("storage/uploads"),
                temp_dir: PathBuf::from("storage/temp"),
                output_dir: PathBuf::from("storage/outputs"),
                jobs_dir: PathBuf::from("storage/jobs"),
                max_file_size: 100 * 1024 * 1024, // 100MB
                retention_hours: 24,
            },
            jobs: JobsConfig {
                max_concurrent: 5,
                timeout_secs: 600, // 10 minutes
                cleanup_interval_secs: 3600,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                global_limit: 100,
                global_window_secs: 3600,
                transcribe_limit: 10,
                transcribe_window_secs: 3600,
                status_limit: 60,
                status_window_secs: 3600,
            },
            audio: AudioConfig {
                target_sample_rate: 16000,
                target_channels: 1, // Mono
            },
            languages: LanguagesConfig {
                default: "id-ID".to_string(),
                supported: vec![
                    "id-ID", "en-US", "en-GB", "en-AU", "es-ES", "es-MX", "fr-FR", "de-DE",
                    "it-IT", "ja-JP", "ko-KR", "zh-CN", "zh-TW", "pt-BR", "pt-PT", "ru-RU",
                    "ar-SA", "hi-IN", "th-TH", "vi-VN", "tr-TR", "nl-NL",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
            callback: CallbackConfig { timeout_secs: 30 },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and environment
    /// variables, in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_JOBS__MAX_CONCURRENT=8`: override the admission cap
    /// - `APP_JOBS__TIMEOUT_SECS=300`: override the job timeout
    /// - `HOST` / `PORT`: special cases used by deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Nested keys use a double underscore: APP_JOBS__TIMEOUT_SECS
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Deployment platforms commonly inject these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.jobs.max_concurrent == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        if self.jobs.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Job timeout must be greater than 0"));
        }

        if self.storage.max_file_size == 0 {
            return Err(anyhow::anyhow!("Max file size must be greater than 0"));
        }

        if self.audio.target_sample_rate < 8000 {
            return Err(anyhow::anyhow!(
                "Target sample rate must be at least 8000 Hz for speech recognition"
            ));
        }

        if self.audio.target_channels == 0 {
            return Err(anyhow::anyhow!("Target channel count must be greater than 0"));
        }

        if self.languages.supported.is_empty() {
            return Err(anyhow::anyhow!("Supported language set cannot be empty"));
        }

        if !self.languages.supported.contains(&self.languages.default) {
            return Err(anyhow::anyhow!(
                "Default language '{}' is not in the supported set",
                self.languages.default
            ));
        }

        Ok(())
    }

    /// Job timeout as a std Duration.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs.timeout_secs)
    }

    /// Artifact and terminal-job retention window as a std Duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.storage.retention_hours * 3600)
    }

    /// True when the given language tag is accepted for transcription.
    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.supported.iter().any(|l| l == language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.jobs.max_concurrent, 5);
        assert_eq!(config.audio.target_sample_rate, 16000);
        assert_eq!(config.audio.target_channels, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.jobs.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.languages.default = "xx-XX".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_language_support() {
        let config = AppConfig::default();
        assert!(config.supports_language("id-ID"));
        assert!(config.supports_language("en-US"));
        assert!(!config.supports_language("tlh-QO"));
    }

    #[test]
    fn test_duration_helpers() {
        let config = AppConfig::default();
        assert_eq!(config.job_timeout(), Duration::from_secs(600));
        assert_eq!(config.retention(), Duration::from_secs(24 * 3600));
    }
}
