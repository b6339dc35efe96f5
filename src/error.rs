//! # Error Handling
//!
//! Defines the error taxonomy for the transcription pipeline. Every failure
//! a caller can observe maps onto one of these variants, so the ingress
//! layer can translate them into transport-level responses without guessing.
//!
//! ## Error Categories:
//! - **Validation**: bad input, rejected before the pipeline starts, never retried
//! - **Conversion**: every conversion backend was exhausted (terminal job failure)
//! - **Provider**: a recognition engine call failed; surfaced only when all engines fail
//! - **Timeout**: an inline transcription ran past the job deadline; async
//!   jobs record the deadline on the job document instead
//! - **Persistence**: a job document write failed; logged, no automatic retry
//! - **RateLimited**: rejected pre-pipeline, carries a retry-after duration
//! - **NotFound / Internal**: lookup misses and everything unexpected

use std::fmt;

/// Custom error type for the transcription pipeline.
#[derive(Debug)]
pub enum AppError {
    /// Input failed validation rules (unsupported format, language, size, ...)
    Validation(String),

    /// All audio conversion backends failed for this input
    Conversion {
        message: String,
        /// Conversion methods tried, in order
        attempted: Vec<String>,
    },

    /// A recognition provider failed; terminal only when every engine failed
    Provider(String),

    /// Inline transcription exceeded the configured processing deadline
    Timeout(String),

    /// Job document could not be written to or read from the store
    Persistence(String),

    /// Request rejected by the sliding-window rate limiter
    RateLimited {
        message: String,
        /// Seconds until the client's window frees up
        retry_after_secs: u64,
    },

    /// Requested job or resource does not exist
    NotFound(String),

    /// Anything unexpected (bugs, missing system tools, poisoned locks)
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Conversion { message, attempted } => write!(
                f,
                "Conversion error: {} (attempted: {})",
                message,
                attempted.join(", ")
            ),
            AppError::Provider(msg) => write!(f, "Provider error: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            AppError::RateLimited {
                message,
                retry_after_secs,
            } => write!(
                f,
                "Rate limit exceeded: {} (retry after {}s)",
                message, retry_after_secs
            ),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Anyhow errors collapse into Internal; used at seams where a dependency
/// reports a generic failure we cannot classify further.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
