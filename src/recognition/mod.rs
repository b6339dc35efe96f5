//! # Speech Recognition Module
//!
//! Multi-engine transcription: the broker fans a prepared WAV out across
//! every configured provider, collects their answers, and selects the
//! best one with a cross-engine agreement score.
//!
//! ## Key Components:
//! - **Engine**: the provider catalog with priors, language coverage, and
//!   credential requirements
//! - **Broker**: HTTP calls, failure classification, and best-result
//!   selection

pub mod broker;
pub mod engine;

pub use broker::{
    AlternateResult, Consensus, RecognitionBroker, TranscriptionResult,
};
pub use engine::{Engine, EngineCredentials};
