//! # Speech Pipeline Backend
//!
//! Core of an asynchronous audio transcription service: job lifecycle
//! management with admission control and lazy timeouts, a multi-stage
//! audio normalization/enhancement pipeline, a multi-provider recognition
//! broker with consensus scoring, and a sliding-window rate limiter
//! guarding the entry points.
//!
//! The ingress layer (HTTP routing, response serialization) is a
//! collaborator that drives [`pipeline`] and reads state through
//! [`state::AppState`]; this crate owns everything underneath.

pub mod audio;
pub mod config;
pub mod error;
pub mod janitor;
pub mod jobs;
pub mod limiter;
pub mod pipeline;
pub mod recognition;
pub mod state;
pub mod storage;
