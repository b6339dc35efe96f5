//! # Job Lifecycle Management
//!
//! Owns the job records, the status state machine, and the concurrency
//! admission gate. Workers never touch job documents directly; every
//! mutation goes through the [`registry::JobRegistry`].

pub mod record;
pub mod registry;
pub mod store;

pub use record::{FileInfo, JobOptions, JobRecord, JobStatus, JobUpdate, ProcessingInfo};
pub use registry::{JobPage, JobRegistry, JobStats, Pagination};
pub use store::{FileJobStore, JobStore};
