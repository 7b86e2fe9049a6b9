//! Domain types for the analysis job tracker.
//!
//! This crate holds everything that is pure data or pure logic:
//!
//! - [`Job`], [`JobStatus`], [`JobPatch`] -- the cached job snapshot and the
//!   partial updates merged into it.
//! - [`analysis`] -- the `analysis_result` document published by the
//!   Analysis Service and the metrics derived from it.
//! - [`status_message`] -- lifecycle status to progress text.
//! - [`enablement`] -- whether a live subscription should exist for a job.
//!
//! Nothing in here performs I/O.

pub mod analysis;
pub mod enablement;
pub mod error;
pub mod job;
pub mod status_message;
pub mod types;

pub use analysis::AnalysisDocument;
pub use error::CoreError;
pub use job::{Job, JobMetrics, JobPatch, JobPayload, JobResult, JobStatus};
pub use types::{JobId, Timestamp};
