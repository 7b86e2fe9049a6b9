//! Domain events emitted by the subscription manager.
//!
//! [`JobEvent`]s are the only thing the reconciler consumes. They travel
//! wrapped in a [`SessionEvent`] so the receiver can drop anything that
//! belongs to a session which has since been closed or replaced.
//! [`SessionNotice`]s describe connection state for advisory display.

use std::time::Duration;

use ispitch_core::{JobId, JobResult, JobStatus};
use serde::Serialize;

/// Monotonically increasing tag assigned to every opened session.
pub type SessionToken = u64;

/// A lifecycle change reported by the Analysis Service.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A `status_update` event with a recognised status.
    StatusChanged { job_id: JobId, status: JobStatus },

    /// An `analysis_result` document, reduced to metrics and payload.
    ResultReady { job_id: JobId, result: JobResult },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::StatusChanged { job_id, .. } | Self::ResultReady { job_id, .. } => job_id,
        }
    }
}

/// A [`JobEvent`] tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub token: SessionToken,
    pub event: JobEvent,
}

/// Per-job connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// Connection lifecycle notifications, broadcast to any interested view.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// First connection attempt of a new session.
    Connecting { job_id: JobId, token: SessionToken },

    /// The push channel is established and events are flowing.
    Open { job_id: JobId, token: SessionToken },

    /// A connection attempt failed or the stream dropped; the next attempt
    /// starts after `delay`.
    Reconnecting {
        job_id: JobId,
        token: SessionToken,
        attempt: u32,
        delay: Duration,
    },

    /// The session ended and will not reconnect.
    Closed { job_id: JobId, token: SessionToken },
}

impl SessionNotice {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Connecting { job_id, .. }
            | Self::Open { job_id, .. }
            | Self::Reconnecting { job_id, .. }
            | Self::Closed { job_id, .. } => job_id,
        }
    }
}
