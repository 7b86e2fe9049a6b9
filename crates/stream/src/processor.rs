//! Push-channel read loop.
//!
//! Pulls frames from an open [`FrameStream`], turns them into
//! [`JobEvent`]s, and forwards them tagged with the session token. The
//! loop exits when the stream ends or fails, when no frame arrives within
//! the idle timeout, or when the session is cancelled.

use std::time::Duration;

use futures::StreamExt;
use ispitch_core::{AnalysisDocument, JobStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::FrameStream;
use crate::events::{JobEvent, SessionEvent, SessionToken};
use crate::messages::{parse_frame, Frame, StreamMessage};

/// Why a read loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The session was cancelled; do not reconnect.
    Cancelled,
    /// The server closed the stream.
    Ended,
    /// Reading from the stream failed.
    TransportError(String),
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
}

/// Identity of the session a read loop belongs to.
#[derive(Debug, Clone)]
pub struct SessionScope<'a> {
    pub job_id: &'a str,
    pub token: SessionToken,
    pub cancel: &'a CancellationToken,
}

/// Read frames until the connection ends.
pub async fn process_frames(
    frames: &mut FrameStream,
    scope: SessionScope<'_>,
    idle_timeout: Option<Duration>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> DisconnectReason {
    loop {
        let idle = async {
            match idle_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => return DisconnectReason::Cancelled,
            item = frames.next() => match item {
                Some(Ok(frame)) => handle_frame(frame, &scope, events),
                Some(Err(e)) => {
                    tracing::warn!(job_id = scope.job_id, session = scope.token, error = %e, "Push channel read failed");
                    return DisconnectReason::TransportError(e.to_string());
                }
                None => {
                    tracing::info!(job_id = scope.job_id, session = scope.token, "Push channel closed by server");
                    return DisconnectReason::Ended;
                }
            },
            _ = idle => {
                tracing::warn!(
                    job_id = scope.job_id,
                    session = scope.token,
                    idle_secs = idle_timeout.map_or(0, |d| d.as_secs()),
                    "Push channel idle, forcing reconnect",
                );
                return DisconnectReason::IdleTimeout;
            }
        }
    }
}

/// Translate one frame and forward the resulting event, if any.
fn handle_frame(
    frame: Frame,
    scope: &SessionScope<'_>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let Some(event) = translate(frame, scope) else {
        return;
    };

    // A buffered frame may still be read after close(); never forward it.
    if scope.cancel.is_cancelled() {
        tracing::debug!(job_id = scope.job_id, session = scope.token, "Dropping event from cancelled session");
        return;
    }

    let _ = events.send(SessionEvent {
        token: scope.token,
        event,
    });
}

fn translate(frame: Frame, scope: &SessionScope<'_>) -> Option<JobEvent> {
    let job_id = scope.job_id;
    match parse_frame(frame) {
        StreamMessage::StatusUpdate(raw) => match JobStatus::parse(&raw) {
            Ok(status) => {
                tracing::debug!(job_id, session = scope.token, %status, "Status update");
                Some(JobEvent::StatusChanged {
                    job_id: job_id.to_string(),
                    status,
                })
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Ignoring unrecognised status update");
                None
            }
        },
        StreamMessage::AnalysisResult(raw) => match AnalysisDocument::from_json(&raw) {
            Ok(doc) => match doc.parsed_status() {
                Some(Ok(JobStatus::Failed)) => Some(JobEvent::StatusChanged {
                    job_id: job_id.to_string(),
                    status: JobStatus::Failed,
                }),
                _ => Some(JobEvent::ResultReady {
                    job_id: job_id.to_string(),
                    result: doc.result(),
                }),
            },
            Err(e) => {
                tracing::warn!(
                    job_id,
                    session = scope.token,
                    error = %e,
                    raw_message = %raw,
                    "Discarding malformed analysis result",
                );
                None
            }
        },
        StreamMessage::Heartbeat => {
            tracing::trace!(job_id, "Push channel heartbeat");
            None
        }
        StreamMessage::Other { name } => {
            tracing::debug!(job_id, event = %name, "Ignoring unknown push event");
            None
        }
    }
}
