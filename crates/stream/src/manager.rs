//! Per-job push-channel session manager.
//!
//! [`SubscriptionManager`] keeps at most one live session per job id.
//! Each session runs as a spawned task (connect -> read -> reconnect)
//! and is tagged with a fresh [`SessionToken`]. Events are forwarded on
//! a single channel returned by [`SubscriptionManager::new`]; receivers
//! must check [`SubscriptionManager::is_current`] before applying one.
//!
//! Connection lifecycle changes are broadcast as [`SessionNotice`]s.
//! Call [`SubscriptionManager::subscribe_notices`] to receive them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ispitch_core::JobId;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::client::PushTransport;
use crate::credentials::CredentialProvider;
use crate::events::{ConnectionState, SessionEvent, SessionNotice, SessionToken};
use crate::processor::{process_frames, DisconnectReason, SessionScope};
use crate::reconnect::{Backoff, ReconnectConfig};

/// Broadcast channel capacity for session notices.
const NOTICE_CHANNEL_CAPACITY: usize = 256;

/// Default idle-stream timeout while a session is open.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long [`SubscriptionManager::shutdown`] waits for each task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers "should a subscription for this job still exist?".
///
/// Consulted before every reconnect attempt; once it returns `false` the
/// session stops retrying and closes.
pub type ActivityCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub reconnect: ReconnectConfig,
    /// Force a reconnect when an open stream is silent this long.
    /// `None` disables the check.
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Bookkeeping for one live session.
struct Session {
    token: SessionToken,
    state: ConnectionState,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

type SessionMap = Arc<Mutex<HashMap<JobId, Session>>>;

/// Owns every push-channel session.
///
/// Created once per tracker. [`open`](Self::open) and
/// [`close`](Self::close) are synchronous; the I/O they start or stop
/// runs on the tokio runtime, so both must be called from within one.
pub struct SubscriptionManager {
    transport: Arc<dyn PushTransport>,
    credentials: Arc<dyn CredentialProvider>,
    config: StreamConfig,
    is_active: ActivityCheck,
    sessions: SessionMap,
    next_token: AtomicU64,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    notice_tx: broadcast::Sender<SessionNotice>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl SubscriptionManager {
    /// Build a manager and the receiver for the events its sessions emit.
    pub fn new(
        transport: Arc<dyn PushTransport>,
        credentials: Arc<dyn CredentialProvider>,
        config: StreamConfig,
        is_active: ActivityCheck,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (notice_tx, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        let manager = Self {
            transport,
            credentials,
            config,
            is_active,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
            event_tx,
            notice_tx,
            cancel: CancellationToken::new(),
        };
        (manager, event_rx)
    }

    /// Subscribe to connection lifecycle notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notice_tx.subscribe()
    }

    /// Ensure a session exists for `job_id` and return its token.
    ///
    /// Idempotent: while a session is connecting or open, the existing
    /// token is returned and no second connection is started.
    pub fn open(&self, job_id: &str) -> SessionToken {
        let mut sessions = lock(&self.sessions);

        if let Some(existing) = sessions.get(job_id) {
            if existing.state != ConnectionState::Closed {
                tracing::debug!(job_id, session = existing.token, "Reusing push session");
                return existing.token;
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.cancel.child_token();
        let ctx = SessionContext {
            job_id: job_id.to_string(),
            token,
            transport: Arc::clone(&self.transport),
            credentials: Arc::clone(&self.credentials),
            config: self.config.clone(),
            is_active: Arc::clone(&self.is_active),
            sessions: Arc::clone(&self.sessions),
            events: self.event_tx.clone(),
            notices: self.notice_tx.clone(),
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(run_session_loop(ctx));
        sessions.insert(
            job_id.to_string(),
            Session {
                token,
                state: ConnectionState::Connecting,
                cancel,
                task,
            },
        );

        tracing::info!(job_id, session = token, "Opening push session");
        token
    }

    /// Close the session for `job_id`, if any.
    ///
    /// From the moment this returns, [`is_current`](Self::is_current) is
    /// `false` for the old token, so any event still in flight is dropped.
    pub fn close(&self, job_id: &str) -> bool {
        let removed = lock(&self.sessions).remove(job_id);
        match removed {
            Some(session) => {
                session.cancel.cancel();
                tracing::info!(job_id, session = session.token, "Closed push session");
                let _ = self.notice_tx.send(SessionNotice::Closed {
                    job_id: job_id.to_string(),
                    token: session.token,
                });
                true
            }
            None => false,
        }
    }

    /// Whether `token` is the live session for `job_id`.
    pub fn is_current(&self, job_id: &str, token: SessionToken) -> bool {
        lock(&self.sessions)
            .get(job_id)
            .is_some_and(|s| s.token == token)
    }

    /// Current connection state for `job_id`.
    pub fn state(&self, job_id: &str) -> ConnectionState {
        lock(&self.sessions)
            .get(job_id)
            .map_or(ConnectionState::Closed, |s| s.state)
    }

    /// Token of the live session for `job_id`, if any.
    pub fn session_token(&self, job_id: &str) -> Option<SessionToken> {
        lock(&self.sessions).get(job_id).map(|s| s.token)
    }

    /// Ids of every job with a live session.
    pub fn active_job_ids(&self) -> Vec<JobId> {
        lock(&self.sessions).keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Close every session without waiting for the tasks to exit.
    pub fn close_all(&self) {
        let ids = self.active_job_ids();
        for job_id in ids {
            self.close(&job_id);
        }
    }

    /// Cancel everything and wait up to 5 seconds per task for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down subscription manager");
        self.cancel.cancel();

        let drained: Vec<(JobId, Session)> = lock(&self.sessions).drain().collect();
        for (job_id, session) in drained {
            session.cancel.cancel();
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, session.task).await;
            tracing::debug!(job_id = %job_id, session = session.token, "Session task stopped");
        }

        tracing::info!("Subscription manager shut down complete");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// Everything a session task needs, owned so it can be moved into a spawn.
struct SessionContext {
    job_id: JobId,
    token: SessionToken,
    transport: Arc<dyn PushTransport>,
    credentials: Arc<dyn CredentialProvider>,
    config: StreamConfig,
    is_active: ActivityCheck,
    sessions: SessionMap,
    events: mpsc::UnboundedSender<SessionEvent>,
    notices: broadcast::Sender<SessionNotice>,
    cancel: CancellationToken,
}

impl SessionContext {
    /// The session should keep (re)connecting.
    fn still_wanted(&self) -> bool {
        !self.cancel.is_cancelled() && (self.is_active)(&self.job_id)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut sessions = lock(&self.sessions);
        if let Some(session) = sessions.get_mut(&self.job_id) {
            if session.token == self.token {
                session.state = state;
            }
        }
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    /// Remove this session's entry unless it was already closed or replaced.
    fn finish(&self) {
        let removed = {
            let mut sessions = lock(&self.sessions);
            match sessions.get(&self.job_id) {
                Some(s) if s.token == self.token => sessions.remove(&self.job_id).is_some(),
                _ => false,
            }
        };
        if removed {
            self.cancel.cancel();
            self.notify(SessionNotice::Closed {
                job_id: self.job_id.clone(),
                token: self.token,
            });
        }
    }
}

/// Core session loop: connect -> read frames -> back off -> reconnect.
///
/// Runs until the session is cancelled or the activity check reports the
/// job no longer needs a subscription.
async fn run_session_loop(ctx: SessionContext) {
    let job_id = ctx.job_id.clone();
    let token = ctx.token;
    let mut backoff = Backoff::new(ctx.config.reconnect.clone());
    let mut retrying = false;

    loop {
        if !ctx.still_wanted() {
            break;
        }

        if retrying {
            let (attempt, delay) = backoff.next_attempt();
            ctx.set_state(ConnectionState::Connecting);
            ctx.notify(SessionNotice::Reconnecting {
                job_id: job_id.clone(),
                token,
                attempt,
                delay,
            });
            tracing::info!(
                job_id = %job_id,
                session = token,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting push channel",
            );

            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if !ctx.still_wanted() {
                break;
            }
        } else {
            ctx.notify(SessionNotice::Connecting {
                job_id: job_id.clone(),
                token,
            });
        }
        retrying = true;

        let bearer = ctx.credentials.bearer_token();
        let connected = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = ctx.transport.connect(&job_id, bearer.as_deref()) => result,
        };

        let mut frames = match connected {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(job_id = %job_id, session = token, error = %e, "Push channel connect failed");
                continue;
            }
        };

        ctx.set_state(ConnectionState::Open);
        ctx.notify(SessionNotice::Open {
            job_id: job_id.clone(),
            token,
        });
        backoff.reset();
        tracing::info!(job_id = %job_id, session = token, "Push channel open");

        let scope = SessionScope {
            job_id: &job_id,
            token,
            cancel: &ctx.cancel,
        };
        let reason = process_frames(&mut frames, scope, ctx.config.idle_timeout, &ctx.events).await;
        if reason == DisconnectReason::Cancelled {
            break;
        }
        tracing::debug!(job_id = %job_id, session = token, ?reason, "Push channel disconnected");
    }

    ctx.finish();
    tracing::debug!(job_id = %job_id, session = token, "Session task exited");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
