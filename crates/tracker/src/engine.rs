//! The tracker facade.
//!
//! [`JobTracker`] is constructed once at startup and owns every component
//! explicitly: the registry, the persisted pointer, the subscription
//! manager and the reconciler. A background pump moves session events
//! into the reconciler, dropping any whose session token is stale.
//!
//! Subscriptions are driven by [`JobTracker::transition`]: it evaluates
//! the enablement policy for a job and opens or closes its session to
//! match. Call it whenever a job starts or stops being of interest.
//! A second task follows the registry change feed and closes any session
//! whose job turned terminal or was evicted, whoever made the write.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ispitch_core::enablement;
use ispitch_core::status_message::MSG_PROCESSING;
use ispitch_core::{AnalysisDocument, Job, JobPatch, JobStatus};
use ispitch_stream::{
    ActivityCheck, AnalysisApi, ApiError, ConnectionState, CredentialProvider, PushTransport,
    SessionEvent, SessionNotice, SubscriptionManager,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::persistence::PersistenceAdapter;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::registry::{JobRegistry, RegistryChange};

/// Where rehydration fetches a job snapshot from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<AnalysisDocument, ApiError>;
}

#[async_trait]
impl SnapshotSource for AnalysisApi {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<AnalysisDocument, ApiError> {
        self.fetch(job_id).await
    }
}

pub struct JobTracker {
    registry: Arc<JobRegistry>,
    persistence: Arc<dyn PersistenceAdapter>,
    sessions: Arc<SubscriptionManager>,
    reconciler: Arc<Reconciler>,
    resumed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobTracker {
    /// Build the tracker and start its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        transport: Arc<dyn PushTransport>,
        credentials: Arc<dyn CredentialProvider>,
        persistence: Arc<dyn PersistenceAdapter>,
        config: &TrackerConfig,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());

        let is_active: ActivityCheck = {
            let registry = Arc::clone(&registry);
            Arc::new(move |job_id: &str| enablement::is_active(registry.get(job_id).as_ref()))
        };

        let (sessions, events) =
            SubscriptionManager::new(transport, credentials, config.stream.clone(), is_active);
        let sessions = Arc::new(sessions);

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&persistence),
            Arc::clone(&sessions),
            config.clear_pointer_on_failure,
        ));

        let pump = tokio::spawn(pump_events(
            events,
            Arc::clone(&sessions),
            Arc::clone(&reconciler),
        ));
        let policy = tokio::spawn(enforce_policy(
            registry.subscribe(),
            Arc::clone(&registry),
            Arc::clone(&sessions),
            Arc::clone(&reconciler),
        ));

        Self {
            registry,
            persistence,
            sessions,
            reconciler,
            resumed: AtomicBool::new(false),
            tasks: Mutex::new(vec![pump, policy]),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.registry.get(job_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.registry.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.sessions.subscribe_notices()
    }

    pub fn connection_state(&self, job_id: &str) -> ConnectionState {
        self.sessions.state(job_id)
    }

    /// Progress text for a cached job, or the generic fallback.
    pub fn progress_message(&self, job_id: &str) -> &'static str {
        self.registry
            .get(job_id)
            .map_or(MSG_PROCESSING, |job| job.status.message())
    }

    /// Bring the subscription for `job_id` in line with the enablement
    /// policy. Returns whether a session should now exist.
    pub fn transition(&self, job_id: &str) -> bool {
        let active = enablement::is_active(self.registry.get(job_id).as_ref());
        if active {
            self.sessions.open(job_id);
        } else if self.sessions.close(job_id) {
            tracing::debug!(job_id, "Subscription closed by policy");
        }
        active
    }

    /// Start following a job already present in the registry.
    pub fn watch(&self, job_id: &str) -> bool {
        self.transition(job_id)
    }

    /// Stop following a job. The cached entry is kept.
    pub fn stop(&self, job_id: &str) {
        if self.sessions.close(job_id) {
            tracing::info!(job_id, "Watch stopped");
        }
    }

    /// Record a freshly submitted job: seed it as `Pending`, persist it as
    /// the active job and start watching it.
    pub async fn submitted(&self, job_id: &str, filename: &str) -> Result<Job, TrackerError> {
        let job = self.registry.upsert(
            job_id,
            JobPatch::status(JobStatus::Pending)
                .with_filename(filename)
                .with_created_at(chrono::Utc::now()),
        );
        self.persistence.set_active_job_id(job_id).await?;
        self.transition(job_id);
        tracing::info!(job_id, filename, "Tracking submitted job");
        Ok(job)
    }

    /// Upload `path` through `api` and track the resulting job.
    pub async fn submit(&self, api: &AnalysisApi, path: &Path) -> Result<Job, TrackerError> {
        let job_id = api.submit(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.submitted(&job_id, &filename).await
    }

    /// Evict a job from the cache and drop its subscription.
    pub fn invalidate(&self, job_id: &str) -> Option<Job> {
        self.sessions.close(job_id);
        self.reconciler.forget(job_id);
        self.registry.invalidate(job_id)
    }

    /// Resume the job named by the persisted pointer, if any.
    ///
    /// The pointer is read once per tracker lifetime (until [`reset`]).
    /// A terminal snapshot is cached and settled; otherwise the job is
    /// watched. When the snapshot cannot be fetched, a `Pending`
    /// placeholder is cached so the push channel can still catch up.
    ///
    /// [`reset`]: Self::reset
    pub async fn resume(&self, source: &dyn SnapshotSource) -> Result<Option<Job>, TrackerError> {
        if self.resumed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Active job pointer already read");
            return Ok(None);
        }

        let Some(job_id) = self.persistence.get_active_job_id().await? else {
            tracing::debug!("No active job to resume");
            return Ok(None);
        };

        let fetched = match source.fetch_snapshot(&job_id).await {
            Ok(doc) => doc.into_job(job_id.as_str()),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Snapshot fetch failed, resuming from placeholder");
                Job::placeholder(job_id.as_str())
            }
        };
        self.registry.seed(fetched);

        let Some(job) = self.registry.get(&job_id) else {
            return Ok(None);
        };

        if job.is_terminal() {
            self.reconciler.settle(&job).await;
        } else {
            self.transition(&job_id);
        }
        tracing::info!(job_id = %job_id, status = %job.status, "Resumed active job");
        Ok(Some(job))
    }

    /// Logout: close every session, clear the cache and the pointer.
    pub async fn reset(&self) -> Result<(), TrackerError> {
        self.sessions.close_all();
        self.registry.clear();
        self.reconciler.forget_all();
        self.persistence.clear_active_job_id().await?;
        self.resumed.store(false, Ordering::SeqCst);
        tracing::info!("Tracker reset");
        Ok(())
    }

    /// Close every session and stop the background tasks.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Feed session events to the reconciler until the manager goes away.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    sessions: Arc<SubscriptionManager>,
    reconciler: Arc<Reconciler>,
) {
    while let Some(SessionEvent { token, event }) = events.recv().await {
        if !sessions.is_current(event.job_id(), token) {
            tracing::debug!(job_id = event.job_id(), session = token, "Dropping event from stale session");
            continue;
        }
        if let ReconcileOutcome::Applied(job) = reconciler.apply(event).await {
            tracing::trace!(job_id = %job.id, status = %job.status, "Registry updated");
        }
    }
}

/// Close sessions whose job stopped being active after a registry write.
///
/// Opening stays explicit through [`JobTracker::watch`], so a stopped job
/// is not reopened by later writes to its entry.
async fn enforce_policy(
    mut changes: broadcast::Receiver<RegistryChange>,
    registry: Arc<JobRegistry>,
    sessions: Arc<SubscriptionManager>,
    reconciler: Arc<Reconciler>,
) {
    let close_if_inactive = |job_id: &str| {
        if !enablement::is_active(registry.get(job_id).as_ref()) && sessions.close(job_id) {
            tracing::debug!(job_id, "Subscription closed after registry change");
        }
    };

    loop {
        match changes.recv().await {
            Ok(RegistryChange::Upserted(job)) => {
                if job.is_terminal() {
                    close_if_inactive(&job.id);
                }
            }
            Ok(RegistryChange::Invalidated(job_id)) => {
                if !registry.contains(&job_id) {
                    reconciler.forget(&job_id);
                }
                close_if_inactive(&job_id);
            }
            Ok(RegistryChange::Cleared) => {
                if registry.is_empty() {
                    reconciler.forget_all();
                }
                for job_id in sessions.active_job_ids() {
                    close_if_inactive(&job_id);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Registry feed lagged, re-checking every session");
                for job_id in sessions.active_job_ids() {
                    close_if_inactive(&job_id);
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
