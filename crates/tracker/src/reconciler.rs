//! Merge authority for push events.
//!
//! The reconciler is the only writer of job status after submission. It
//! rejects anything that would move a cached job backwards, applies a
//! completion together with its result in one upsert, and settles each
//! job exactly once when it turns terminal: the persisted pointer is
//! cleared (when it names that job) and the push session is closed.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ispitch_core::{Job, JobId, JobPatch, JobStatus};
use ispitch_stream::{JobEvent, SubscriptionManager};

use crate::persistence::PersistenceAdapter;
use crate::registry::JobRegistry;

/// Why an event did not change the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The job is not in the registry.
    UnknownJob,
    /// The cached job is already terminal.
    Terminal(JobStatus),
    /// The incoming status is not ahead of the cached one.
    NotForward { current: JobStatus, incoming: JobStatus },
    /// `Completed` arrived as a bare status with no result attached.
    CompletedWithoutResult,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownJob => f.write_str("job not in registry"),
            Self::Terminal(status) => write!(f, "job already {status}"),
            Self::NotForward { current, incoming } => {
                write!(f, "{incoming} does not advance from {current}")
            }
            Self::CompletedWithoutResult => f.write_str("completion without result"),
        }
    }
}

/// Result of [`Reconciler::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied(Job),
    Discarded(DiscardReason),
}

pub struct Reconciler {
    registry: Arc<JobRegistry>,
    persistence: Arc<dyn PersistenceAdapter>,
    sessions: Arc<SubscriptionManager>,
    clear_pointer_on_failure: bool,
    /// Jobs whose terminal transition has already been acted on. An id is
    /// dropped once its entry leaves the registry.
    settled: Mutex<HashSet<JobId>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<JobRegistry>,
        persistence: Arc<dyn PersistenceAdapter>,
        sessions: Arc<SubscriptionManager>,
        clear_pointer_on_failure: bool,
    ) -> Self {
        Self {
            registry,
            persistence,
            sessions,
            clear_pointer_on_failure,
            settled: Mutex::new(HashSet::new()),
        }
    }

    /// Merge one event into the registry.
    pub async fn apply(&self, event: JobEvent) -> ReconcileOutcome {
        let job_id = event.job_id().to_string();

        let result = match event {
            JobEvent::StatusChanged { status, .. } => {
                self.registry.try_upsert(&job_id, |current| status_patch(current, status))
            }
            JobEvent::ResultReady { result, .. } => self.registry.try_upsert(&job_id, |current| {
                guard_live(current)?;
                Ok(JobPatch::completed(result))
            }),
        };

        match result {
            Ok(job) => {
                tracing::debug!(job_id = %job_id, status = %job.status, "Event applied");
                if job.is_terminal() {
                    self.settle(&job).await;
                }
                ReconcileOutcome::Applied(job)
            }
            Err(reason) => {
                tracing::debug!(job_id = %job_id, %reason, "Event discarded");
                ReconcileOutcome::Discarded(reason)
            }
        }
    }

    /// Act on a terminal job: clear the pointer if it names this job and
    /// close its session. Runs at most once per job.
    pub async fn settle(&self, job: &Job) {
        if !job.is_terminal() || !self.settled().insert(job.id.clone()) {
            return;
        }

        tracing::info!(job_id = %job.id, status = %job.status, "Job reached terminal state");

        let clear = match job.status {
            JobStatus::Completed => true,
            JobStatus::Failed => self.clear_pointer_on_failure,
            _ => false,
        };
        if clear {
            self.clear_pointer_for(&job.id).await;
        }

        self.sessions.close(&job.id);
    }

    /// Forget that `job_id` was settled, so a re-seeded entry settles again.
    pub fn forget(&self, job_id: &str) {
        self.settled().remove(job_id);
    }

    pub fn forget_all(&self) {
        self.settled().clear();
    }

    async fn clear_pointer_for(&self, job_id: &str) {
        match self.persistence.clear_active_job_id_if(job_id).await {
            Ok(true) => tracing::info!(job_id, "Active job pointer cleared"),
            Ok(false) => {}
            Err(e) => tracing::warn!(job_id, error = %e, "Failed to clear active job pointer"),
        }
    }

    fn settled(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.settled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn guard_live(current: Option<&Job>) -> Result<&Job, DiscardReason> {
    match current {
        None => Err(DiscardReason::UnknownJob),
        Some(job) if job.is_terminal() => Err(DiscardReason::Terminal(job.status)),
        Some(job) => Ok(job),
    }
}

fn status_patch(current: Option<&Job>, incoming: JobStatus) -> Result<JobPatch, DiscardReason> {
    let job = guard_live(current)?;
    if incoming == JobStatus::Completed {
        return Err(DiscardReason::CompletedWithoutResult);
    }
    if !incoming.advances_from(job.status) {
        return Err(DiscardReason::NotForward {
            current: job.status,
            incoming,
        });
    }
    Ok(JobPatch::status(incoming))
}
