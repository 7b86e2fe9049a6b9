//! The single client-side cache of known jobs.
//!
//! Every write goes through one lock, so a reader never observes a
//! half-applied merge. Changes are fanned out on a broadcast channel so
//! any number of views can follow the cache without polling.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ispitch_core::{Job, JobId, JobPatch};
use tokio::sync::broadcast;

/// Default buffer capacity for the change feed.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change to the registry contents.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    /// The entry was created or modified; carries the new snapshot.
    Upserted(Job),
    /// The entry was removed by [`JobRegistry::invalidate`].
    Invalidated(JobId),
    /// Every entry was removed by [`JobRegistry::clear`].
    Cleared,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
    changes: broadcast::Sender<RegistryChange>,
}

impl JobRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Subscribe to registry changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Snapshot of every cached job, ordered by id.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Merge `patch` into the entry for `id`, creating it if absent.
    ///
    /// Fields the patch leaves as `None` are untouched. A terminal entry is
    /// frozen: the patch is ignored and the current snapshot returned.
    pub fn upsert(&self, id: &str, patch: JobPatch) -> Job {
        match self.try_upsert(id, |_| Ok::<_, Infallible>(patch)) {
            Ok(job) => job,
            Err(never) => match never {},
        }
    }

    /// Decide and apply a patch under a single write lock.
    ///
    /// `decide` sees the current entry (if any) and either returns the patch
    /// to merge or rejects the update. Nothing is written on rejection.
    pub fn try_upsert<E>(
        &self,
        id: &str,
        decide: impl FnOnce(Option<&Job>) -> Result<JobPatch, E>,
    ) -> Result<Job, E> {
        let mut jobs = self.write();
        let patch = decide(jobs.get(id))?;

        let (job, changed) = match jobs.get_mut(id) {
            Some(existing) if existing.is_terminal() => {
                tracing::debug!(job_id = id, status = %existing.status, "Ignoring patch for terminal job");
                (existing.clone(), false)
            }
            Some(existing) => {
                let changed = existing.apply(patch);
                (existing.clone(), changed)
            }
            None => {
                let job = Job::from_patch(id, patch);
                jobs.insert(id.to_string(), job.clone());
                (job, true)
            }
        };

        if changed {
            let _ = self.changes.send(RegistryChange::Upserted(job.clone()));
        }
        Ok(job)
    }

    /// Insert a complete entry unless one already exists.
    ///
    /// Returns `true` when `job` was inserted.
    pub fn seed(&self, job: Job) -> bool {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return false;
        }
        jobs.insert(job.id.clone(), job.clone());
        let _ = self.changes.send(RegistryChange::Upserted(job));
        true
    }

    /// Remove an entry entirely.
    pub fn invalidate(&self, id: &str) -> Option<Job> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            tracing::debug!(job_id = id, "Job evicted from registry");
            let _ = self.changes.send(RegistryChange::Invalidated(id.to_string()));
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.write().clear();
        let _ = self.changes.send(RegistryChange::Cleared);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ispitch_core::{JobMetrics, JobResult, JobStatus};

    fn completed(score: f64) -> JobPatch {
        JobPatch::completed(JobResult {
            metrics: JobMetrics {
                score,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn upsert_creates_missing_entry() {
        let registry = JobRegistry::new();
        let job = registry.upsert("abc", JobPatch::status(JobStatus::Transcribing));

        assert_eq!(job.status, JobStatus::Transcribing);
        assert_eq!(registry.get("abc"), Some(job));
    }

    #[test]
    fn upsert_leaves_omitted_fields_untouched() {
        let registry = JobRegistry::new();
        registry.upsert("abc", JobPatch::status(JobStatus::Pending).with_filename("talk.wav"));

        let job = registry.upsert("abc", JobPatch::status(JobStatus::Transcribing));

        assert_eq!(job.filename.as_deref(), Some("talk.wav"));
        assert_eq!(job.status, JobStatus::Transcribing);
    }

    #[test]
    fn terminal_entries_are_frozen() {
        let registry = JobRegistry::new();
        registry.upsert("abc", completed(82.0));

        let job = registry.upsert("abc", JobPatch::status(JobStatus::Failed).with_filename("x.wav"));

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.filename, None);
        assert_eq!(job.metrics.map(|m| m.score), Some(82.0));
    }

    #[test]
    fn rejected_decision_writes_nothing() {
        let registry = JobRegistry::new();
        let result: Result<Job, &str> = registry.try_upsert("abc", |_| Err("no"));

        assert_eq!(result, Err("no"));
        assert!(registry.is_empty());
    }

    #[test]
    fn seed_does_not_replace() {
        let registry = JobRegistry::new();
        assert!(registry.seed(Job::placeholder("abc")));
        registry.upsert("abc", JobPatch::status(JobStatus::Transcribing));

        assert!(!registry.seed(Job::placeholder("abc")));
        assert_eq!(registry.get("abc").map(|j| j.status), Some(JobStatus::Transcribing));
    }

    #[test]
    fn invalidate_and_clear() {
        let registry = JobRegistry::new();
        registry.seed(Job::placeholder("a"));
        registry.seed(Job::placeholder("b"));

        assert!(registry.invalidate("a").is_some());
        assert!(registry.invalidate("a").is_none());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn changes_are_broadcast() {
        let registry = JobRegistry::new();
        let mut rx = registry.subscribe();

        registry.upsert("abc", JobPatch::status(JobStatus::Pending));
        registry.upsert("abc", JobPatch::status(JobStatus::Pending)); // no-op
        registry.upsert("abc", JobPatch::status(JobStatus::Transcribing));
        registry.invalidate("abc");
        registry.clear();

        assert_matches!(rx.recv().await.unwrap(), RegistryChange::Upserted(j) if j.status == JobStatus::Pending);
        assert_matches!(rx.recv().await.unwrap(), RegistryChange::Upserted(j) if j.status == JobStatus::Transcribing);
        assert_eq!(rx.recv().await.unwrap(), RegistryChange::Invalidated("abc".into()));
        assert_eq!(rx.recv().await.unwrap(), RegistryChange::Cleared);
    }

    #[test]
    fn list_is_sorted_by_id() {
        let registry = JobRegistry::new();
        registry.seed(Job::placeholder("b"));
        registry.seed(Job::placeholder("a"));

        let ids: Vec<_> = registry.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
