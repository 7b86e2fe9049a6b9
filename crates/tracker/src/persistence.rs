//! Durable storage of the job id currently being watched.
//!
//! One pointer per profile: set on submission, read once at startup to
//! resume watching, cleared when the job settles.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ispitch_core::JobId;

/// Key under which the pointer is stored in the state file.
pub const ACTIVE_JOB_KEY: &str = "pending_analysis_id";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("State file I/O failed ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file is corrupt ({path}): {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage for the active job pointer.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn set_active_job_id(&self, id: &str) -> Result<(), PersistenceError>;

    async fn get_active_job_id(&self) -> Result<Option<JobId>, PersistenceError>;

    async fn clear_active_job_id(&self) -> Result<(), PersistenceError>;

    /// Clear the pointer only if it currently names `id`, as one atomic
    /// step. Returns whether it was cleared.
    async fn clear_active_job_id_if(&self, id: &str) -> Result<bool, PersistenceError>;
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// JSON state file, e.g. `{"pending_analysis_id": "abc"}`.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous contents intact. Keys other
/// than [`ACTIVE_JOB_KEY`] are preserved.
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

type StateMap = serde_json::Map<String, serde_json::Value>;

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StateMap, PersistenceError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateMap::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(StateMap::new());
        }
        serde_json::from_slice(&raw).map_err(|source| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn store(&self, state: &StateMap) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let body = serde_json::to_vec_pretty(state).map_err(|source| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body).await.map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PersistenceAdapter for FileStore {
    async fn set_active_job_id(&self, id: &str) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await?;
        state.insert(ACTIVE_JOB_KEY.to_string(), serde_json::Value::String(id.to_string()));
        self.store(&state).await?;
        tracing::debug!(job_id = id, path = %self.path.display(), "Active job pointer stored");
        Ok(())
    }

    async fn get_active_job_id(&self) -> Result<Option<JobId>, PersistenceError> {
        let state = self.load().await?;
        Ok(match state.get(ACTIVE_JOB_KEY) {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        })
    }

    async fn clear_active_job_id(&self) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await?;
        if state.remove(ACTIVE_JOB_KEY).is_some() {
            self.store(&state).await?;
            tracing::debug!(path = %self.path.display(), "Active job pointer cleared");
        }
        Ok(())
    }

    async fn clear_active_job_id_if(&self, id: &str) -> Result<bool, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await?;
        match state.get(ACTIVE_JOB_KEY) {
            Some(serde_json::Value::String(active)) if active == id => {}
            _ => return Ok(false),
        }
        state.remove(ACTIVE_JOB_KEY);
        self.store(&state).await?;
        tracing::debug!(job_id = id, path = %self.path.display(), "Active job pointer cleared");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Non-durable pointer, for tests and embedders without a filesystem.
#[derive(Debug, Default)]
pub struct MemoryStore {
    active: Mutex<Option<JobId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(id: impl Into<JobId>) -> Self {
        Self {
            active: Mutex::new(Some(id.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JobId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStore {
    async fn set_active_job_id(&self, id: &str) -> Result<(), PersistenceError> {
        *self.slot() = Some(id.to_string());
        Ok(())
    }

    async fn get_active_job_id(&self) -> Result<Option<JobId>, PersistenceError> {
        Ok(self.slot().clone())
    }

    async fn clear_active_job_id(&self) -> Result<(), PersistenceError> {
        *self.slot() = None;
        Ok(())
    }

    async fn clear_active_job_id_if(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut slot = self.slot();
        if slot.as_deref() != Some(id) {
            return Ok(false);
        }
        *slot = None;
        Ok(true)
    }
}
