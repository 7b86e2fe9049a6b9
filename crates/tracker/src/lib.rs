//! Job lifecycle tracking engine.
//!
//! [`JobTracker`] wires together the pieces that keep the client-side job
//! cache consistent with the Analysis Service:
//!
//! - [`registry::JobRegistry`] is the single cache of known jobs.
//! - [`persistence`] stores the id of the job being watched across restarts.
//! - [`reconciler::Reconciler`] merges push events into the registry under
//!   the monotonic merge rules and settles terminal jobs.
//! - the push channel itself is an [`ispitch_stream::SubscriptionManager`].

pub mod config;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod reconciler;
pub mod registry;

pub use config::TrackerConfig;
pub use engine::{JobTracker, SnapshotSource};
pub use error::TrackerError;
pub use persistence::{FileStore, MemoryStore, PersistenceAdapter, PersistenceError};
pub use reconciler::{DiscardReason, ReconcileOutcome, Reconciler};
pub use registry::{JobRegistry, RegistryChange};
