//! Push-channel client for analysis job updates.
//!
//! Provides server-sent-event frame decoding, a pluggable transport,
//! reconnection with jittered exponential backoff, the per-job
//! [`SubscriptionManager`], and a thin REST client for the Analysis
//! Service.

pub mod api;
pub mod client;
pub mod credentials;
pub mod events;
pub mod manager;
pub mod messages;
pub mod processor;
pub mod reconnect;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{AnalysisApi, ApiError};
pub use client::{FrameStream, PushTransport, SseTransport, StreamError};
pub use credentials::{CredentialProvider, StaticCredential};
pub use events::{ConnectionState, JobEvent, SessionEvent, SessionNotice, SessionToken};
pub use manager::{ActivityCheck, StreamConfig, SubscriptionManager};
pub use reconnect::ReconnectConfig;
