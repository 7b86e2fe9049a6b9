//! Scripted in-memory transport for exercising sessions without a server.
//!
//! Each call to [`PushTransport::connect`] consumes the next
//! [`Attempt`] from the script. An exhausted script fails every further
//! connection attempt.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};

use crate::client::{FrameStream, PushTransport, StreamError};
use crate::messages::Frame;

/// Sender half feeding a live scripted stream.
pub type FrameSender = mpsc::UnboundedSender<Result<Frame, StreamError>>;

/// Outcome of one scripted connection attempt.
pub enum Attempt {
    /// The handshake fails.
    Fail,
    /// The handshake succeeds; the frames are delivered and the stream
    /// then stays open without further traffic.
    Frames(Vec<Frame>),
    /// The handshake succeeds; frames are pushed through the paired
    /// [`FrameSender`]. Dropping the sender ends the stream.
    Live(mpsc::UnboundedReceiver<Result<Frame, StreamError>>),
}

impl Attempt {
    /// A live attempt and the sender that drives it.
    pub fn live() -> (FrameSender, Self) {
        let (tx, rx) = mpsc::unbounded();
        (tx, Self::Live(rx))
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Attempt>>,
    connects: AtomicUsize,
    bearers: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Append attempts to the end of the script.
    pub fn push(&self, attempt: Attempt) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(attempt);
    }

    /// Number of connection attempts made so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Bearer credential passed with each attempt, in order.
    pub fn bearers(&self) -> Vec<Option<String>> {
        self.bearers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(
        &self,
        _job_id: &str,
        bearer: Option<&str>,
    ) -> Result<FrameStream, StreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.bearers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bearer.map(str::to_string));

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(Attempt::Frames(frames)) => Ok(stream::iter(frames.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(Attempt::Live(rx)) => Ok(rx.boxed()),
            Some(Attempt::Fail) | None => {
                Err(StreamError::Connection("scripted failure".to_string()))
            }
        }
    }
}
