//! Push-channel transports.
//!
//! [`PushTransport`] is the seam between the subscription manager and
//! the wire. [`SseTransport`] is the production implementation: it opens
//! `GET {api_url}/v2/analysis/{id}/stream` with a bearer credential and
//! decodes the `text/event-stream` body into [`Frame`]s.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use crate::messages::{Frame, SseDecoder};

/// A live push channel, yielding frames until the connection drops.
pub type FrameStream = BoxStream<'static, Result<Frame, StreamError>>;

/// Opens a push channel for one job.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Establish the channel. Resolves once the handshake has succeeded;
    /// frames are then pulled from the returned stream.
    async fn connect(&self, job_id: &str, bearer: Option<&str>)
        -> Result<FrameStream, StreamError>;
}

/// Server-sent-events transport over HTTP.
pub struct SseTransport {
    client: reqwest::Client,
    api_url: String,
}

impl SseTransport {
    /// * `api_url` - Analysis Service base URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, job_id: &str) -> String {
        format!("{}/v2/analysis/{}/stream", self.api_url, job_id)
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn connect(
        &self,
        job_id: &str,
        bearer: Option<&str>,
    ) -> Result<FrameStream, StreamError> {
        let url = self.stream_url(job_id);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::Connection(format!("Failed to connect to {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Handshake {
                status: status.as_u16(),
            });
        }

        tracing::debug!(job_id, url = %url, "Push channel handshake complete");

        let mut decoder = SseDecoder::new();
        let frames = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(StreamError::Protocol(e.to_string()))],
            })
            .flat_map(stream::iter);

        Ok(frames.boxed())
    }
}

/// Errors raised while opening or reading a push channel.
///
/// All of them are recoverable: the subscription manager retries with
/// backoff for as long as the job is still active.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The connection could not be established (DNS, TCP, TLS).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered the handshake with a non-2xx status.
    #[error("Handshake rejected with HTTP {status}")]
    Handshake { status: u16 },

    /// The established stream failed mid-read.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_strips_trailing_slash() {
        let transport = SseTransport::new("http://localhost:8000/");
        assert_eq!(
            transport.stream_url("abc"),
            "http://localhost:8000/v2/analysis/abc/stream"
        );
    }
}
