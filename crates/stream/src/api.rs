//! REST client for the Analysis Service.
//!
//! Only the two calls the tracker depends on are wrapped: submitting an
//! audio file (returns the new job id) and fetching a job snapshot (used
//! to rehydrate the cache after a restart).

use std::path::Path;
use std::sync::Arc;

use ispitch_core::{AnalysisDocument, CoreError, JobId};
use reqwest::multipart::{Form, Part};

use crate::credentials::CredentialProvider;

/// HTTP client for the Analysis Service.
pub struct AnalysisApi {
    client: reqwest::Client,
    api_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

/// Errors from the Analysis Service REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Analysis service error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The audio file could not be read.
    #[error("Failed to read upload: {0}")]
    Io(#[from] std::io::Error),

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AnalysisApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, credentials)
    }

    /// Reuse an existing [`reqwest::Client`] (shared with the push transport).
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Upload an audio file to start a new analysis.
    ///
    /// Sends `POST /v2/analysis/initiate` with a multipart `file` field.
    /// The service answers with the new job id, either as a bare JSON
    /// string or as an object with an `id` field.
    pub async fn submit(&self, path: &Path) -> Result<JobId, ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let form = Form::new().part("file", Part::bytes(bytes).file_name(filename));
        let request = self
            .client
            .post(format!("{}/v2/analysis/initiate", self.api_url))
            .multipart(form);

        let response = self.authorize(request).send().await?;
        let body: serde_json::Value = Self::ensure_success(response).await?.json().await?;
        let job_id = extract_job_id(&body)?;

        tracing::info!(job_id = %job_id, path = %path.display(), "Analysis submitted");
        Ok(job_id)
    }

    /// Fetch the current snapshot of a job.
    ///
    /// Sends `GET /v2/analysis/{id}`.
    pub async fn fetch(&self, job_id: &str) -> Result<AnalysisDocument, ApiError> {
        let request = self
            .client
            .get(format!("{}/v2/analysis/{}", self.api_url, job_id));

        let response = self.authorize(request).send().await?;
        let text = Self::ensure_success(response).await?.text().await?;
        Ok(AnalysisDocument::from_json(&text)?)
    }

    // ---- private helpers ----

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Return the response unchanged on success, or an
    /// [`ApiError::Status`] with the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn extract_job_id(body: &serde_json::Value) -> Result<JobId, ApiError> {
    let id = match body {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Object(map) => match map.get("id") {
            Some(serde_json::Value::String(id)) => Some(id.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        },
        _ => None,
    };

    id.filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::InvalidResponse(format!("no job id in {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn job_id_from_bare_string() {
        assert_eq!(extract_job_id(&json!("abc")).unwrap(), "abc");
    }

    #[test]
    fn job_id_from_object() {
        assert_eq!(extract_job_id(&json!({"id": "abc"})).unwrap(), "abc");
        assert_eq!(extract_job_id(&json!({"id": 42})).unwrap(), "42");
    }

    #[test]
    fn missing_job_id_is_invalid() {
        assert_matches!(extract_job_id(&json!({})), Err(ApiError::InvalidResponse(_)));
        assert_matches!(extract_job_id(&json!("")), Err(ApiError::InvalidResponse(_)));
        assert_matches!(extract_job_id(&json!(null)), Err(ApiError::InvalidResponse(_)));
    }
}
