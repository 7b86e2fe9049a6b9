//! Bearer credentials for the push channel and REST calls.
//!
//! Credentials are minted and refreshed by the Auth module; this crate
//! only asks for the current value each time it connects.

/// Source of the bearer token attached to outgoing requests.
pub trait CredentialProvider: Send + Sync {
    /// The token to send, or `None` for anonymous access.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, typically read from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential {
    token: Option<String>,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}
