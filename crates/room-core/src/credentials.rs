//! Access token providers
//!
//! The coordinator asks a [`CredentialProvider`] for a room access token
//! before connecting. [`HttpCredentialProvider`] fetches it from a token
//! endpoint (`GET {endpoint}?identity=<identity>`); the response body is
//! either the bare token or a JSON object with a `token` or `access_token`
//! field.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{Result, SessionError};
use crate::types::Identity;

/// Source of access tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a token for `identity`
    ///
    /// Fails with [`SessionError::TokenUnavailable`] when no token can be
    /// obtained.
    async fn fetch_token(&self, identity: &Identity) -> Result<String>;
}

/// Hands out one fixed token
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    token: String,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch_token(&self, _identity: &Identity) -> Result<String> {
        if self.token.is_empty() {
            return Err(SessionError::token_unavailable("no token configured"));
        }
        Ok(self.token.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
}

/// Fetches tokens from an HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    client: Client,
    endpoint: String,
}

impl HttpCredentialProvider {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_timeout(endpoint, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch_token(&self, identity: &Identity) -> Result<String> {
        debug!("Fetching token for '{}' from {}", identity, self.endpoint);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("identity", identity.as_str())])
            .send()
            .await
            .map_err(|e| SessionError::token_unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::token_unavailable(format!(
                "token endpoint answered {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SessionError::token_unavailable(format!("reading body failed: {}", e)))?;

        parse_token(&body)
    }
}

fn parse_token(body: &str) -> Result<String> {
    let body = body.trim();
    let token = if body.starts_with('{') {
        serde_json::from_str::<TokenResponse>(body)
            .map_err(|e| SessionError::token_unavailable(format!("unexpected token response: {}", e)))?
            .token
    } else {
        body.to_string()
    };

    if token.is_empty() {
        return Err(SessionError::token_unavailable("token endpoint returned an empty token"));
    }
    Ok(token)
}
