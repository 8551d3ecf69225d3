//! Bypass transport for calls that must not take part in token refresh.
//!
//! Used for the startup "who am I" check: at that point the session is not
//! established yet and a 401 simply means the stored token is no good.

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::auth::TokenStore;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl TransportError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Plain bearer-token transport: no interceptor chain, no refresh, no retry.
///
/// The underlying client has no cookie store, so the refresh cookie is never
/// sent on this path.
#[derive(Clone)]
pub struct DirectTransport {
    client: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl DirectTransport {
    pub fn new(client: Client, base_url: impl Into<String>, tokens: Arc<TokenStore>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tokens,
        }
    }

    pub async fn send(&self, method: Method, path: &str) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, &url);
        if let Some(credential) = self.tokens.get().await {
            builder = builder.bearer_auth(credential.as_str());
        }

        let response = builder.send().await.map_err(TransportError::Network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        debug!(%url, %status, "Direct request failed");
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status { status, body })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        self.send(Method::GET, path)
            .await?
            .json()
            .await
            .map_err(TransportError::Decode)
    }
}
