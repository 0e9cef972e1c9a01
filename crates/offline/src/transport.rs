//! HTTP delivery seam.
//!
//! The interceptor and sync manager only talk to a [`Transport`]; production
//! wires [`HttpTransport`] (reqwest), tests wire `testing::ScriptedTransport`
//! from the `testing` feature.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::OutboundRequest;

/// A server response, passed back to callers unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    /// The request could not be built; retrying will not help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `request`, giving up after `timeout`.
    async fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// Cheap reachability check against a health endpoint.
    async fn probe(&self, url: &str, timeout: Duration) -> bool;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::new(base_url)
        }
    }

    /// Absolute URL for `url`; relative paths are resolved against the base.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("method '{}': {e}", request.method)))?;
        let url = self.resolve(&request.url);

        let mut req = self.client.request(method, &url).timeout(timeout);

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let has_auth = request
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("authorization"));
        if let (Some(token), false) = (&self.token, has_auth) {
            req = req.bearer_auth(token);
        }

        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        let resp = req.send().await.map_err(|e| classify_reqwest_error(e, timeout))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;

        tracing::debug!(url = %url, status, "request delivered");

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    async fn probe(&self, url: &str, timeout: Duration) -> bool {
        let url = self.resolve(url);
        match self.client.get(&url).timeout(timeout).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(err) => {
                tracing::debug!(url = %url, "health probe failed: {err}");
                false
            }
        }
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
