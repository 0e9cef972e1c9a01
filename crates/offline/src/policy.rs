//! Queue eligibility and failure classification.
//!
//! Every decision about "queue it, surface it, or pass it through" is made
//! here so that all mutation endpoints follow the same rules.

use crate::config::DEFAULT_QUEUEABLE_ENDPOINTS;
use crate::transport::{TransportError, TransportResponse};
use crate::types::OutboundRequest;

/// How a delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// The server accepted the request.
    Delivered,
    /// Transient: network error, timeout, 5xx, 408, 429. Retrying may help.
    Connectivity,
    /// The server rejected the request; retrying will not change the outcome.
    ClientError,
}

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    queueable: Vec<String>,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUEABLE_ENDPOINTS.iter().copied())
    }
}

impl DeliveryPolicy {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queueable: endpoints
                .into_iter()
                .map(|e| e.into().trim_end_matches('/').to_string())
                .collect(),
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.queueable
    }

    /// A request may be queued only if it mutates and targets an allow-listed
    /// endpoint (the endpoint itself or a sub-path of it).
    pub fn is_queueable(&self, request: &OutboundRequest) -> bool {
        if !request.is_mutation() {
            return false;
        }
        let path = request_path(&request.url);
        self.queueable.iter().any(|endpoint| {
            path == endpoint.as_str()
                || path
                    .strip_prefix(endpoint.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn classify_status(status: u16) -> DeliveryClass {
        match status {
            408 | 429 => DeliveryClass::Connectivity,
            s if s >= 500 => DeliveryClass::Connectivity,
            s if s >= 400 => DeliveryClass::ClientError,
            _ => DeliveryClass::Delivered,
        }
    }

    pub fn classify(result: &Result<TransportResponse, TransportError>) -> DeliveryClass {
        match result {
            Ok(resp) => Self::classify_status(resp.status),
            Err(TransportError::InvalidRequest(_)) => DeliveryClass::ClientError,
            Err(TransportError::Timeout(_) | TransportError::Network(_)) => {
                DeliveryClass::Connectivity
            }
        }
    }
}

/// Path component of an absolute or relative URL, without query or fragment.
pub(crate) fn request_path(url: &str) -> &str {
    let without_scheme = match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => url,
    };
    let end = without_scheme
        .find(['?', '#'])
        .unwrap_or(without_scheme.len());
    without_scheme[..end].trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(url: &str) -> OutboundRequest {
        OutboundRequest::post(url)
    }

    #[test]
    fn allow_listed_mutations_are_queueable() {
        let policy = DeliveryPolicy::default();
        assert!(policy.is_queueable(&post("/api/transactions")));
        assert!(policy.is_queueable(&post("/api/receipts/")));
        assert!(policy.is_queueable(&post("https://pos.example.com/api/inventory/deduct?x=1")));
        assert!(policy.is_queueable(&OutboundRequest::new("PATCH", "/api/transactions/42")));
    }

    #[test]
    fn reads_and_unlisted_endpoints_are_not_queueable() {
        let policy = DeliveryPolicy::default();
        assert!(!policy.is_queueable(&OutboundRequest::get("/api/transactions")));
        assert!(!policy.is_queueable(&post("/api/customers")));
        assert!(!policy.is_queueable(&post("/api/transactions-export")));
        assert!(!policy.is_queueable(&post("https://pos.example.com")));
    }

    #[test]
    fn status_classification() {
        assert_eq!(DeliveryPolicy::classify_status(200), DeliveryClass::Delivered);
        assert_eq!(DeliveryPolicy::classify_status(201), DeliveryClass::Delivered);
        assert_eq!(DeliveryPolicy::classify_status(400), DeliveryClass::ClientError);
        assert_eq!(DeliveryPolicy::classify_status(404), DeliveryClass::ClientError);
        assert_eq!(DeliveryPolicy::classify_status(408), DeliveryClass::Connectivity);
        assert_eq!(DeliveryPolicy::classify_status(429), DeliveryClass::Connectivity);
        assert_eq!(DeliveryPolicy::classify_status(503), DeliveryClass::Connectivity);
    }

    #[test]
    fn transport_errors_classify_by_kind() {
        use std::time::Duration;
        let timeout = Err(TransportError::Timeout(Duration::from_secs(1)));
        let network = Err(TransportError::Network("refused".into()));
        let invalid = Err(TransportError::InvalidRequest("bad method".into()));
        assert_eq!(DeliveryPolicy::classify(&timeout), DeliveryClass::Connectivity);
        assert_eq!(DeliveryPolicy::classify(&network), DeliveryClass::Connectivity);
        assert_eq!(DeliveryPolicy::classify(&invalid), DeliveryClass::ClientError);
    }
}
