//! Error taxonomy for the offline pipeline.

use thiserror::Error;

use forgepos_core::{DomainError, TransactionId};

use crate::transport::TransportResponse;

#[derive(Debug, Error)]
pub enum OfflineError {
    /// The durable store cannot be opened or is not initialized. Offline mode
    /// disables itself; online-only delivery keeps working.
    #[error("offline storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Network error, timeout, 5xx, 408 or 429.
    #[error("connectivity failure: {0}")]
    ConnectivityFailure(String),

    /// The server rejected the request (4xx other than 408/429). Carries the
    /// original response untouched.
    #[error("request rejected with HTTP {}", .0.status)]
    ClientRequest(TransportResponse),

    /// The request could not be built (bad method, bad URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("client is offline")]
    Offline,

    /// A sale cannot be submitted again: it is synced or still queued.
    #[error("transaction {id} is {state}")]
    TransactionConflict { id: TransactionId, state: &'static str },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl OfflineError {
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<sqlx::Error> for OfflineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                Self::StorageUnavailable(err.to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OfflineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
