//! Records and snapshots shared by the offline pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use forgepos_core::{DomainError, RequestId, TransactionId};

/// Current time at the precision the store persists (microseconds), so a
/// record read back compares equal to the one written.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Header map as persisted: ordered so the stored JSON is stable.
pub type Headers = BTreeMap<String, String>;

/// An outbound HTTP call, opaque to the pipeline beyond its HTTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and set `content-type: application/json`.
    pub fn with_json(self, value: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// Whether the method changes server state. Only mutations are queueable.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.method.to_ascii_uppercase().as_str(),
            "POST" | "PUT" | "PATCH" | "DELETE"
        )
    }
}

/// A deferred outbound call, as persisted.
///
/// `url`, `method`, `headers`, `body` and `timestamp` never change after
/// enqueue; `attempts`, `last_error` and `last_attempt_at` are bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: Option<TransactionId>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedRequest {
    /// Rebuild the original request for replay.
    pub fn to_outbound(&self) -> OutboundRequest {
        OutboundRequest {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Sync status of a locally completed sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Syncing => "syncing",
            TransactionStatus::Synced => "synced",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::decode(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// A completed local sale not yet confirmed by the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsyncedTransaction {
    pub id: TransactionId,
    pub payload: Value,
    pub status: TransactionStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl UnsyncedTransaction {
    pub fn new(id: TransactionId, payload: Value) -> Self {
        Self {
            id,
            payload,
            status: TransactionStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: timestamp_now(),
            synced_at: None,
        }
    }

    pub fn is_unsynced(&self) -> bool {
        self.status != TransactionStatus::Synced
    }
}

/// Read-only mirror of a server entity (product, customer). May be stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub kind: String,
    pub id: String,
    pub payload: Value,
    pub cached_at: DateTime<Utc>,
}

/// Live record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub queued: usize,
    pub unsynced: usize,
}

/// One queued item that failed to replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItemError {
    pub request_id: RequestId,
    pub url: String,
    pub error: String,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub errors: Vec<SyncItemError>,
    /// Set when a store failure cut the cycle short.
    pub aborted: Option<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }
}

/// UI-facing status. Derived on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusSnapshot {
    pub is_online: bool,
    pub queue_size: usize,
    pub unsynced_count: usize,
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}
