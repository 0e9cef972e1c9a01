//! Notifications published by the offline pipeline.

use serde::Serialize;

use forgepos_core::{RequestId, TransactionId};
use forgepos_events::{EventBus, InMemoryEventBus};

use crate::types::SyncReport;

/// Typed sync notification. Serializes as `{"type": "sync-start", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    SyncStart {
        queued: usize,
    },
    SyncComplete(SyncReport),
    /// A request was deferred to the queue.
    Queued {
        request_id: RequestId,
        url: String,
    },
    /// A queued request was delivered during sync.
    TransactionSynced {
        request_id: RequestId,
        transaction_id: Option<TransactionId>,
        url: String,
    },
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::SyncStart { .. } => "sync-start",
            SyncEvent::SyncComplete(_) => "sync-complete",
            SyncEvent::Queued { .. } => "queued",
            SyncEvent::TransactionSynced { .. } => "transaction-synced",
        }
    }
}

pub type SyncEventBus = InMemoryEventBus<SyncEvent>;

/// Publish `event`. A lost notification is logged and otherwise ignored:
/// listeners re-read state from the store.
pub(crate) fn emit(bus: &SyncEventBus, event: SyncEvent) {
    let name = event.name();
    if let Err(err) = bus.publish(event) {
        tracing::warn!(event = name, "failed to publish sync event: {err:?}");
    }
}
