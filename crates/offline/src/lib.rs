//! Offline-first delivery for the POS terminal.
//!
//! Sales are recorded durably before any network call. Mutations that cannot
//! reach the server are queued in SQLite and replayed in order once
//! connectivity returns.
//!
//! - [`store`]: durable request queue, unsynced transaction log, documents
//! - [`interceptor`]: live delivery with queue fallback
//! - [`sync_manager`] / [`sync_worker`]: queue replay and its background driver
//! - [`status`]: derived status for the UI
//! - [`runtime`]: wires everything together

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod policy;
pub mod runtime;
pub mod status;
pub mod store;
pub mod sync_manager;
pub mod sync_worker;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod types;

pub use cache::EntityCache;
pub use config::{OfflineConfig, StoreLocation};
pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use error::OfflineError;
pub use events::{SyncEvent, SyncEventBus};
pub use interceptor::{NetworkInterceptor, QueuedBody, QueuedResponse, SubmitResponse};
pub use policy::{DeliveryClass, DeliveryPolicy};
pub use runtime::OfflineRuntime;
pub use status::{ForceSyncOutcome, StatusFacade};
pub use store::OfflineStore;
pub use sync_manager::{SyncManager, SyncOutcome, SyncState, SyncTrigger};
pub use sync_worker::{SyncWorker, SyncWorkerConfig, SyncWorkerHandle};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
pub use types::{
    CachedEntity, OutboundRequest, QueuedRequest, StoreStats, SyncItemError, SyncReport,
    SyncStatusSnapshot, TransactionStatus, UnsyncedTransaction,
};
