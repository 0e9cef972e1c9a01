//! Composition root for the offline pipeline.
//!
//! Every component is built here and handed its collaborators explicitly;
//! there is no global state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;

use forgepos_core::TransactionId;
use forgepos_sales::{TableCarts, decode, encode};

use crate::cache::EntityCache;
use crate::config::OfflineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::OfflineError;
use crate::events::SyncEventBus;
use crate::interceptor::{NetworkInterceptor, SubmitResponse};
use crate::policy::DeliveryPolicy;
use crate::status::StatusFacade;
use crate::store::OfflineStore;
use crate::sync_manager::SyncManager;
use crate::sync_worker::{SyncWorker, SyncWorkerConfig, SyncWorkerHandle};
use crate::transport::{HttpTransport, Transport};
use crate::types::{OutboundRequest, TransactionStatus, UnsyncedTransaction};

const TABLE_CARTS_KEY: &str = "table_carts";

pub struct OfflineRuntime {
    config: OfflineConfig,
    store: OfflineStore,
    cache: EntityCache,
    transport: Arc<dyn Transport>,
    bus: Arc<SyncEventBus>,
    connectivity: ConnectivityMonitor,
    interceptor: NetworkInterceptor,
    manager: SyncManager,
    status: StatusFacade,
    offline_enabled: Arc<AtomicBool>,
    worker: Mutex<Option<SyncWorkerHandle>>,
}

impl std::fmt::Debug for OfflineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineRuntime")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("offline_enabled", &self.is_offline_enabled())
            .finish_non_exhaustive()
    }
}

impl OfflineRuntime {
    /// Build a runtime delivering over HTTP to `config.api_base_url`.
    pub fn new(config: OfflineConfig) -> Result<Self, OfflineError> {
        config.validate()?;
        let transport = match &config.auth_token {
            Some(token) => HttpTransport::with_token(&config.api_base_url, token),
            None => HttpTransport::new(&config.api_base_url),
        };
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: OfflineConfig, transport: Arc<dyn Transport>) -> Self {
        let store = OfflineStore::new(config.store.clone());
        let cache = EntityCache::new(store.clone());
        let bus = Arc::new(SyncEventBus::new());
        let connectivity = ConnectivityMonitor::default();
        let offline_enabled = Arc::new(AtomicBool::new(false));

        let interceptor = NetworkInterceptor::new(
            store.clone(),
            transport.clone(),
            DeliveryPolicy::new(config.queueable_endpoints.iter().cloned()),
            connectivity.clone(),
            bus.clone(),
            config.request_timeout,
        )
        .with_offline_switch(offline_enabled.clone());

        let manager = SyncManager::new(
            store.clone(),
            transport.clone(),
            connectivity.clone(),
            bus.clone(),
            config.request_timeout,
        );

        let status = StatusFacade::new(store.clone(), manager.clone(), connectivity.clone());

        Self {
            config,
            store,
            cache,
            transport,
            bus,
            connectivity,
            interceptor,
            manager,
            status,
            offline_enabled,
            worker: Mutex::new(None),
        }
    }

    /// Open the durable store.
    ///
    /// If it cannot be opened, offline mode stays disabled and the runtime
    /// keeps working online-only; that is not reported as an error.
    pub async fn initialize(&self) -> Result<(), OfflineError> {
        match self.store.initialize().await {
            Ok(()) => {}
            Err(err) if err.is_storage_unavailable() => {
                tracing::error!("offline mode disabled: {err}");
                self.offline_enabled.store(false, Ordering::SeqCst);
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        self.offline_enabled.store(true, Ordering::SeqCst);

        match self
            .store
            .purge_synced_transactions(self.config.synced_retention)
            .await
        {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "purged old synced transactions"),
            Err(err) => tracing::warn!("failed to purge synced transactions: {err}"),
        }

        tracing::info!("offline runtime initialized");
        Ok(())
    }

    pub fn is_offline_enabled(&self) -> bool {
        self.offline_enabled.load(Ordering::SeqCst)
    }

    /// Start the background sync worker. No-op if it is already running or
    /// offline mode is disabled.
    pub async fn start_worker(&self) -> bool {
        if !self.is_offline_enabled() {
            tracing::warn!("not starting sync worker: offline mode disabled");
            return false;
        }
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return false;
        }

        let handle = SyncWorker::new(
            self.manager.clone(),
            self.connectivity.clone(),
            self.transport.clone(),
            self.cache.clone(),
            SyncWorkerConfig::from(&self.config),
        )
        .start();
        *worker = Some(handle);
        true
    }

    /// Stop the worker and close the store.
    pub async fn dispose(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.store.dispose().await;
        self.offline_enabled.store(false, Ordering::SeqCst);
        tracing::info!("offline runtime disposed");
    }

    pub async fn submit(&self, request: OutboundRequest) -> Result<SubmitResponse, OfflineError> {
        self.interceptor.submit(request).await
    }

    /// Record a completed sale locally, then deliver it.
    ///
    /// The sale is durable before any network call. A live success marks it
    /// synced; a queued response leaves it pending, linked to the queued
    /// request, until the sync manager delivers it. A sale that failed
    /// without being queued can be recorded again under the same id.
    pub async fn record_sale(
        &self,
        transaction_id: TransactionId,
        request: OutboundRequest,
    ) -> Result<SubmitResponse, OfflineError> {
        if !self.is_offline_enabled() {
            return self.interceptor.submit(request).await;
        }

        let payload = request
            .body
            .as_deref()
            .and_then(|body| serde_json::from_str::<Value>(body).ok())
            .unwrap_or(Value::Null);
        self.prepare_transaction(transaction_id, payload).await?;

        match self
            .interceptor
            .submit_for_transaction(request, transaction_id)
            .await
        {
            Ok(SubmitResponse::Delivered(resp)) => {
                self.store.mark_synced(transaction_id).await?;
                Ok(SubmitResponse::Delivered(resp))
            }
            Ok(queued @ SubmitResponse::Queued(_)) => {
                tracing::info!(transaction_id = %transaction_id, "sale recorded offline");
                Ok(queued)
            }
            Err(err) => {
                if let Err(mark_err) = self.store.mark_failed(transaction_id, &err.to_string()).await {
                    tracing::warn!(transaction_id = %transaction_id, "failed to record sale failure: {mark_err}");
                }
                Err(err)
            }
        }
    }

    /// Store a new sale, or reopen one whose earlier delivery failed for good.
    async fn prepare_transaction(
        &self,
        transaction_id: TransactionId,
        payload: Value,
    ) -> Result<(), OfflineError> {
        let Some(existing) = self.store.get_transaction(transaction_id).await? else {
            return self
                .store
                .record_unsynced_transaction(&UnsyncedTransaction::new(transaction_id, payload))
                .await;
        };

        if existing.status == TransactionStatus::Synced {
            return Err(OfflineError::TransactionConflict {
                id: transaction_id,
                state: "already synced",
            });
        }
        if !self.store.reopen_transaction(transaction_id, &payload).await? {
            return Err(OfflineError::TransactionConflict {
                id: transaction_id,
                state: "already queued for sync",
            });
        }
        tracing::info!(
            transaction_id = %transaction_id,
            attempts = existing.attempts,
            "retrying previously failed sale"
        );
        Ok(())
    }

    pub async fn save_table_carts(&self, carts: &TableCarts) -> Result<(), OfflineError> {
        let bytes = encode(carts)?;
        self.store.put_document(TABLE_CARTS_KEY, &bytes).await
    }

    /// Persisted table carts, or an empty set if none were saved.
    pub async fn load_table_carts(&self) -> Result<TableCarts, OfflineError> {
        match self.store.get_document(TABLE_CARTS_KEY).await? {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Ok(TableCarts::default()),
        }
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn bus(&self) -> &Arc<SyncEventBus> {
        &self.bus
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn interceptor(&self) -> &NetworkInterceptor {
        &self.interceptor
    }

    pub fn sync_manager(&self) -> &SyncManager {
        &self.manager
    }

    pub fn status(&self) -> &StatusFacade {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreLocation;
    use crate::testing::ScriptedTransport;
    use forgepos_core::TableId;
    use serde_json::json;

    async fn runtime() -> (OfflineRuntime, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let runtime = OfflineRuntime::with_transport(OfflineConfig::in_memory(), Arc::new(transport.clone()));
        runtime.initialize().await.unwrap();
        (runtime, transport)
    }

    fn sale() -> OutboundRequest {
        OutboundRequest::post("/api/transactions").with_json(&json!({"total": 1500}))
    }

    #[tokio::test]
    async fn online_sale_is_marked_synced() {
        let (runtime, _transport) = runtime().await;
        let tx = TransactionId::new();

        let resp = runtime.record_sale(tx, sale()).await.unwrap();

        assert!(!resp.is_queued());
        let stored = runtime.store().get_transaction(tx).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Synced);
        assert_eq!(stored.payload, json!({"total": 1500}));
    }

    #[tokio::test]
    async fn offline_sale_stays_pending_until_sync() {
        let (runtime, transport) = runtime().await;
        transport.set_offline(true);
        let tx = TransactionId::new();

        assert!(runtime.record_sale(tx, sale()).await.unwrap().is_queued());
        let pending = runtime.store().get_transaction(tx).await.unwrap().unwrap();
        assert_eq!(pending.status, TransactionStatus::Pending);

        transport.set_offline(false);
        runtime.connectivity().set_online();
        runtime.sync_manager().force_sync().await;

        let synced = runtime.store().get_transaction(tx).await.unwrap().unwrap();
        assert_eq!(synced.status, TransactionStatus::Synced);
    }

    #[tokio::test]
    async fn rejected_sale_is_marked_failed() {
        let (runtime, transport) = runtime().await;
        transport.respond("/api/transactions", 400, "bad");
        let tx = TransactionId::new();

        let err = runtime.record_sale(tx, sale()).await.unwrap_err();

        assert!(matches!(err, OfflineError::ClientRequest(_)));
        let stored = runtime.store().get_transaction(tx).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert!(runtime.store().list_queued().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_sale_can_be_retried_under_the_same_id() {
        let (runtime, transport) = runtime().await;
        transport.respond("/api/transactions", 400, "bad");
        let tx = TransactionId::new();
        runtime.record_sale(tx, sale()).await.unwrap_err();

        transport.respond("/api/transactions", 201, "{}");
        let resp = runtime.record_sale(tx, sale()).await.unwrap();

        assert!(!resp.is_queued());
        assert_eq!(transport.calls().len(), 2);
        let stored = runtime.store().get_transaction(tx).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Synced);
        assert_eq!(runtime.store().get_stats().await.unwrap().unsynced, 0);
    }

    #[tokio::test]
    async fn queued_or_synced_sale_is_not_submitted_twice() {
        let (runtime, transport) = runtime().await;
        let synced = TransactionId::new();
        runtime.record_sale(synced, sale()).await.unwrap();

        transport.set_offline(true);
        let queued = TransactionId::new();
        assert!(runtime.record_sale(queued, sale()).await.unwrap().is_queued());
        transport.set_offline(false);
        let calls = transport.calls().len();

        for tx in [synced, queued] {
            assert!(matches!(
                runtime.record_sale(tx, sale()).await,
                Err(OfflineError::TransactionConflict { id, .. }) if id == tx
            ));
        }
        assert_eq!(transport.calls().len(), calls);
        assert_eq!(runtime.store().list_queued().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unopenable_store_disables_offline_mode_only() {
        let dir = std::env::temp_dir().join(format!("forgepos-runtime-{}", TransactionId::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let transport = ScriptedTransport::new();
        let runtime = OfflineRuntime::with_transport(
            OfflineConfig::in_memory().with_store(StoreLocation::File(dir.clone())),
            Arc::new(transport.clone()),
        );

        runtime.initialize().await.unwrap();
        assert!(!runtime.is_offline_enabled());
        assert!(!runtime.start_worker().await);

        // Online delivery still works; offline delivery fails hard.
        assert!(!runtime.record_sale(TransactionId::new(), sale()).await.unwrap().is_queued());
        transport.set_offline(true);
        assert!(matches!(
            runtime.record_sale(TransactionId::new(), sale()).await,
            Err(OfflineError::ConnectivityFailure(_))
        ));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn table_carts_persist_through_the_store() {
        let (runtime, _transport) = runtime().await;
        assert!(runtime.load_table_carts().await.unwrap().is_empty());

        let mut carts = TableCarts::default();
        let table = TableId::new();
        carts
            .open(table, chrono::Utc::now())
            .add_item("espresso", "Espresso", 2, 250)
            .unwrap();
        runtime.save_table_carts(&carts).await.unwrap();

        let loaded = runtime.load_table_carts().await.unwrap();
        assert_eq!(loaded, carts);
        assert_eq!(loaded.get(table).map(|c| c.total()), Some(500));
    }

    #[tokio::test]
    async fn worker_starts_once_and_dispose_stops_it() {
        let (runtime, _transport) = runtime().await;
        assert!(runtime.start_worker().await);
        assert!(!runtime.start_worker().await);

        runtime.dispose().await;
        assert!(!runtime.is_offline_enabled());
        assert!(!runtime.store().is_available().await);
    }
}
