//! UI-facing sync status.

use crate::connectivity::ConnectivityMonitor;
use crate::error::OfflineError;
use crate::store::OfflineStore;
use crate::sync_manager::{SyncManager, SyncOutcome};
use crate::types::{SyncReport, SyncStatusSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceSyncOutcome {
    Completed(SyncReport),
    Offline,
    AlreadySyncing,
}

/// Builds [`SyncStatusSnapshot`]s on demand.
///
/// The syncing flag and last-sync time come from the [`SyncManager`] that
/// publishes `sync-start`/`sync-complete`, so every snapshot already reflects
/// the latest of those events without buffering them. Counts are read live
/// from the store.
#[derive(Debug)]
pub struct StatusFacade {
    store: OfflineStore,
    manager: SyncManager,
    connectivity: ConnectivityMonitor,
}

impl StatusFacade {
    pub fn new(store: OfflineStore, manager: SyncManager, connectivity: ConnectivityMonitor) -> Self {
        Self {
            store,
            manager,
            connectivity,
        }
    }

    pub async fn snapshot(&self) -> Result<SyncStatusSnapshot, OfflineError> {
        let stats = self.store.get_stats().await?;

        Ok(SyncStatusSnapshot {
            is_online: self.connectivity.is_online(),
            queue_size: stats.queued,
            unsynced_count: stats.unsynced,
            is_syncing: self.manager.is_syncing(),
            last_sync_at: self.manager.last_sync_at().await,
        })
    }

    pub fn set_online(&self) {
        self.connectivity.set_online();
    }

    pub fn set_offline(&self) {
        self.connectivity.set_offline();
    }

    /// Run a sync cycle if online and none is in flight.
    pub async fn force_sync(&self) -> ForceSyncOutcome {
        if self.connectivity.is_offline() {
            return ForceSyncOutcome::Offline;
        }
        if self.manager.is_syncing() {
            return ForceSyncOutcome::AlreadySyncing;
        }

        match self.manager.force_sync().await {
            SyncOutcome::Completed(report) => ForceSyncOutcome::Completed(report),
            SyncOutcome::AlreadyRunning => ForceSyncOutcome::AlreadySyncing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::events::SyncEventBus;
    use crate::testing::ScriptedTransport;
    use crate::types::{OutboundRequest, UnsyncedTransaction};
    use forgepos_core::TransactionId;

    struct Fixture {
        store: OfflineStore,
        bus: Arc<SyncEventBus>,
        transport: ScriptedTransport,
        manager: SyncManager,
        facade: StatusFacade,
    }

    async fn fixture_with(transport: ScriptedTransport) -> Fixture {
        let store = OfflineStore::in_memory();
        store.initialize().await.unwrap();
        let bus = Arc::new(SyncEventBus::new());
        let connectivity = ConnectivityMonitor::default();
        let manager = SyncManager::new(
            store.clone(),
            Arc::new(transport.clone()),
            connectivity.clone(),
            bus.clone(),
            Duration::from_millis(100),
        );
        let facade = StatusFacade::new(store.clone(), manager.clone(), connectivity);
        Fixture {
            store,
            bus,
            transport,
            manager,
            facade,
        }
    }

    #[tokio::test]
    async fn snapshot_reads_live_counts() {
        let f = fixture_with(ScriptedTransport::new()).await;
        f.store.enqueue(&OutboundRequest::post("/api/transactions")).await.unwrap();
        f.store
            .record_unsynced_transaction(&UnsyncedTransaction::new(TransactionId::new(), serde_json::json!({})))
            .await
            .unwrap();

        let snapshot = f.facade.snapshot().await.unwrap();
        assert_eq!(
            snapshot,
            SyncStatusSnapshot {
                is_online: true,
                queue_size: 1,
                unsynced_count: 1,
                is_syncing: false,
                last_sync_at: None,
            }
        );
    }

    #[tokio::test]
    async fn force_sync_updates_snapshot() {
        let f = fixture_with(ScriptedTransport::new()).await;
        f.store.enqueue(&OutboundRequest::post("/api/transactions")).await.unwrap();

        let outcome = f.facade.force_sync().await;

        let ForceSyncOutcome::Completed(report) = outcome else {
            panic!("expected a completed cycle, got {outcome:?}");
        };
        assert_eq!(report.synced, 1);
        let snapshot = f.facade.snapshot().await.unwrap();
        assert_eq!(snapshot.queue_size, 0);
        assert!(!snapshot.is_syncing);
        assert!(snapshot.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn force_sync_while_offline_is_refused() {
        let f = fixture_with(ScriptedTransport::new()).await;
        f.facade.set_offline();

        assert_eq!(f.facade.force_sync().await, ForceSyncOutcome::Offline);
        assert!(f.transport.calls().is_empty());
        assert!(!f.facade.snapshot().await.unwrap().is_online);

        f.facade.set_online();
        assert!(matches!(f.facade.force_sync().await, ForceSyncOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn force_sync_during_cycle_is_refused() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let f = fixture_with(ScriptedTransport::new().with_gate(gate.clone())).await;
        f.store.enqueue(&OutboundRequest::post("/api/transactions")).await.unwrap();

        let manager = f.manager.clone();
        let running = tokio::spawn(async move { manager.force_sync().await });
        while f.transport.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(f.facade.force_sync().await, ForceSyncOutcome::AlreadySyncing);
        assert!(f.facade.snapshot().await.unwrap().is_syncing);

        gate.notify_one();
        running.await.unwrap();
        let snapshot = f.facade.snapshot().await.unwrap();
        assert!(!snapshot.is_syncing);
        assert_eq!(snapshot.queue_size, 0);
        assert_eq!(f.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn repeated_cycles_leave_no_event_backlog() {
        let f = fixture_with(ScriptedTransport::new()).await;

        for _ in 0..200 {
            f.manager.force_sync().await;
        }

        assert_eq!(f.bus.subscriber_count(), 0);
        let snapshot = f.facade.snapshot().await.unwrap();
        assert_eq!(snapshot.last_sync_at, f.manager.last_sync_at().await);
        assert!(!snapshot.is_syncing);
    }
}
