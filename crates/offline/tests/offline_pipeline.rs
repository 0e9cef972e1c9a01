use std::sync::Arc;
use std::time::Duration;

use forgepos_core::TransactionId;
use forgepos_events::EventBus;
use forgepos_offline::testing::ScriptedTransport;
use forgepos_offline::{
    ForceSyncOutcome, OfflineConfig, OfflineError, OfflineRuntime, OfflineStore, OutboundRequest,
    SubmitResponse, SyncEvent, SyncOutcome, TransactionStatus,
};
use serde_json::json;

async fn runtime_with(transport: &ScriptedTransport) -> OfflineRuntime {
    let runtime = OfflineRuntime::with_transport(
        OfflineConfig::in_memory().with_request_timeout(Duration::from_millis(500)),
        Arc::new(transport.clone()),
    );
    runtime.initialize().await.unwrap();
    runtime
}

fn sale(n: u32) -> OutboundRequest {
    OutboundRequest::post("/api/transactions")
        .with_header("x-terminal", "till-1")
        .with_json(&json!({ "sale": n, "total": 100 * n }))
}

#[tokio::test]
async fn offline_sale_is_queued_with_synthetic_acceptance() {
    let transport = ScriptedTransport::new();
    let runtime = runtime_with(&transport).await;
    let before = runtime.store().get_stats().await.unwrap();
    transport.set_offline(true);

    let resp = runtime.submit(sale(1)).await.unwrap();

    let SubmitResponse::Queued(queued) = resp else {
        panic!("expected a queued response");
    };
    assert_eq!(queued.to_response().unwrap().status, 202);
    let body: serde_json::Value = serde_json::from_str(&queued.to_response().unwrap().body).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["queued"], true);
    assert_eq!(runtime.store().get_stats().await.unwrap().queued, before.queued + 1);
}

#[tokio::test]
async fn reconnect_drains_the_queue() {
    let transport = ScriptedTransport::new();
    let runtime = runtime_with(&transport).await;
    transport.set_offline(true);
    runtime.submit(sale(1)).await.unwrap();
    let events = runtime.bus().subscribe();

    transport.set_offline(false);
    runtime.status().set_online();
    let outcome = runtime.status().force_sync().await;

    let ForceSyncOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!((report.synced, report.failed), (1, 0));
    assert_eq!(runtime.store().get_stats().await.unwrap().queued, 0);
    let complete = events
        .drain()
        .into_iter()
        .find_map(|e| match e {
            SyncEvent::SyncComplete(report) => Some(report),
            _ => None,
        })
        .expect("sync-complete published");
    assert_eq!((complete.synced, complete.failed), (1, 0));
}

#[tokio::test]
async fn replay_keeps_enqueue_order_even_when_later_items_are_faster() {
    let transport = ScriptedTransport::new();
    let runtime = runtime_with(&transport).await;
    transport.set_offline(true);

    let a = OutboundRequest::post("/api/transactions").with_json(&json!({"sale": "A"}));
    let b = OutboundRequest::post("/api/receipts").with_json(&json!({"sale": "B"}));
    runtime.submit(a.clone()).await.unwrap();
    runtime.submit(b.clone()).await.unwrap();

    transport.set_offline(false);
    transport.delay("/api/transactions", Duration::from_millis(50));
    let calls_before = transport.calls().len();
    let events = runtime.bus().subscribe();

    runtime.sync_manager().force_sync().await;

    let replayed: Vec<OutboundRequest> = transport.calls().split_off(calls_before);
    assert_eq!(replayed, vec![a, b]);
    let synced_urls: Vec<String> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::TransactionSynced { url, .. } => Some(url),
            _ => None,
        })
        .collect();
    assert_eq!(synced_urls, vec!["/api/transactions", "/api/receipts"]);
}

#[tokio::test]
async fn permanently_rejected_item_stays_queued_and_unsynced() {
    let transport = ScriptedTransport::new();
    let runtime = runtime_with(&transport).await;
    transport.set_offline(true);
    let tx = TransactionId::new();
    runtime.record_sale(tx, sale(4)).await.unwrap();
    let unsynced_before = runtime.status().snapshot().await.unwrap().unsynced_count;

    transport.set_offline(false);
    transport.respond("/api/transactions", 404, "gone");
    runtime.status().set_online();
    let ForceSyncOutcome::Completed(report) = runtime.status().force_sync().await else {
        panic!("expected a completed cycle");
    };

    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 0);
    let queued = runtime.store().list_queued().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 1);
    assert_eq!(queued[0].transaction_id, Some(tx));

    let snapshot = runtime.status().snapshot().await.unwrap();
    assert_eq!(snapshot.unsynced_count, unsynced_before);
    assert_eq!(snapshot.queue_size, 1);
    let stored = runtime.store().get_transaction(tx).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn every_queued_request_emits_one_synced_event_in_order() {
    let transport = ScriptedTransport::new();
    let runtime = runtime_with(&transport).await;
    transport.set_offline(true);

    let mut ids = Vec::new();
    for n in 0..5 {
        let SubmitResponse::Queued(queued) = runtime.submit(sale(n)).await.unwrap() else {
            panic!("expected queued");
        };
        ids.push(queued.request_id);
    }
    transport.set_offline(false);
    let events = runtime.bus().subscribe();

    let SyncOutcome::Completed(report) = runtime.sync_manager().force_sync().await else {
        panic!("expected a completed cycle");
    };

    assert_eq!(report.synced, 5);
    assert!(runtime.store().list_queued().await.unwrap().is_empty());
    let synced: Vec<_> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::TransactionSynced { request_id, .. } => Some(request_id),
            _ => None,
        })
        .collect();
    assert_eq!(synced, ids);
}

#[tokio::test]
async fn rapid_force_syncs_run_a_single_cycle() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let transport = ScriptedTransport::new().with_gate(gate.clone());
    let runtime = Arc::new(runtime_with(&transport).await);
    runtime.store().enqueue(&sale(1)).await.unwrap();

    let first = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.status().force_sync().await })
    };
    while transport.calls().is_empty() {
        tokio::task::yield_now().await;
    }

    let second = runtime.status().force_sync().await;
    assert_eq!(second, ForceSyncOutcome::AlreadySyncing);

    gate.notify_one();
    let first = first.await.unwrap();
    assert!(matches!(first, ForceSyncOutcome::Completed(ref r) if r.synced == 1));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn queued_request_round_trips_verbatim() {
    let store = OfflineStore::in_memory();
    store.initialize().await.unwrap();
    let request = OutboundRequest::new("PUT", "http://pos.local:3000/api/inventory/deduct?sku=A-1")
        .with_header("Content-Type", "application/json; charset=utf-8")
        .with_header("X-Request-Source", "terminal 3")
        .with_body("{\"sku\":\"A-1\",\"qty\":-2,\"note\":\"Grüße\"}\n");

    store.enqueue(&request).await.unwrap();

    let listed = store.list_queued().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].to_outbound(), request);
}

#[tokio::test]
async fn uninitialized_store_rejects_enqueue() {
    let store = OfflineStore::in_memory();
    let err = store.enqueue(&sale(1)).await.unwrap_err();
    assert!(matches!(err, OfflineError::StorageUnavailable(_)));
}

#[tokio::test]
async fn background_worker_replays_after_connectivity_returns() {
    let transport = ScriptedTransport::new();
    let runtime = OfflineRuntime::with_transport(
        OfflineConfig::in_memory()
            .with_sync_interval(Duration::from_millis(20))
            .with_request_timeout(Duration::from_millis(200)),
        Arc::new(transport.clone()),
    );
    runtime.initialize().await.unwrap();
    transport.set_offline(true);
    runtime.record_sale(TransactionId::new(), sale(9)).await.unwrap();
    assert!(runtime.connectivity().is_offline());

    assert!(runtime.start_worker().await);
    transport.set_offline(false);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = runtime.status().snapshot().await.unwrap();
            if snapshot.queue_size == 0 && snapshot.unsynced_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker did not drain the queue");

    assert!(runtime.connectivity().is_online());
    runtime.dispose().await;
}
