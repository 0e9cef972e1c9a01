//! Replays the request queue against the server.
//!
//! This module provides a `SyncManager` that:
//! - Replays queued requests in enqueue order (FIFO)
//! - Never lets one failing request block the ones behind it
//! - Keeps at most one sync cycle in flight; concurrent triggers are no-ops
//! - Links delivered requests back to their local transactions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::connectivity::ConnectivityMonitor;
use crate::error::OfflineError;
use crate::events::{SyncEvent, SyncEventBus, emit};
use crate::policy::{DeliveryClass, DeliveryPolicy};
use crate::store::OfflineStore;
use crate::transport::{Transport, TransportError, TransportResponse};
use crate::types::{QueuedRequest, SyncItemError, SyncReport, timestamp_now};

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRestored,
    Periodic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    /// The last cycle finished but left requests in the queue.
    IdleWithPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another cycle was already in flight; this trigger was coalesced.
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct Progress {
    pending_after_last: bool,
    last_sync_at: Option<DateTime<Utc>>,
    last_report: Option<SyncReport>,
}

/// Clears the in-flight flag however the cycle ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SyncManager {
    store: OfflineStore,
    transport: Arc<dyn Transport>,
    connectivity: ConnectivityMonitor,
    bus: Arc<SyncEventBus>,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
    progress: Arc<RwLock<Progress>>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("timeout", &self.timeout)
            .field("in_flight", &self.is_syncing())
            .finish_non_exhaustive()
    }
}

impl SyncManager {
    pub fn new(
        store: OfflineStore,
        transport: Arc<dyn Transport>,
        connectivity: ConnectivityMonitor,
        bus: Arc<SyncEventBus>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
            bus,
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(RwLock::new(Progress::default())),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> SyncState {
        if self.is_syncing() {
            SyncState::Syncing
        } else if self.progress.read().await.pending_after_last {
            SyncState::IdleWithPending
        } else {
            SyncState::Idle
        }
    }

    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.progress.read().await.last_sync_at
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.progress.read().await.last_report.clone()
    }

    pub async fn pending_count(&self) -> Result<usize, OfflineError> {
        Ok(self.store.get_stats().await?.queued)
    }

    /// Run a cycle now.
    pub async fn force_sync(&self) -> SyncOutcome {
        self.trigger(SyncTrigger::Manual).await
    }

    /// Run one sync cycle unless one is already in flight.
    pub async fn trigger(&self, trigger: SyncTrigger) -> SyncOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(?trigger, "sync already in flight; trigger coalesced");
            return SyncOutcome::AlreadyRunning;
        }
        let _guard = SyncGuard(&self.in_flight);

        tracing::info!(?trigger, "sync cycle started");
        let report = self.run_cycle().await;

        let pending = match self.store.get_stats().await {
            Ok(stats) => stats.queued > 0,
            Err(_) => report.failed > 0 || report.aborted.is_some(),
        };
        {
            let mut progress = self.progress.write().await;
            progress.pending_after_last = pending;
            progress.last_sync_at = Some(timestamp_now());
            progress.last_report = Some(report.clone());
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            aborted = report.aborted.is_some(),
            "sync cycle complete"
        );
        emit(&self.bus, SyncEvent::SyncComplete(report.clone()));

        SyncOutcome::Completed(report)
    }

    async fn run_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let snapshot = match self.store.list_queued().await {
            Ok(items) => items,
            Err(err) => {
                tracing::error!("cannot read request queue: {err}");
                emit(&self.bus, SyncEvent::SyncStart { queued: 0 });
                report.aborted = Some(err.to_string());
                return report;
            }
        };

        emit(&self.bus, SyncEvent::SyncStart { queued: snapshot.len() });

        for (index, item) in snapshot.iter().enumerate() {
            if let Err(err) = self.replay(item, &mut report).await {
                tracing::error!(request_id = %item.id, "sync aborted by store failure: {err}");
                let message = err.to_string();
                for remaining in &snapshot[index..] {
                    report.failed += 1;
                    report.errors.push(SyncItemError {
                        request_id: remaining.id,
                        url: remaining.url.clone(),
                        error: message.clone(),
                    });
                }
                report.aborted = Some(message);
                break;
            }
        }

        report
    }

    /// Deliver one queued request and record the outcome. `Err` means the
    /// store failed and the cycle must stop.
    async fn replay(&self, item: &QueuedRequest, report: &mut SyncReport) -> Result<(), OfflineError> {
        if let Some(tx) = item.transaction_id {
            self.store.mark_syncing(tx).await?;
        }

        let result = self.transport.send(&item.to_outbound(), self.timeout).await;

        match DeliveryPolicy::classify(&result) {
            DeliveryClass::Delivered => {
                self.store.dequeue(item.id).await?;
                if let Some(tx) = item.transaction_id {
                    self.store.mark_synced(tx).await?;
                }
                self.connectivity.set_online();
                report.synced += 1;
                tracing::debug!(request_id = %item.id, url = %item.url, "queued request delivered");
                emit(
                    &self.bus,
                    SyncEvent::TransactionSynced {
                        request_id: item.id,
                        transaction_id: item.transaction_id,
                        url: item.url.clone(),
                    },
                );
            }
            class => {
                let error = describe_failure(&result);
                if class == DeliveryClass::Connectivity && result.is_err() {
                    self.connectivity.set_offline();
                }
                self.store.record_attempt_failure(item.id, &error).await?;
                if let Some(tx) = item.transaction_id {
                    self.store.mark_failed(tx, &error).await?;
                }
                tracing::warn!(
                    request_id = %item.id,
                    url = %item.url,
                    attempts = item.attempts + 1,
                    "queued request failed to sync: {error}"
                );
                report.failed += 1;
                report.errors.push(SyncItemError {
                    request_id: item.id,
                    url: item.url.clone(),
                    error,
                });
            }
        }

        Ok(())
    }
}

fn describe_failure(result: &Result<TransportResponse, TransportError>) -> String {
    match result {
        Ok(resp) if resp.body.is_empty() => format!("HTTP {}", resp.status),
        Ok(resp) => format!("HTTP {}: {}", resp.status, resp.body),
        Err(err) => err.to_string(),
    }
}
