//! Background worker driving the sync manager.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::EntityCache;
use crate::config::OfflineConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::sync_manager::{SyncManager, SyncOutcome, SyncTrigger};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    pub sync_interval: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub cache_refresh_interval: Duration,
    pub cached_kinds: Vec<String>,
    pub health_url: String,
    pub request_timeout: Duration,
}

impl From<&OfflineConfig> for SyncWorkerConfig {
    fn from(config: &OfflineConfig) -> Self {
        Self {
            sync_interval: config.sync_interval,
            backoff_base: config.backoff_base,
            max_backoff: config.max_backoff,
            cache_refresh_interval: config.cache_refresh_interval,
            cached_kinds: config.cached_kinds.clone(),
            health_url: config.health_url(),
            request_timeout: config.request_timeout,
        }
    }
}

/// Delay before the next periodic attempt after `failures` consecutive
/// unclean cycles: `base * 2^(failures - 1)`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32 << (failures - 1).min(16);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

/// Background sync worker.
///
/// Spawns a task that:
/// - Runs a sync cycle every `sync_interval` while online
/// - Probes the health endpoint while offline and flips back online on success
/// - Runs a sync cycle as soon as connectivity is restored
/// - Backs off exponentially after cycles that leave failures behind
/// - Refreshes the entity cache after clean cycles, at most every
///   `cache_refresh_interval`
pub struct SyncWorker {
    manager: SyncManager,
    connectivity: ConnectivityMonitor,
    transport: Arc<dyn Transport>,
    cache: EntityCache,
    config: SyncWorkerConfig,
}

/// Handle to a running worker.
#[derive(Debug)]
pub struct SyncWorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Signal the worker and wait for it to stop. An in-flight cycle is
    /// allowed to finish first.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!("sync worker task failed: {err}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

struct LoopState {
    consecutive_failures: u32,
    next_attempt: Option<Instant>,
    last_refresh: Option<Instant>,
}

impl SyncWorker {
    pub fn new(
        manager: SyncManager,
        connectivity: ConnectivityMonitor,
        transport: Arc<dyn Transport>,
        cache: EntityCache,
        config: SyncWorkerConfig,
    ) -> Self {
        Self {
            manager,
            connectivity,
            transport,
            cache,
            config,
        }
    }

    pub fn start(self) -> SyncWorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            tracing::info!(interval = ?self.config.sync_interval, "background sync worker started");

            let mut ticker = tokio::time::interval(self.config.sync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut connectivity = self.connectivity.subscribe();
            let mut state = LoopState {
                consecutive_failures: 0,
                next_attempt: None,
                last_refresh: None,
            };

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        tracing::info!("background sync worker received shutdown signal");
                        break;
                    }
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *connectivity.borrow_and_update();
                        if current == ConnectivityState::Online {
                            self.run(SyncTrigger::ConnectivityRestored, &mut state).await;
                        }
                    }
                    _ = ticker.tick() => {
                        if self.connectivity.is_offline() {
                            // The restored transition is picked up by the branch above.
                            if self.transport.probe(&self.config.health_url, self.config.request_timeout).await {
                                self.connectivity.set_online();
                            } else {
                                tracing::debug!("skipping sync - health probe failed");
                            }
                            continue;
                        }

                        if let Some(next) = state.next_attempt {
                            if Instant::now() < next {
                                tracing::debug!("skipping sync - backing off");
                                continue;
                            }
                        }

                        self.run(SyncTrigger::Periodic, &mut state).await;
                    }
                }
            }

            tracing::info!("background sync worker stopped");
        });

        SyncWorkerHandle { shutdown, join }
    }

    async fn run(&self, trigger: SyncTrigger, state: &mut LoopState) {
        let report = match self.manager.trigger(trigger).await {
            SyncOutcome::Completed(report) => report,
            SyncOutcome::AlreadyRunning => return,
        };

        if report.is_clean() {
            state.consecutive_failures = 0;
            state.next_attempt = None;
            self.refresh_cache_if_due(state).await;
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let delay = backoff_delay(
                self.config.backoff_base,
                self.config.max_backoff,
                state.consecutive_failures,
            );
            state.next_attempt = Some(Instant::now() + delay);
            tracing::warn!(
                failures = state.consecutive_failures,
                backoff = ?delay,
                "sync cycle left failures; backing off"
            );
        }
    }

    async fn refresh_cache_if_due(&self, state: &mut LoopState) {
        let due = state
            .last_refresh
            .is_none_or(|at| at.elapsed() >= self.config.cache_refresh_interval);
        if !due || self.config.cached_kinds.is_empty() {
            return;
        }

        for kind in &self.config.cached_kinds {
            if let Err(err) = self
                .cache
                .refresh(self.transport.as_ref(), kind, self.config.request_timeout)
                .await
            {
                tracing::warn!(kind = %kind, "entity cache refresh failed: {err}");
            }
        }
        state.last_refresh = Some(Instant::now());
    }
}
