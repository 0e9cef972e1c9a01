//! Online/offline state.
//!
//! A single `watch` channel holds the current state; the sync worker
//! subscribes to it and treats `Offline -> Online` as the
//! connectivity-restored trigger.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::OfflineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

/// Shared connectivity flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    /// Returns `true` if this call changed the state.
    pub fn set_online(&self) -> bool {
        self.transition(ConnectivityState::Online)
    }

    /// Returns `true` if this call changed the state.
    pub fn set_offline(&self) -> bool {
        self.transition(ConnectivityState::Offline)
    }

    pub fn require_online(&self) -> Result<(), OfflineError> {
        if self.is_offline() {
            return Err(OfflineError::Offline);
        }
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    fn transition(&self, next: ConnectivityState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!(state = ?next, "connectivity changed");
        }
        changed
    }
}
