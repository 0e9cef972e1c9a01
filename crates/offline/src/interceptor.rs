//! Outbound request interceptor.
//!
//! Tries live delivery first. Connectivity failures on allow-listed mutation
//! endpoints are parked in the durable queue and answered with a synthetic
//! `202 Accepted`; client errors surface untouched and are never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use forgepos_core::{RequestId, TransactionId};

use crate::connectivity::ConnectivityMonitor;
use crate::error::OfflineError;
use crate::events::{SyncEvent, SyncEventBus, emit};
use crate::policy::{DeliveryClass, DeliveryPolicy};
use crate::store::OfflineStore;
use crate::transport::{Transport, TransportError, TransportResponse};
use crate::types::OutboundRequest;

pub const QUEUED_STATUS: u16 = 202;
const QUEUED_MESSAGE: &str = "Request queued for sync when connection is restored";

/// Body of the synthetic response returned for a queued request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedBody {
    pub success: bool,
    pub offline: bool,
    pub queued: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedResponse {
    pub request_id: RequestId,
    pub body: QueuedBody,
}

impl QueuedResponse {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            body: QueuedBody {
                success: true,
                offline: true,
                queued: true,
                message: QUEUED_MESSAGE.to_string(),
            },
        }
    }

    /// The response as a caller expecting plain HTTP would see it.
    pub fn to_response(&self) -> Result<TransportResponse, OfflineError> {
        let mut response = TransportResponse::new(QUEUED_STATUS, serde_json::to_string(&self.body)?);
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        Ok(response)
    }
}

/// Outcome of a successful `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    /// The server answered; its response is returned unmodified.
    Delivered(TransportResponse),
    /// Delivery was deferred to the queue.
    Queued(QueuedResponse),
}

impl SubmitResponse {
    pub fn status(&self) -> u16 {
        match self {
            SubmitResponse::Delivered(resp) => resp.status,
            SubmitResponse::Queued(_) => QUEUED_STATUS,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, SubmitResponse::Queued(_))
    }
}

#[derive(Clone)]
pub struct NetworkInterceptor {
    store: OfflineStore,
    transport: Arc<dyn Transport>,
    policy: DeliveryPolicy,
    connectivity: ConnectivityMonitor,
    bus: Arc<SyncEventBus>,
    timeout: Duration,
    offline_enabled: Arc<AtomicBool>,
}

impl std::fmt::Debug for NetworkInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkInterceptor")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("offline_enabled", &self.offline_enabled.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl NetworkInterceptor {
    pub fn new(
        store: OfflineStore,
        transport: Arc<dyn Transport>,
        policy: DeliveryPolicy,
        connectivity: ConnectivityMonitor,
        bus: Arc<SyncEventBus>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            connectivity,
            bus,
            timeout,
            offline_enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Share an externally owned "offline mode enabled" switch.
    pub fn with_offline_switch(mut self, enabled: Arc<AtomicBool>) -> Self {
        self.offline_enabled = enabled;
        self
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn offline_enabled(&self) -> bool {
        self.offline_enabled.load(Ordering::SeqCst)
    }

    pub async fn submit(&self, request: OutboundRequest) -> Result<SubmitResponse, OfflineError> {
        self.submit_inner(request, None).await
    }

    /// Like [`submit`](Self::submit), linking a queued request to the local
    /// transaction it delivers.
    pub async fn submit_for_transaction(
        &self,
        request: OutboundRequest,
        transaction_id: TransactionId,
    ) -> Result<SubmitResponse, OfflineError> {
        self.submit_inner(request, Some(transaction_id)).await
    }

    async fn submit_inner(
        &self,
        request: OutboundRequest,
        transaction_id: Option<TransactionId>,
    ) -> Result<SubmitResponse, OfflineError> {
        let result = self.transport.send(&request, self.timeout).await;

        match DeliveryPolicy::classify(&result) {
            DeliveryClass::Delivered => {
                self.connectivity.set_online();
                match result {
                    Ok(resp) => Ok(SubmitResponse::Delivered(resp)),
                    Err(err) => Err(OfflineError::ConnectivityFailure(err.to_string())),
                }
            }
            DeliveryClass::ClientError => match result {
                Ok(resp) => {
                    tracing::debug!(url = %request.url, status = resp.status, "request rejected");
                    Err(OfflineError::ClientRequest(resp))
                }
                Err(err) => Err(OfflineError::InvalidRequest(err.to_string())),
            },
            DeliveryClass::Connectivity => {
                let reason = describe_failure(&result);
                // An HTTP answer, even a 503, proves the server is reachable.
                if result.is_err() {
                    self.connectivity.set_offline();
                }

                if !self.policy.is_queueable(&request) {
                    return Err(OfflineError::ConnectivityFailure(reason));
                }
                if !self.offline_enabled() {
                    tracing::warn!(url = %request.url, "offline mode disabled; not queuing");
                    return Err(OfflineError::ConnectivityFailure(reason));
                }

                self.enqueue(&request, transaction_id, reason).await
            }
        }
    }

    async fn enqueue(
        &self,
        request: &OutboundRequest,
        transaction_id: Option<TransactionId>,
        reason: String,
    ) -> Result<SubmitResponse, OfflineError> {
        let enqueued = match transaction_id {
            Some(tx) => self.store.enqueue_for_transaction(request, tx).await,
            None => self.store.enqueue(request).await,
        };

        let request_id = match enqueued {
            Ok(id) => id,
            Err(err) if err.is_storage_unavailable() => {
                tracing::error!(url = %request.url, "cannot queue request: {err}");
                return Err(OfflineError::ConnectivityFailure(reason));
            }
            Err(err) => return Err(err),
        };

        tracing::info!(request_id = %request_id, url = %request.url, reason = %reason, "request queued for sync");
        emit(
            &self.bus,
            SyncEvent::Queued {
                request_id,
                url: request.url.clone(),
            },
        );

        Ok(SubmitResponse::Queued(QueuedResponse::new(request_id)))
    }
}

fn describe_failure(result: &Result<TransportResponse, TransportError>) -> String {
    match result {
        Ok(resp) => format!("HTTP {}", resp.status),
        Err(err) => err.to_string(),
    }
}
