//! In-process [`Transport`] for tests and demos.
//!
//! Responses are scripted per request path; anything unscripted answers
//! `200 {}`. `set_offline(true)` makes every call fail with a network error,
//! which is how tests simulate losing the uplink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::policy::request_path;
use crate::transport::{Transport, TransportError, TransportResponse};
use crate::types::OutboundRequest;

#[derive(Debug, Default)]
struct Script {
    offline: bool,
    responses: HashMap<String, Result<TransportResponse, TransportError>>,
    delays: HashMap<String, Duration>,
    calls: Vec<OutboundRequest>,
    probes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `send` waits for a permit on `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.lock()
            .responses
            .insert(normalize(path), Ok(TransportResponse::new(status, body)));
    }

    pub fn fail(&self, path: &str, error: TransportError) {
        self.lock().responses.insert(normalize(path), Err(error));
    }

    /// Hold responses for `path` for `delay`; a delay longer than the caller's
    /// timeout yields `TransportError::Timeout`.
    pub fn delay(&self, path: &str, delay: Duration) {
        self.lock().delays.insert(normalize(path), delay);
    }

    /// Requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<OutboundRequest> {
        self.lock().calls.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.lock().probes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panicking test thread must not hide the script from the others.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn normalize(url: &str) -> String {
    request_path(url).to_string()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let path = normalize(&request.url);
        let (offline, scripted, delay) = {
            let mut script = self.lock();
            script.calls.push(request.clone());
            (
                script.offline,
                script.responses.get(&path).cloned(),
                script.delays.get(&path).copied(),
            )
        };

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(TransportError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }

        if offline {
            return Err(TransportError::Network("connection refused".into()));
        }

        scripted.unwrap_or_else(|| Ok(TransportResponse::new(200, "{}")))
    }

    async fn probe(&self, _url: &str, _timeout: Duration) -> bool {
        let mut script = self.lock();
        script.probes += 1;
        !script.offline
    }
}
