//! Runtime configuration for the offline pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::OfflineError;

/// Endpoints whose mutations may be queued while offline: transaction
/// creation, receipt issuance and inventory deduction.
pub const DEFAULT_QUEUEABLE_ENDPOINTS: &[&str] =
    &["/api/transactions", "/api/receipts", "/api/inventory/deduct"];

/// Reference data mirrored locally for offline lookups.
pub const DEFAULT_CACHED_KINDS: &[&str] = &["products", "customers"];

/// Where the durable store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Private in-memory database (tests and throwaway sessions).
    InMemory,
}

#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Base URL prepended to relative request URLs (e.g. `/api/transactions`).
    pub api_base_url: String,
    pub store: StoreLocation,
    /// Upper bound for a single delivery attempt.
    pub request_timeout: Duration,
    /// Periodic sync trigger.
    pub sync_interval: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub cache_refresh_interval: Duration,
    pub queueable_endpoints: Vec<String>,
    pub cached_kinds: Vec<String>,
    /// Synced transactions older than this are swept on initialize.
    pub synced_retention: chrono::Duration,
    pub auth_token: Option<String>,
}

impl OfflineConfig {
    /// Defaults with the durable store at [`default_db_path`].
    pub fn new() -> Result<Self, OfflineError> {
        Ok(Self::with_location(StoreLocation::File(default_db_path()?)))
    }

    /// Defaults with a throwaway in-memory store. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self::with_location(StoreLocation::InMemory)
    }

    fn with_location(store: StoreLocation) -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            store,
            request_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            cache_refresh_interval: Duration::from_secs(15 * 60),
            queueable_endpoints: DEFAULT_QUEUEABLE_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cached_kinds: DEFAULT_CACHED_KINDS.iter().map(|s| s.to_string()).collect(),
            synced_retention: chrono::Duration::days(7),
            auth_token: None,
        }
    }

    /// Build a configuration from `FORGEPOS_*` environment variables, falling
    /// back to defaults. The store defaults to the OS data directory.
    pub fn from_env() -> Result<Self, OfflineError> {
        let mut config = Self::in_memory();

        if let Ok(url) = std::env::var("FORGEPOS_API_URL") {
            config.api_base_url = url;
        }

        config.store = match std::env::var("FORGEPOS_DB_PATH") {
            Ok(path) if path == ":memory:" => StoreLocation::InMemory,
            Ok(path) => StoreLocation::File(PathBuf::from(path)),
            Err(_) => StoreLocation::File(default_db_path()?),
        };

        if let Some(ms) = env_u64("FORGEPOS_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = env_u64("FORGEPOS_SYNC_INTERVAL_SECS")? {
            config.sync_interval = Duration::from_secs(secs);
        }

        if let Ok(token) = std::env::var("FORGEPOS_AUTH_TOKEN") {
            config.auth_token = Some(token);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_store(mut self, store: StoreLocation) -> Self {
        self.store = store;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.max_backoff = max;
        self
    }

    pub fn with_queueable_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queueable_endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cached_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cached_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn validate(&self) -> Result<(), OfflineError> {
        if self.request_timeout.is_zero() {
            return Err(OfflineError::Config("request timeout must be non-zero".into()));
        }
        if self.sync_interval.is_zero() {
            return Err(OfflineError::Config("sync interval must be non-zero".into()));
        }
        if self.backoff_base > self.max_backoff {
            return Err(OfflineError::Config(
                "backoff base cannot exceed max backoff".into(),
            ));
        }
        if let Some(bad) = self.queueable_endpoints.iter().find(|e| !e.starts_with('/')) {
            return Err(OfflineError::Config(format!(
                "queueable endpoint '{bad}' must be an absolute path"
            )));
        }
        Ok(())
    }

    /// Health endpoint probed while offline.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.api_base_url.trim_end_matches('/'))
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, OfflineError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| OfflineError::Config(format!("{name}='{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

/// `{app_data_dir}/forgepos/offline.db`.
pub fn default_db_path() -> Result<PathBuf, OfflineError> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .ok_or_else(|| {
            OfflineError::Config(
                "failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share"
                    .into(),
            )
        })?;

    let mut path = base;
    path.push("forgepos");
    path.push("offline.db");
    Ok(path)
}
