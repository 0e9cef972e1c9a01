//! Durable local store persisted in SQLite.
//!
//! Holds the outbound request queue, the unsynced transaction log, cached
//! reference data and small keyed documents. Every write has been committed
//! (WAL, `synchronous=FULL`) before the call returns, so a crash between
//! enqueue and acknowledgment never loses a sale.
//!
//! All mutation goes through this type's methods. Queue order is the insert
//! order of the `seq` column, so "list order == replay order" is enforced
//! here and nowhere else.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use tokio::sync::RwLock;

use forgepos_core::{RequestId, TransactionId};

use crate::config::StoreLocation;
use crate::error::OfflineError;
use crate::types::{
    Headers, OutboundRequest, QueuedRequest, StoreStats, TransactionStatus, UnsyncedTransaction,
    timestamp_now,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS queued_requests (
        seq             INTEGER PRIMARY KEY AUTOINCREMENT,
        id              TEXT NOT NULL UNIQUE,
        url             TEXT NOT NULL,
        method          TEXT NOT NULL,
        headers         TEXT NOT NULL,
        body            TEXT NULL,
        timestamp       TEXT NOT NULL,
        transaction_id  TEXT NULL,
        attempts        INTEGER NOT NULL DEFAULT 0,
        last_error      TEXT NULL,
        last_attempt_at TEXT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS unsynced_transactions (
        id          TEXT PRIMARY KEY,
        payload     TEXT NOT NULL,
        status      TEXT NOT NULL,
        attempts    INTEGER NOT NULL DEFAULT 0,
        last_error  TEXT NULL,
        created_at  TEXT NOT NULL,
        synced_at   TEXT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_unsynced_transactions_status ON unsynced_transactions (status)",
    r#"
    CREATE TABLE IF NOT EXISTS cached_entities (
        kind       TEXT NOT NULL,
        entity_id  TEXT NOT NULL,
        payload    TEXT NOT NULL,
        cached_at  TEXT NOT NULL,
        PRIMARY KEY (kind, entity_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        key         TEXT PRIMARY KEY,
        value       BLOB NOT NULL,
        updated_at  TEXT NOT NULL
    )
    "#,
];

/// SQLite-backed offline store.
///
/// Cheap to clone; clones share one connection pool. Operations on a store
/// that was never initialized (or was disposed) fail with
/// [`OfflineError::StorageUnavailable`].
#[derive(Debug, Clone)]
pub struct OfflineStore {
    location: StoreLocation,
    pool: Arc<RwLock<Option<SqlitePool>>>,
}

impl OfflineStore {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            pool: Arc::new(RwLock::new(None)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::InMemory)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Open (creating if needed) the database and apply the schema.
    ///
    /// Idempotent. Transactions left in `syncing` by a crash mid-cycle are
    /// moved back to `pending`.
    pub async fn initialize(&self) -> Result<(), OfflineError> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let pool = open_pool(&self.location).await.map_err(|err| {
            tracing::error!(location = ?self.location, "failed to open offline store: {err:#}");
            OfflineError::StorageUnavailable(format!("{err:#}"))
        })?;

        let recovered = sqlx::query(
            "UPDATE unsynced_transactions SET status = 'pending' WHERE status = 'syncing'",
        )
        .execute(&pool)
        .await?
        .rows_affected();
        if recovered > 0 {
            tracing::warn!(recovered, "reset transactions interrupted mid-sync to pending");
        }

        *guard = Some(pool);
        tracing::info!(location = ?self.location, "offline store initialized");
        Ok(())
    }

    /// Close the pool. Later calls fail with `StorageUnavailable` until
    /// `initialize()` is called again.
    pub async fn dispose(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!("offline store closed");
        }
    }

    pub async fn is_available(&self) -> bool {
        self.pool.read().await.is_some()
    }

    pub(crate) async fn pool(&self) -> Result<SqlitePool, OfflineError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| OfflineError::StorageUnavailable("offline store is not initialized".into()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Request queue
    // ─────────────────────────────────────────────────────────────────────

    /// Append a request to the queue and return its id.
    pub async fn enqueue(&self, request: &OutboundRequest) -> Result<RequestId, OfflineError> {
        self.insert_queued(request, None).await.map(|q| q.id)
    }

    /// Append a request that delivers the given local transaction.
    pub async fn enqueue_for_transaction(
        &self,
        request: &OutboundRequest,
        transaction_id: TransactionId,
    ) -> Result<RequestId, OfflineError> {
        self.insert_queued(request, Some(transaction_id))
            .await
            .map(|q| q.id)
    }

    async fn insert_queued(
        &self,
        request: &OutboundRequest,
        transaction_id: Option<TransactionId>,
    ) -> Result<QueuedRequest, OfflineError> {
        let pool = self.pool().await?;

        let queued = QueuedRequest {
            id: RequestId::new(),
            url: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            timestamp: timestamp_now(),
            transaction_id,
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO queued_requests (
                id,
                url,
                method,
                headers,
                body,
                timestamp,
                transaction_id,
                attempts
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
            "#,
        )
        .bind(queued.id.to_string())
        .bind(&queued.url)
        .bind(&queued.method)
        .bind(serde_json::to_string(&queued.headers)?)
        .bind(&queued.body)
        .bind(encode_ts(&queued.timestamp))
        .bind(transaction_id.map(|id| id.to_string()))
        .execute(&pool)
        .await?;

        tracing::debug!(request_id = %queued.id, url = %queued.url, "request enqueued");
        Ok(queued)
    }

    /// Remove a request after successful replay. No-op if absent.
    pub async fn dequeue(&self, id: RequestId) -> Result<(), OfflineError> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM queued_requests WHERE id = ?1")
            .bind(id.to_string())
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// All queued requests, oldest first.
    pub async fn list_queued(&self) -> Result<Vec<QueuedRequest>, OfflineError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, url, method, headers, body, timestamp, transaction_id,
                   attempts, last_error, last_attempt_at
            FROM queued_requests
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&pool)
        .await?;

        rows.iter().map(row_to_queued).collect()
    }

    pub async fn get_queued(&self, id: RequestId) -> Result<Option<QueuedRequest>, OfflineError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            r#"
            SELECT id, url, method, headers, body, timestamp, transaction_id,
                   attempts, last_error, last_attempt_at
            FROM queued_requests
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&pool)
        .await?;

        row.as_ref().map(row_to_queued).transpose()
    }

    /// Count a failed replay against a queued request. The request itself is
    /// left untouched.
    pub async fn record_attempt_failure(
        &self,
        id: RequestId,
        error: &str,
    ) -> Result<(), OfflineError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            UPDATE queued_requests
            SET attempts = attempts + 1,
                last_error = ?2,
                last_attempt_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(error)
        .bind(encode_ts(&timestamp_now()))
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// Manually purge every queued request. Returns how many were removed.
    pub async fn clear_queue(&self) -> Result<u64, OfflineError> {
        let pool = self.pool().await?;
        let removed = sqlx::query("DELETE FROM queued_requests")
            .execute(&pool)
            .await?
            .rows_affected();
        tracing::warn!(removed, "request queue cleared");
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Unsynced transaction log
    // ─────────────────────────────────────────────────────────────────────

    pub async fn record_unsynced_transaction(
        &self,
        tx: &UnsyncedTransaction,
    ) -> Result<(), OfflineError> {
        let pool = self.pool().await?;
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO unsynced_transactions (
                id, payload, status, attempts, last_error, created_at, synced_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(tx.id.to_string())
        .bind(tx.payload.to_string())
        .bind(tx.status.as_str())
        .bind(i64::from(tx.attempts))
        .bind(&tx.last_error)
        .bind(encode_ts(&tx.created_at))
        .bind(tx.synced_at.as_ref().map(encode_ts))
        .execute(&pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(OfflineError::Storage(format!(
                "transaction {} is already recorded",
                tx.id
            )));
        }
        Ok(())
    }

    /// Put a recorded but undelivered transaction back to `pending` with a new
    /// payload, ready for another delivery attempt. Returns `false` if it is
    /// already synced or a queued request still carries it.
    pub async fn reopen_transaction(
        &self,
        id: TransactionId,
        payload: &Value,
    ) -> Result<bool, OfflineError> {
        let pool = self.pool().await?;
        let reopened = sqlx::query(
            r#"
            UPDATE unsynced_transactions
            SET payload = ?2,
                status = 'pending'
            WHERE id = ?1
              AND status != 'synced'
              AND NOT EXISTS (
                  SELECT 1 FROM queued_requests WHERE transaction_id = ?1
              )
            "#,
        )
        .bind(id.to_string())
        .bind(payload.to_string())
        .execute(&pool)
        .await?
        .rows_affected();
        Ok(reopened > 0)
    }

    pub async fn mark_syncing(&self, id: TransactionId) -> Result<(), OfflineError> {
        let pool = self.pool().await?;
        sqlx::query(
            "UPDATE unsynced_transactions SET status = 'syncing' WHERE id = ?1 AND status != 'synced'",
        )
        .bind(id.to_string())
        .execute(&pool)
        .await?;
        Ok(())
    }

    pub async fn mark_synced(&self, id: TransactionId) -> Result<(), OfflineError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            UPDATE unsynced_transactions
            SET status = 'synced',
                synced_at = ?2,
                last_error = NULL
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(encode_ts(&timestamp_now()))
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// Record a failed delivery attempt. The transaction stays unsynced.
    pub async fn mark_failed(&self, id: TransactionId, error: &str) -> Result<(), OfflineError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            UPDATE unsynced_transactions
            SET status = 'failed',
                attempts = attempts + 1,
                last_error = ?2
            WHERE id = ?1
              AND status != 'synced'
            "#,
        )
        .bind(id.to_string())
        .bind(error)
        .execute(&pool)
        .await?;
        Ok(())
    }

    pub async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<UnsyncedTransaction>, OfflineError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            r#"
            SELECT id, payload, status, attempts, last_error, created_at, synced_at
            FROM unsynced_transactions
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&pool)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    /// Every transaction not yet confirmed by the server, oldest first.
    pub async fn list_unsynced_transactions(
        &self,
    ) -> Result<Vec<UnsyncedTransaction>, OfflineError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, payload, status, attempts, last_error, created_at, synced_at
            FROM unsynced_transactions
            WHERE status != 'synced'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    /// Delete synced transactions confirmed more than `older_than` ago.
    pub async fn purge_synced_transactions(
        &self,
        older_than: chrono::Duration,
    ) -> Result<u64, OfflineError> {
        let pool = self.pool().await?;
        let cutoff = encode_ts(&(Utc::now() - older_than));
        let purged = sqlx::query(
            r#"
            DELETE FROM unsynced_transactions
            WHERE status = 'synced'
              AND synced_at IS NOT NULL
              AND synced_at < ?1
            "#,
        )
        .bind(&cutoff)
        .execute(&pool)
        .await?
        .rows_affected();
        Ok(purged)
    }

    /// Live counts. Never cached.
    pub async fn get_stats(&self) -> Result<StoreStats, OfflineError> {
        let pool = self.pool().await?;

        let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_requests")
            .fetch_one(&pool)
            .await?;
        let unsynced: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM unsynced_transactions WHERE status != 'synced'",
        )
        .fetch_one(&pool)
        .await?;

        Ok(StoreStats {
            queued: queued.max(0) as usize,
            unsynced: unsynced.max(0) as usize,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Keyed documents
    // ─────────────────────────────────────────────────────────────────────

    pub async fn put_document(&self, key: &str, value: &[u8]) -> Result<(), OfflineError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO documents (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(encode_ts(&timestamp_now()))
        .execute(&pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, key: &str) -> Result<Option<Vec<u8>>, OfflineError> {
        let pool = self.pool().await?;
        let value: Option<Vec<u8>> = sqlx::query_scalar("SELECT value FROM documents WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await?;
        Ok(value)
    }
}

async fn open_pool(location: &StoreLocation) -> anyhow::Result<SqlitePool> {
    let (options, pool_options) = match location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create offline store directory at {parent:?}"))?;
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Full);
            (options, SqlitePoolOptions::new().max_connections(4))
        }
        // Every connection to `:memory:` is its own database, so pin exactly one.
        StoreLocation::InMemory => {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
            let pool_options = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            (options, pool_options)
        }
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open SQLite offline store at {location:?}"))?;

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .context("failed to apply offline store schema")?;
    }

    Ok(pool)
}

pub(crate) fn encode_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str, column: &str) -> Result<DateTime<Utc>, OfflineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OfflineError::Storage(format!("invalid {column} '{raw}': {e}")))
}

fn decode_opt_ts(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>, OfflineError> {
    raw.map(|s| decode_ts(&s, column)).transpose()
}

fn decode_attempts(raw: i64) -> u32 {
    u32::try_from(raw).unwrap_or(u32::MAX)
}

/// Map a database row into a `QueuedRequest`.
fn row_to_queued(row: &SqliteRow) -> Result<QueuedRequest, OfflineError> {
    let id_str: String = row.try_get("id")?;
    let id = id_str
        .parse::<RequestId>()
        .map_err(|e| OfflineError::Storage(format!("queued_requests.id: {e}")))?;

    let headers_str: String = row.try_get("headers")?;
    let headers: Headers = serde_json::from_str(&headers_str)?;

    let tx_str: Option<String> = row.try_get("transaction_id")?;
    let transaction_id = tx_str
        .map(|s| s.parse::<TransactionId>())
        .transpose()
        .map_err(|e| OfflineError::Storage(format!("queued_requests.transaction_id: {e}")))?;

    let timestamp_str: String = row.try_get("timestamp")?;

    Ok(QueuedRequest {
        id,
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        headers,
        body: row.try_get("body")?,
        timestamp: decode_ts(&timestamp_str, "queued_requests.timestamp")?,
        transaction_id,
        attempts: decode_attempts(row.try_get("attempts")?),
        last_error: row.try_get("last_error")?,
        last_attempt_at: decode_opt_ts(row.try_get("last_attempt_at")?, "queued_requests.last_attempt_at")?,
    })
}

/// Map a database row into an `UnsyncedTransaction`.
fn row_to_transaction(row: &SqliteRow) -> Result<UnsyncedTransaction, OfflineError> {
    let id_str: String = row.try_get("id")?;
    let id = id_str
        .parse::<TransactionId>()
        .map_err(|e| OfflineError::Storage(format!("unsynced_transactions.id: {e}")))?;

    let payload_str: String = row.try_get("payload")?;
    let payload: Value = serde_json::from_str(&payload_str)?;

    let status_str: String = row.try_get("status")?;
    let status = status_str.parse::<TransactionStatus>()?;

    let created_at_str: String = row.try_get("created_at")?;

    Ok(UnsyncedTransaction {
        id,
        payload,
        status,
        attempts: decode_attempts(row.try_get("attempts")?),
        last_error: row.try_get("last_error")?,
        created_at: decode_ts(&created_at_str, "unsynced_transactions.created_at")?,
        synced_at: decode_opt_ts(row.try_get("synced_at")?, "unsynced_transactions.synced_at")?,
    })
}
