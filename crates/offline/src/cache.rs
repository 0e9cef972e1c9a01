//! Local mirror of server reference data (products, customers).
//!
//! Entries live in the offline store's database and are read-only from the
//! terminal's point of view: they are overwritten on refresh, never edited.

use std::time::Duration;

use serde_json::Value;
use sqlx::Row;

use crate::error::OfflineError;
use crate::store::{OfflineStore, decode_ts, encode_ts};
use crate::transport::Transport;
use crate::types::{CachedEntity, OutboundRequest, timestamp_now};

/// SQLite-backed entity cache sharing the offline store's pool.
#[derive(Debug, Clone)]
pub struct EntityCache {
    store: OfflineStore,
}

impl EntityCache {
    pub fn new(store: OfflineStore) -> Self {
        Self { store }
    }

    /// Insert or overwrite one entity.
    pub async fn cache_entity(
        &self,
        kind: &str,
        id: &str,
        payload: &Value,
    ) -> Result<(), OfflineError> {
        let pool = self.store.pool().await?;

        sqlx::query(
            r#"
            INSERT INTO cached_entities (kind, entity_id, payload, cached_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (kind, entity_id) DO UPDATE SET
                payload = excluded.payload,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(payload.to_string())
        .bind(encode_ts(&timestamp_now()))
        .execute(&pool)
        .await?;

        Ok(())
    }

    /// Get a cached entity if present and not older than `max_age`.
    pub async fn get_entity(
        &self,
        kind: &str,
        id: &str,
        max_age: Option<chrono::Duration>,
    ) -> Result<Option<CachedEntity>, OfflineError> {
        let pool = self.store.pool().await?;

        let row = sqlx::query(
            r#"
            SELECT kind, entity_id, payload, cached_at
            FROM cached_entities
            WHERE kind = ?1
              AND entity_id = ?2
            "#,
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entity = row_to_entity(&row)?;

        if let Some(max_age) = max_age {
            if timestamp_now() - entity.cached_at > max_age {
                tracing::debug!(kind, id, "cached entity is stale");
                return Ok(None);
            }
        }

        Ok(Some(entity))
    }

    pub async fn list_entities(&self, kind: &str) -> Result<Vec<CachedEntity>, OfflineError> {
        let pool = self.store.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT kind, entity_id, payload, cached_at
            FROM cached_entities
            WHERE kind = ?1
            ORDER BY entity_id ASC
            "#,
        )
        .bind(kind)
        .fetch_all(&pool)
        .await?;

        rows.iter().map(row_to_entity).collect()
    }

    pub async fn clear_kind(&self, kind: &str) -> Result<u64, OfflineError> {
        let pool = self.store.pool().await?;
        let removed = sqlx::query("DELETE FROM cached_entities WHERE kind = ?1")
            .bind(kind)
            .execute(&pool)
            .await?
            .rows_affected();
        Ok(removed)
    }

    /// Fetch `/api/{kind}` and upsert every element keyed by its `id` field.
    ///
    /// Accepts either a bare JSON array or an object wrapping it in `data`.
    /// Returns the number of entities cached.
    pub async fn refresh(
        &self,
        transport: &dyn Transport,
        kind: &str,
        timeout: Duration,
    ) -> Result<usize, OfflineError> {
        let request = OutboundRequest::get(format!("/api/{kind}"));
        let response = transport
            .send(&request, timeout)
            .await
            .map_err(|e| OfflineError::ConnectivityFailure(e.to_string()))?;

        if !response.is_success() {
            return Err(OfflineError::ConnectivityFailure(format!(
                "refresh of '{kind}' returned HTTP {}",
                response.status
            )));
        }

        let body: Value = serde_json::from_str(&response.body)?;
        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(OfflineError::Serialization(format!(
                        "refresh of '{kind}': expected an array"
                    )));
                }
            },
            _ => {
                return Err(OfflineError::Serialization(format!(
                    "refresh of '{kind}': expected an array"
                )));
            }
        };

        let mut cached = 0;
        for item in &items {
            let id = match item.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    tracing::warn!(kind, "skipping cached entity without an id");
                    continue;
                }
            };
            self.cache_entity(kind, &id, item).await?;
            cached += 1;
        }

        tracing::info!(kind, cached, "entity cache refreshed");
        Ok(cached)
    }
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<CachedEntity, OfflineError> {
    let payload: String = row.try_get("payload")?;
    let cached_at: String = row.try_get("cached_at")?;
    Ok(CachedEntity {
        kind: row.try_get("kind")?,
        id: row.try_get("entity_id")?,
        payload: serde_json::from_str(&payload)?,
        cached_at: decode_ts(&cached_at, "cached_entities.cached_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    async fn cache() -> EntityCache {
        let store = OfflineStore::in_memory();
        store.initialize().await.unwrap();
        EntityCache::new(store)
    }

    #[tokio::test]
    async fn cached_entity_is_overwritten() {
        let cache = cache().await;
        cache.cache_entity("products", "p1", &json!({"id": "p1", "price": 100})).await.unwrap();
        cache.cache_entity("products", "p1", &json!({"id": "p1", "price": 120})).await.unwrap();

        let entity = cache.get_entity("products", "p1", None).await.unwrap().unwrap();
        assert_eq!(entity.payload["price"], 120);
        assert_eq!(cache.list_entities("products").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_entity_is_hidden_by_max_age() {
        let cache = cache().await;
        cache.cache_entity("customers", "c1", &json!({"id": "c1"})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = cache
            .get_entity("customers", "c1", Some(chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert!(fresh.is_some());

        let stale = cache
            .get_entity("customers", "c1", Some(chrono::Duration::milliseconds(1)))
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn clear_kind_leaves_other_kinds() {
        let cache = cache().await;
        cache.cache_entity("products", "p1", &json!({})).await.unwrap();
        cache.cache_entity("customers", "c1", &json!({})).await.unwrap();

        assert_eq!(cache.clear_kind("products").await.unwrap(), 1);
        assert!(cache.list_entities("products").await.unwrap().is_empty());
        assert_eq!(cache.list_entities("customers").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refresh_upserts_by_id() {
        let cache = cache().await;
        let transport = ScriptedTransport::new();
        transport.respond(
            "/api/products",
            200,
            r#"{"data":[{"id":"p1","name":"Tea"},{"id":2,"name":"Cake"},{"name":"orphan"}]}"#,
        );

        let cached = cache
            .refresh(&transport, "products", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(cached, 2);
        let ids: Vec<String> = cache
            .list_entities("products")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["2".to_string(), "p1".to_string()]);
    }

    #[tokio::test]
    async fn refresh_while_offline_reports_connectivity_failure() {
        let cache = cache().await;
        let transport = ScriptedTransport::new();
        transport.set_offline(true);

        let err = cache
            .refresh(&transport, "products", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::ConnectivityFailure(_)));
    }
}
