//! Dedupe store trait and its Redis realization.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use streamcore_core::{Error, Result};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::record::{DedupeRecord, DedupeStats, DedupeStatus};

/// Persists dedupe records for the exactly-once processor. A store error
/// must never be allowed to silently look like "no record" to a caller —
/// callers that want fail-open behavior decide that themselves.
#[async_trait]
pub trait DedupeStore: Send + Sync {
    async fn get_record(&self, key: &str) -> Result<Option<DedupeRecord>>;

    async fn create_record(
        &self,
        key: &str,
        envelope_id: Uuid,
        tenant_id: Uuid,
        consumer_group: &str,
        ttl: Duration,
    ) -> Result<DedupeRecord>;

    async fn update_status(
        &self,
        key: &str,
        status: DedupeStatus,
        error: Option<&str>,
        processing_node: Option<&str>,
    ) -> Result<bool>;

    async fn cleanup_expired(&self) -> Result<u64>;

    async fn get_stats(&self) -> Result<DedupeStats>;
}

/// Redis-backed dedupe store: one hash per key, `EXPIRE` carries the TTL so
/// Redis itself reaps stale records without a delete pass.
pub struct RedisDedupeStore {
    url: String,
    key_prefix: String,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisDedupeStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_prefix(url, "dedupe:")
    }

    pub fn with_prefix(url: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: key_prefix.into(),
            conn: RwLock::new(None),
        }
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        {
            let guard = self.conn.read().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
        }

        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| Error::transport(format!("invalid redis url: {e}")))?;
        let manager = client.get_connection_manager().await?;

        *self.conn.write().await = Some(manager.clone());
        Ok(manager)
    }

    fn row_to_record(key: &str, data: &HashMap<String, String>) -> Result<DedupeRecord> {
        let get = |field: &str| -> Result<&String> {
            data.get(field)
                .ok_or_else(|| Error::integrity(format!("dedupe record {key} missing field {field}")))
        };

        let parse_time = |s: &str| -> Result<DateTime<Utc>> {
            s.parse()
                .map_err(|e| Error::integrity(format!("bad timestamp in dedupe record {key}: {e}")))
        };

        Ok(DedupeRecord {
            key: key.to_string(),
            envelope_id: get("envelope_id")?
                .parse()
                .map_err(|e| Error::integrity(format!("bad envelope_id in dedupe record {key}: {e}")))?,
            tenant_id: get("tenant_id")?
                .parse()
                .map_err(|e| Error::integrity(format!("bad tenant_id in dedupe record {key}: {e}")))?,
            consumer_group: get("consumer_group")?.clone(),
            status: get("status")?.parse()?,
            created_at: parse_time(get("created_at")?)?,
            updated_at: parse_time(get("updated_at")?)?,
            expires_at: parse_time(get("expires_at")?)?,
            attempt_count: get("attempt_count")?
                .parse()
                .map_err(|e| Error::integrity(format!("bad attempt_count in dedupe record {key}: {e}")))?,
            last_error: data.get("last_error").filter(|s| !s.is_empty()).cloned(),
            processing_node: data.get("processing_node").filter(|s| !s.is_empty()).cloned(),
        })
    }
}

#[async_trait]
impl DedupeStore for RedisDedupeStore {
    async fn get_record(&self, key: &str) -> Result<Option<DedupeRecord>> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection().await?;
        let data: HashMap<String, String> = conn.hgetall(&redis_key).await?;

        if data.is_empty() {
            return Ok(None);
        }
        Self::row_to_record(key, &data).map(Some)
    }

    async fn create_record(
        &self,
        key: &str,
        envelope_id: Uuid,
        tenant_id: Uuid,
        consumer_group: &str,
        ttl: Duration,
    ) -> Result<DedupeRecord> {
        let redis_key = self.make_key(key);
        let now = Utc::now();
        let record = DedupeRecord {
            key: key.to_string(),
            envelope_id,
            tenant_id,
            consumer_group: consumer_group.to_string(),
            status: DedupeStatus::Processing,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            attempt_count: 1,
            last_error: None,
            processing_node: None,
        };

        let mut conn = self.connection().await?;
        let ttl_secs = ttl.num_seconds().max(1) as i64;

        redis::pipe()
            .atomic()
            .hset(&redis_key, "envelope_id", record.envelope_id.to_string())
            .ignore()
            .hset(&redis_key, "tenant_id", record.tenant_id.to_string())
            .ignore()
            .hset(&redis_key, "consumer_group", &record.consumer_group)
            .ignore()
            .hset(&redis_key, "status", record.status.as_str())
            .ignore()
            .hset(&redis_key, "created_at", record.created_at.to_rfc3339())
            .ignore()
            .hset(&redis_key, "updated_at", record.updated_at.to_rfc3339())
            .ignore()
            .hset(&redis_key, "expires_at", record.expires_at.to_rfc3339())
            .ignore()
            .hset(&redis_key, "attempt_count", record.attempt_count)
            .ignore()
            .expire(&redis_key, ttl_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(key = %key, envelope_id = %envelope_id, "created dedupe record");
        Ok(record)
    }

    async fn update_status(
        &self,
        key: &str,
        status: DedupeStatus,
        error: Option<&str>,
        processing_node: Option<&str>,
    ) -> Result<bool> {
        let Some(current) = self.get_record(key).await? else {
            warn!(key = %key, "dedupe record not found for status update");
            return Ok(false);
        };

        let redis_key = self.make_key(key);
        let attempt_count = if status == DedupeStatus::Failed {
            current.attempt_count + 1
        } else {
            current.attempt_count
        };

        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&redis_key, "status", status.as_str())
            .ignore()
            .hset(&redis_key, "updated_at", Utc::now().to_rfc3339())
            .ignore()
            .hset(&redis_key, "attempt_count", attempt_count)
            .ignore();

        if let Some(error) = error {
            pipe.hset(&redis_key, "last_error", error).ignore();
        }
        if let Some(node) = processing_node {
            pipe.hset(&redis_key, "processing_node", node).ignore();
        }

        pipe.query_async::<()>(&mut conn).await?;
        Ok(true)
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut cleaned = 0u64;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in &keys {
                let ttl: i64 = conn.ttl(key).await?;
                // -1 means the key exists with no expiration; a record that
                // slipped past its TTL gets cleaned up explicitly.
                if ttl == -1 {
                    let _: () = conn.del(key).await?;
                    cleaned += 1;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        if cleaned > 0 {
            debug!(count = cleaned, "cleaned up dedupe records with no expiration");
        }
        Ok(cleaned)
    }

    async fn get_stats(&self) -> Result<DedupeStats> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut stats = DedupeStats::default();

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in &keys {
                let data: HashMap<String, String> = conn.hgetall(key).await?;
                if data.is_empty() {
                    continue;
                }
                stats.total_records += 1;
                match data.get("status").map(String::as_str) {
                    Some("processing") => stats.processing += 1,
                    Some("completed") => stats.completed += 1,
                    Some("failed") => stats.failed += 1,
                    _ => {}
                }
                if let Some(expires_at) = data.get("expires_at").and_then(|s| s.parse::<DateTime<Utc>>().ok()) {
                    if expires_at < Utc::now() {
                        stats.expired_records += 1;
                    }
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(stats)
    }
}
