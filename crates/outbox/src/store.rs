//! Outbox store trait and its Postgres realization.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use streamcore_core::{Envelope, Error, Result};
use uuid::Uuid;

use crate::entry::{OutboxEntry, OutboxStats, OutboxStatus};

/// Persists outbox entries; implementations live in the same database as
/// the producer's business data so that insert and business write commit
/// atomically in one transaction.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn create_entry(&self, envelope: Envelope, topic: &str, ttl: Option<Duration>) -> Result<OutboxEntry>;

    /// Inserts within the caller's own open transaction: the row becomes
    /// visible only when that transaction commits, and is gone if it rolls
    /// back. This is what `OutboxTransactionContext::commit_events` uses so
    /// staged entries share the business write's atomicity.
    async fn create_entry_in_transaction(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: Envelope,
        topic: &str,
        ttl: Option<Duration>,
    ) -> Result<OutboxEntry>;

    async fn get_entry(&self, id: Uuid) -> Result<Option<OutboxEntry>>;
    async fn update_status(&self, id: Uuid, status: OutboxStatus, error: Option<&str>) -> Result<()>;
    async fn get_pending_entries(&self, limit: i64, tenant: Option<Uuid>) -> Result<Vec<OutboxEntry>>;
    async fn get_failed_entries(&self, limit: i64, max_retries: i32) -> Result<Vec<OutboxEntry>>;
    async fn cleanup_expired(&self) -> Result<u64>;
    async fn get_stats(&self) -> Result<OutboxStats>;
}

/// Postgres-backed outbox store. Schema mirrors `SPEC_FULL.md` §6.2.
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_entries (
                id UUID PRIMARY KEY,
                tenant_id UUID NOT NULL,
                envelope_id UUID UNIQUE NOT NULL,
                topic TEXT NOT NULL,
                envelope_data JSONB NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending','published','failed','expired')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                published_at TIMESTAMPTZ,
                failed_at TIMESTAMPTZ,
                retry_count INT NOT NULL DEFAULT 0,
                last_error TEXT,
                expires_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_status_created ON outbox_entries (status, created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_tenant_status ON outbox_entries (tenant_id, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_expires ON outbox_entries (expires_at) WHERE expires_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry> {
        let status: String = row.try_get("status")?;
        let envelope_data: serde_json::Value = row.try_get("envelope_data")?;
        Ok(OutboxEntry {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            envelope_id: row.try_get("envelope_id")?,
            topic: row.try_get("topic")?,
            envelope_data: serde_json::from_value(envelope_data)?,
            status: match status.as_str() {
                "pending" => OutboxStatus::Pending,
                "published" => OutboxStatus::Published,
                "failed" => OutboxStatus::Failed,
                "expired" => OutboxStatus::Expired,
                other => return Err(Error::integrity(format!("unknown outbox status: {other}"))),
            },
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            failed_at: row.try_get("failed_at")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl PostgresOutboxStore {
    /// Shared insert body; `executor` is either the pool (autocommitting) or
    /// a caller's open transaction (deferred until that transaction commits).
    async fn insert_entry<'e, E>(executor: E, envelope: Envelope, topic: &str, ttl: Option<Duration>) -> Result<OutboxEntry>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let entry = OutboxEntry::new(envelope, topic, ttl);
        let envelope_json = serde_json::to_value(&entry.envelope_data)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_entries
                (id, tenant_id, envelope_id, topic, envelope_data, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.envelope_id)
        .bind(&entry.topic)
        .bind(&envelope_json)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .execute(executor)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::conflict(format!("envelope already in outbox: {}", entry.envelope_id))
            }
            _ => Error::from(e),
        })?;

        Ok(entry)
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn create_entry(&self, envelope: Envelope, topic: &str, ttl: Option<Duration>) -> Result<OutboxEntry> {
        Self::insert_entry(&self.pool, envelope, topic, ttl).await
    }

    async fn create_entry_in_transaction(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: Envelope,
        topic: &str,
        ttl: Option<Duration>,
    ) -> Result<OutboxEntry> {
        Self::insert_entry(&mut **tx, envelope, topic, ttl).await
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<OutboxEntry>> {
        let row = sqlx::query("SELECT * FROM outbox_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn update_status(&self, id: Uuid, status: OutboxStatus, error: Option<&str>) -> Result<()> {
        match status {
            OutboxStatus::Published => {
                sqlx::query(
                    "UPDATE outbox_entries SET status = $1, published_at = now(), last_error = NULL WHERE id = $2",
                )
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            OutboxStatus::Failed => {
                sqlx::query(
                    r#"
                    UPDATE outbox_entries
                    SET status = $1, failed_at = now(), retry_count = retry_count + 1, last_error = $2
                    WHERE id = $3
                    "#,
                )
                .bind(status.as_str())
                .bind(error)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            _ => {
                sqlx::query("UPDATE outbox_entries SET status = $1, last_error = $2 WHERE id = $3")
                    .bind(status.as_str())
                    .bind(error)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    // Both queries below select via a `FOR UPDATE SKIP LOCKED` subquery so
    // that concurrent dispatcher instances never hand out the same row: a
    // row another dispatcher's fetch is mid-statement on is skipped rather
    // than waited for.
    async fn get_pending_entries(&self, limit: i64, tenant: Option<Uuid>) -> Result<Vec<OutboxEntry>> {
        let rows = if let Some(tenant) = tenant {
            sqlx::query(
                r#"
                SELECT * FROM outbox_entries WHERE id IN (
                    SELECT id FROM outbox_entries
                    WHERE status = 'pending' AND tenant_id = $1
                    ORDER BY created_at ASC
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                "#,
            )
            .bind(tenant)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT * FROM outbox_entries WHERE id IN (
                    SELECT id FROM outbox_entries
                    WHERE status = 'pending'
                    ORDER BY created_at ASC
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn get_failed_entries(&self, limit: i64, max_retries: i32) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_entries WHERE id IN (
                SELECT id FROM outbox_entries
                WHERE status = 'failed'
                  AND retry_count < $1
                  AND (expires_at IS NULL OR expires_at > now())
                ORDER BY failed_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let marked = sqlx::query(
            "UPDATE outbox_entries SET status = 'expired' WHERE expires_at IS NOT NULL AND expires_at < now() AND status != 'expired'",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let cutoff = Utc::now() - Duration::days(crate::EXPIRED_ROW_RETENTION_DAYS);
        let deleted = sqlx::query("DELETE FROM outbox_entries WHERE status = 'expired' AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(marked + deleted)
    }

    async fn get_stats(&self) -> Result<OutboxStats> {
        let counts = sqlx::query(
            r#"
            SELECT
                count(*) FILTER (WHERE status = 'pending') AS pending,
                count(*) FILTER (WHERE status = 'published') AS published,
                count(*) FILTER (WHERE status = 'failed') AS failed,
                count(*) FILTER (WHERE status = 'expired') AS expired,
                avg(extract(epoch from (published_at - created_at)) * 1000) FILTER (WHERE published_at IS NOT NULL) AS avg_publish_ms
            FROM outbox_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let top_tenants = sqlx::query(
            r#"
            SELECT tenant_id, count(*) AS pending_count
            FROM outbox_entries
            WHERE status = 'pending'
            GROUP BY tenant_id
            ORDER BY pending_count DESC
            LIMIT 10
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending: counts.try_get("pending")?,
            published: counts.try_get("published")?,
            failed: counts.try_get("failed")?,
            expired: counts.try_get("expired")?,
            avg_publish_latency_ms: counts.try_get("avg_publish_ms").ok(),
            top_pending_tenants: top_tenants
                .iter()
                .map(|r| Ok((r.try_get("tenant_id")?, r.try_get("pending_count")?)))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}
