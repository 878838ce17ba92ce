//! Outbox entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamcore_core::Envelope;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
    Expired,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

/// A single row in the outbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub envelope_id: Uuid,
    pub topic: String,
    pub envelope_data: Envelope,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn new(envelope: Envelope, topic: impl Into<String>, ttl: Option<chrono::Duration>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: envelope.tenant_id,
            envelope_id: envelope.id,
            topic: topic.into(),
            envelope_data: envelope,
            status: OutboxStatus::Pending,
            created_at: now,
            published_at: None,
            failed_at: None,
            retry_count: 0,
            last_error: None,
            expires_at: ttl.map(|d| now + d),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp < Utc::now())
    }

    pub fn can_retry(&self, max_retries: i32) -> bool {
        self.status == OutboxStatus::Failed && self.retry_count < max_retries && !self.is_expired()
    }
}

/// Aggregate stats over the outbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: i64,
    pub published: i64,
    pub failed: i64,
    pub expired: i64,
    pub avg_publish_latency_ms: Option<f64>,
    pub top_pending_tenants: Vec<(Uuid, i64)>,
}
