//! Dedupe record types shared by every `DedupeStore` implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupeStatus {
    Processing,
    Completed,
    Failed,
}

impl DedupeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DedupeStatus {
    type Err = streamcore_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(streamcore_core::Error::integrity(format!(
                "unknown dedupe status: {other}"
            ))),
        }
    }
}

/// One dedupe record, keyed by `<tenant_id>:<consumer_group>:<envelope_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeRecord {
    pub key: String,
    pub envelope_id: Uuid,
    pub tenant_id: Uuid,
    pub consumer_group: String,
    pub status: DedupeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub processing_node: Option<String>,
}

impl DedupeRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.status == DedupeStatus::Failed && self.attempt_count < max_attempts
    }
}

/// Aggregate stats over the dedupe store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupeStats {
    pub total_records: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub expired_records: u64,
}
