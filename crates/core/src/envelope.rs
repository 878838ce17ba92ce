//! The event envelope: the single data shape that flows through every
//! broker adapter, the outbox, the dedupe store, and the ordered processor.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};

/// Event type segments are lowercase alphanumeric with underscores, dotted,
/// ending in a `.v<N>` version suffix: `domain.entity.event.v1`.
static EVENT_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)*\.v[0-9]+$").expect("static pattern is valid")
});

/// Event types in these namespaces carry no partition key; they fall back to
/// `envelope.id` so load spreads evenly across partitions.
const PARTITION_EXEMPT_PREFIXES: &[&str] = &["system.", "admin.", "health.", "monitoring.", "audit."];

/// Priority order for locating a partition key inside `data` when the
/// producer did not set one explicitly.
const PARTITION_KEY_FIELDS: &[&str] = &[
    "service_id",
    "device_id",
    "customer_id",
    "site_id",
    "workflow_id",
    "user_id",
];

/// An immutable unit of data flowing through the streaming core.
///
/// Envelopes are never mutated once created by the producer; a broker may
/// attach delivery metadata (offset, partition, broker timestamp) alongside
/// one, but never inside it.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Envelope {
    /// Globally unique event identifier.
    pub id: Uuid,

    /// Dotted event type, e.g. `svc.activation.requested.v1`.
    #[validate(custom(function = "validate_event_type"))]
    pub r#type: String,

    /// Envelope-schema version, independent of the event type's own version.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Owning tenant.
    pub tenant_id: Uuid,

    /// When the event happened at the producer, in UTC.
    pub occurred_at: DateTime<Utc>,

    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,

    /// Free-form data-schema version, distinct from `schema_version` and from
    /// the `.v<N>` suffix on `type`.
    #[serde(default)]
    pub version: Option<String>,

    /// Event payload. Must carry a partition key unless the event type is
    /// partition-exempt (see `PARTITION_EXEMPT_PREFIXES`).
    pub data: Map<String, Value>,
}

fn default_schema_version() -> String {
    "1".to_string()
}

fn validate_event_type(value: &str) -> std::result::Result<(), validator::ValidationError> {
    if EVENT_TYPE_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_event_type"))
    }
}

impl Envelope {
    /// Builds a new envelope, assigning a fresh id and `occurred_at = now`.
    pub fn new(event_type: impl Into<String>, tenant_id: Uuid, data: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            r#type: event_type.into(),
            schema_version: default_schema_version(),
            tenant_id,
            occurred_at: Utc::now(),
            trace_id: None,
            correlation_id: None,
            causation_id: None,
            source: None,
            version: None,
            data,
        }
    }

    /// Validates structural invariants not expressible via `validator`
    /// attributes alone: that `type` matches the dotted pattern and that a
    /// partition key is resolvable.
    pub fn validate_invariants(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::validation(format!("envelope failed validation: {e}")))?;
        self.partition_key()?;
        Ok(())
    }

    /// True if this event type carries no partition key by design.
    pub fn is_partition_exempt(&self) -> bool {
        is_partition_exempt(&self.r#type)
    }

    /// The physical topic name this envelope belongs on:
    /// `tenant-<tenant_id>.<type-without-version>`.
    pub fn topic(&self) -> String {
        topic_for(self.tenant_id, &self.r#type)
    }

    /// Resolves the partition key per the priority order: explicit
    /// `data.partition_key`, then the first present of `PARTITION_KEY_FIELDS`,
    /// then (for exempt event types) the envelope id, then the tenant id as a
    /// last resort for exempt types whose data has no candidate field either.
    pub fn partition_key(&self) -> Result<String> {
        if let Some(Value::String(s)) = self.data.get("partition_key") {
            if !s.is_empty() {
                return Ok(s.clone());
            }
        }

        for field in PARTITION_KEY_FIELDS {
            if let Some(Value::String(s)) = self.data.get(*field) {
                if !s.is_empty() {
                    return Ok(s.clone());
                }
            }
        }

        if self.is_partition_exempt() {
            return Ok(self.id.to_string());
        }

        Err(Error::validation(format!(
            "event type {} requires a partition key in data",
            self.r#type
        )))
    }
}

/// True if `event_type` falls in one of the partition-exempt namespaces.
pub fn is_partition_exempt(event_type: &str) -> bool {
    PARTITION_EXEMPT_PREFIXES
        .iter()
        .any(|prefix| event_type.starts_with(prefix))
}

/// The topic name without the `.v<N>` suffix: `svc.activation.requested.v1`
/// becomes `svc.activation.requested`.
pub fn strip_version_suffix(event_type: &str) -> &str {
    match event_type.rfind(".v") {
        Some(idx) if event_type[idx + 2..].chars().all(|c| c.is_ascii_digit()) && event_type.len() > idx + 2 => {
            &event_type[..idx]
        }
        _ => event_type,
    }
}

/// Physical topic name for a tenant and event type.
pub fn topic_for(tenant_id: Uuid, event_type: &str) -> String {
    format!("tenant-{tenant_id}.{}", strip_version_suffix(event_type))
}

/// Delivery metadata the broker attaches to a published or consumed
/// envelope. Never folded into the envelope itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: String,
    pub broker_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(fields: &[(&str, &str)]) -> Map<String, Value> {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn partition_key_prefers_explicit_field() {
        let env = Envelope::new(
            "svc.activation.requested.v1",
            Uuid::new_v4(),
            data(&[("partition_key", "explicit"), ("service_id", "S1")]),
        );
        assert_eq!(env.partition_key().unwrap(), "explicit");
    }

    #[test]
    fn partition_key_falls_back_through_priority_list() {
        let env = Envelope::new(
            "svc.activation.requested.v1",
            Uuid::new_v4(),
            data(&[("customer_id", "C1")]),
        );
        assert_eq!(env.partition_key().unwrap(), "C1");
    }

    #[test]
    fn missing_partition_key_is_an_error_for_non_exempt_types() {
        let env = Envelope::new("svc.activation.requested.v1", Uuid::new_v4(), data(&[]));
        assert!(env.partition_key().is_err());
    }

    #[test]
    fn exempt_event_uses_envelope_id_as_partition_key() {
        let env = Envelope::new("system.heartbeat.v1", Uuid::new_v4(), data(&[]));
        assert_eq!(env.partition_key().unwrap(), env.id.to_string());
    }

    #[test]
    fn exempt_prefixes_cover_original_and_supplemental_namespaces() {
        for prefix in ["system.", "admin.", "health.", "monitoring.", "audit."] {
            assert!(is_partition_exempt(&format!("{prefix}thing.v1")));
        }
        assert!(!is_partition_exempt("svc.activation.requested.v1"));
    }

    #[test]
    fn topic_strips_version_suffix_and_namespaces_by_tenant() {
        let tenant = Uuid::new_v4();
        assert_eq!(
            topic_for(tenant, "svc.activation.requested.v1"),
            format!("tenant-{tenant}.svc.activation.requested")
        );
    }

    #[test]
    fn event_type_pattern_rejects_malformed_types() {
        let tenant = Uuid::new_v4();
        let mut env = Envelope::new("not-a-valid-type", tenant, data(&[("service_id", "S1")]));
        env.tenant_id = tenant;
        assert!(env.validate_invariants().is_err());
    }
}
