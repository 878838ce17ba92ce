//! Envelope and identity builders for integration tests.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};
use streamcore_authz::{ProducerIdentity, ProducerRole};
use streamcore_core::Envelope;
use uuid::Uuid;

/// Builds a valid non-exempt envelope carrying `partition_key` in `data`.
pub fn test_envelope(event_type: &str, tenant_id: Uuid, partition_key: &str) -> Envelope {
    let mut data = Map::new();
    data.insert("partition_key".to_string(), json!(partition_key));
    data.insert("payload".to_string(), json!("test"));
    Envelope::new(event_type, tenant_id, data)
}

/// Builds a batch of envelopes sharing one partition key, for ordering tests.
pub fn test_envelopes(event_type: &str, tenant_id: Uuid, partition_key: &str, n: usize) -> Vec<Envelope> {
    (0..n)
        .map(|i| {
            let mut data = Map::new();
            data.insert("partition_key".to_string(), json!(partition_key));
            data.insert("sequence".to_string(), json!(i));
            Envelope::new(event_type, tenant_id, data)
        })
        .collect()
}

/// A service-role identity scoped to `service_name`'s own topic namespace.
pub fn test_identity(tenant_id: &str, service_name: &str) -> ProducerIdentity {
    ProducerIdentity {
        producer_id: format!("service:{service_name}"),
        tenant_id: tenant_id.to_string(),
        role: ProducerRole::Service,
        service_name: Some(service_name.to_string()),
        user_id: None,
        permissions: BTreeSet::new(),
        expires_at: None,
    }
}

pub fn empty_data() -> Map<String, Value> {
    Map::new()
}
