//! Tenant-scoped authorization for publish and consume operations.

use std::collections::HashMap;

use streamcore_core::Envelope;
use tracing::warn;

use crate::identity::{ProducerIdentity, ProducerRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationResult {
    Allowed,
    Denied,
    Forbidden,
}

struct TopicPolicy {
    required_roles: Vec<ProducerRole>,
}

struct TenantPolicy {
    allowed_topics: Vec<String>,
    denied_topics: Vec<String>,
}

/// Applies topic and tenant policies on top of a `ProducerIdentity`'s own
/// role-based permissions.
#[derive(Default)]
pub struct TenantAuthorizer {
    topic_policies: HashMap<String, TopicPolicy>,
    tenant_policies: HashMap<String, TenantPolicy>,
    cross_tenant_allowed: bool,
}

impl TenantAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_topic_policy(&mut self, topic_pattern: impl Into<String>, required_roles: Vec<ProducerRole>) {
        self.topic_policies
            .insert(topic_pattern.into(), TopicPolicy { required_roles });
    }

    pub fn add_tenant_policy(
        &mut self,
        tenant_id: impl Into<String>,
        allowed_topics: Vec<String>,
        denied_topics: Vec<String>,
    ) {
        self.tenant_policies.insert(
            tenant_id.into(),
            TenantPolicy {
                allowed_topics,
                denied_topics,
            },
        );
    }

    pub fn set_cross_tenant_allowed(&mut self, allowed: bool) {
        self.cross_tenant_allowed = allowed;
    }

    pub fn authorize_publish(&self, identity: &ProducerIdentity, envelope: &Envelope) -> AuthorizationResult {
        if identity.is_expired() {
            warn!(producer_id = %identity.producer_id, "expired producer identity");
            return AuthorizationResult::Forbidden;
        }

        if !self.check_tenant_isolation(identity, &envelope.tenant_id.to_string()) {
            warn!(
                producer_tenant = %identity.tenant_id,
                event_tenant = %envelope.tenant_id,
                producer_id = %identity.producer_id,
                "cross-tenant access denied"
            );
            return AuthorizationResult::Forbidden;
        }

        // Role/pattern checks operate on the bare dotted event type
        // (`svc.billing.invoice_created.v1`), not the tenant-prefixed
        // physical topic (`tenant-<uuid>.svc.billing.invoice_created`) —
        // every `topic_policies` pattern and `can_publish_to_topic` prefix
        // is written in terms of the former.
        let event_type = &envelope.r#type;

        if !self.check_topic_authorization(identity, event_type, Operation::Publish) {
            warn!(producer_id = %identity.producer_id, event_type = %event_type, "topic publish access denied");
            return AuthorizationResult::Denied;
        }

        if !self.check_tenant_policies(identity, event_type) {
            warn!(producer_id = %identity.producer_id, tenant_id = %identity.tenant_id, event_type = %event_type, "tenant policy denied publish");
            return AuthorizationResult::Denied;
        }

        AuthorizationResult::Allowed
    }

    pub fn authorize_consume(&self, identity: &ProducerIdentity, topic: &str) -> AuthorizationResult {
        if identity.is_expired() {
            warn!(producer_id = %identity.producer_id, "expired producer identity");
            return AuthorizationResult::Forbidden;
        }

        if !self.check_topic_authorization(identity, topic, Operation::Consume) {
            warn!(producer_id = %identity.producer_id, topic = %topic, "topic consume access denied");
            return AuthorizationResult::Denied;
        }

        if !self.check_tenant_policies(identity, topic) {
            warn!(producer_id = %identity.producer_id, tenant_id = %identity.tenant_id, topic = %topic, "tenant policy denied consume");
            return AuthorizationResult::Denied;
        }

        AuthorizationResult::Allowed
    }

    fn check_tenant_isolation(&self, identity: &ProducerIdentity, event_tenant_id: &str) -> bool {
        if identity.role == ProducerRole::System {
            return self.cross_tenant_allowed || identity.tenant_id == event_tenant_id;
        }
        identity.tenant_id == event_tenant_id
    }

    fn check_topic_authorization(&self, identity: &ProducerIdentity, topic: &str, op: Operation) -> bool {
        let role_allows = match op {
            Operation::Publish => identity.can_publish_to_topic(topic),
            Operation::Consume => identity.can_consume_from_topic(topic),
        };
        if !role_allows {
            return false;
        }

        for (pattern, policy) in &self.topic_policies {
            if Self::topic_matches_pattern(topic, pattern)
                && !policy.required_roles.is_empty()
                && !policy.required_roles.contains(&identity.role)
            {
                return false;
            }
        }
        true
    }

    fn check_tenant_policies(&self, identity: &ProducerIdentity, topic: &str) -> bool {
        let Some(policy) = self.tenant_policies.get(&identity.tenant_id) else {
            return true;
        };

        if policy
            .denied_topics
            .iter()
            .any(|pattern| Self::topic_matches_pattern(topic, pattern))
        {
            return false;
        }

        if !policy.allowed_topics.is_empty() {
            return policy
                .allowed_topics
                .iter()
                .any(|pattern| Self::topic_matches_pattern(topic, pattern));
        }

        true
    }

    fn topic_matches_pattern(topic: &str, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return topic.starts_with(prefix);
        }
        topic == pattern
    }
}

enum Operation {
    Publish,
    Consume,
}

/// Default policy set: system events require admin/system, admin events
/// require admin, and service-namespaced events allow service/admin/system.
pub fn create_default_authorizer() -> TenantAuthorizer {
    let mut authorizer = TenantAuthorizer::new();
    authorizer.add_topic_policy("system.*", vec![ProducerRole::Admin, ProducerRole::System]);
    authorizer.add_topic_policy("admin.*", vec![ProducerRole::Admin]);
    authorizer.add_topic_policy(
        "svc.*",
        vec![ProducerRole::Service, ProducerRole::Admin, ProducerRole::System],
    );
    authorizer.add_topic_policy(
        "prov.*",
        vec![ProducerRole::Service, ProducerRole::Admin, ProducerRole::System],
    );
    authorizer.add_topic_policy(
        "ops.*",
        vec![ProducerRole::Service, ProducerRole::Admin, ProducerRole::System],
    );
    authorizer.set_cross_tenant_allowed(false);
    authorizer
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn identity(tenant_id: &str, role: ProducerRole) -> ProducerIdentity {
        ProducerIdentity {
            producer_id: "p1".to_string(),
            tenant_id: tenant_id.to_string(),
            role,
            service_name: Some("billing".to_string()),
            user_id: None,
            permissions: BTreeSet::new(),
            expires_at: None,
        }
    }

    fn envelope(tenant_id: Uuid) -> Envelope {
        let mut data = Map::new();
        data.insert("service_id".to_string(), json!("S1"));
        Envelope::new("svc.billing.invoice_created.v1", tenant_id, data)
    }

    #[test]
    fn cross_tenant_publish_is_forbidden() {
        let authorizer = create_default_authorizer();
        let tenant = Uuid::new_v4();
        let env = envelope(tenant);
        let identity = identity(&Uuid::new_v4().to_string(), ProducerRole::Service);
        assert_eq!(authorizer.authorize_publish(&identity, &env), AuthorizationResult::Forbidden);
    }

    #[test]
    fn same_tenant_service_publish_is_allowed() {
        let authorizer = create_default_authorizer();
        let tenant = Uuid::new_v4();
        let env = envelope(tenant);
        let identity = identity(&tenant.to_string(), ProducerRole::Service);
        assert_eq!(authorizer.authorize_publish(&identity, &env), AuthorizationResult::Allowed);
    }

    #[test]
    fn system_topic_denied_to_service_role() {
        let authorizer = create_default_authorizer();
        let identity = identity("T1", ProducerRole::Service);
        assert_eq!(
            authorizer.authorize_consume(&identity, "system.heartbeat"),
            AuthorizationResult::Denied
        );
    }

    #[test]
    fn tenant_deny_list_overrides_role_allow() {
        let mut authorizer = create_default_authorizer();
        let tenant = Uuid::new_v4();
        authorizer.add_tenant_policy(tenant.to_string(), vec![], vec!["svc.billing.*".to_string()]);
        let env = envelope(tenant);
        let identity = identity(&tenant.to_string(), ProducerRole::Service);
        assert_eq!(authorizer.authorize_publish(&identity, &env), AuthorizationResult::Denied);
    }
}
