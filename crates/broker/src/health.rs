//! Broker health checks, independent of any specific adapter instance.

use crate::adapter::BrokerAdapter;

/// Runs the adapter's own health check and verifies the required topics are
/// reachable (adapters that don't support topic listing are skipped).
pub async fn verify_topics(adapter: &dyn BrokerAdapter, topics: &[&str]) -> Vec<String> {
    match adapter.list_topics().await {
        Ok(existing) => {
            let existing: std::collections::HashSet<_> =
                existing.iter().map(|t| t.name.as_str()).collect();
            topics
                .iter()
                .filter(|t| !existing.contains(*t))
                .map(|t| t.to_string())
                .collect()
        }
        Err(_) => topics.iter().map(|t| t.to_string()).collect(),
    }
}
