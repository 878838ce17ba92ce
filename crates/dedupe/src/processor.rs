//! Exactly-once event processing on top of a `DedupeStore`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use streamcore_core::{Envelope, Result};
use telemetry::metrics;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::record::{DedupeRecord, DedupeStatus};
use crate::store::DedupeStore;

/// Configuration for an `ExactlyOnceProcessor`.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub consumer_group: String,
    pub ttl: Duration,
    pub max_attempts: u32,
    pub cleanup_interval: StdDuration,
}

impl ProcessorConfig {
    pub fn new(consumer_group: impl Into<String>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
            ttl: Duration::seconds(streamcore_core::limits::DEFAULT_DEDUPE_TTL_SECS as i64),
            max_attempts: streamcore_core::limits::DEFAULT_DEDUPE_MAX_ATTEMPTS,
            cleanup_interval: StdDuration::from_secs(streamcore_core::limits::DEDUPE_CLEANUP_INTERVAL_SECS),
        }
    }
}

/// Guards handler invocation so that each envelope is processed exactly once
/// per consumer group, even under redelivery.
pub struct ExactlyOnceProcessor {
    store: Arc<dyn DedupeStore>,
    config: ProcessorConfig,
    processing_node: String,
}

impl ExactlyOnceProcessor {
    pub fn new(store: Arc<dyn DedupeStore>, config: ProcessorConfig) -> Self {
        Self {
            store,
            config,
            processing_node: format!("node-{}", Uuid::new_v4()),
        }
    }

    fn dedupe_key(&self, envelope: &Envelope) -> String {
        format!("{}:{}:{}", envelope.tenant_id, self.config.consumer_group, envelope.id)
    }

    /// Decides whether `envelope` should be handed to a handler. Store
    /// errors fail open — processing proceeds rather than silently dropping
    /// an event because the dedupe backend is unavailable.
    pub async fn should_process(&self, envelope: &Envelope) -> (bool, Option<DedupeRecord>) {
        let key = self.dedupe_key(envelope);

        let existing = match self.store.get_record(&key).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(envelope_id = %envelope.id, error = %e, "error checking dedupe status, allowing processing");
                metrics().dedupe_store_errors.inc();
                return (true, None);
            }
        };

        let Some(existing) = existing else {
            return match self.create_record(&key, envelope).await {
                Ok(record) => (true, Some(record)),
                Err(e) => {
                    error!(envelope_id = %envelope.id, error = %e, "failed to create dedupe record, allowing processing");
                    metrics().dedupe_store_errors.inc();
                    (true, None)
                }
            };
        };

        if existing.is_expired() {
            info!(envelope_id = %envelope.id, key = %key, "dedupe record expired, allowing reprocessing");
            return match self.create_record(&key, envelope).await {
                Ok(record) => (true, Some(record)),
                Err(e) => {
                    error!(envelope_id = %envelope.id, error = %e, "failed to recreate dedupe record, allowing processing");
                    metrics().dedupe_store_errors.inc();
                    (true, None)
                }
            };
        }

        match existing.status {
            DedupeStatus::Completed => {
                debug!(envelope_id = %envelope.id, key = %key, "event already processed");
                metrics().dedupe_skipped.inc();
                (false, Some(existing))
            }
            DedupeStatus::Processing => {
                debug!(envelope_id = %envelope.id, key = %key, "event currently being processed");
                metrics().dedupe_skipped.inc();
                (false, Some(existing))
            }
            DedupeStatus::Failed if existing.can_retry(self.config.max_attempts) => {
                info!(
                    envelope_id = %envelope.id,
                    key = %key,
                    attempt = existing.attempt_count + 1,
                    "retrying failed event"
                );
                if let Err(e) = self
                    .store
                    .update_status(&key, DedupeStatus::Processing, None, Some(&self.processing_node))
                    .await
                {
                    error!(envelope_id = %envelope.id, error = %e, "failed to mark dedupe record processing");
                }
                (true, Some(existing))
            }
            DedupeStatus::Failed => {
                warn!(
                    envelope_id = %envelope.id,
                    key = %key,
                    attempts = existing.attempt_count,
                    "event exceeded max retry attempts"
                );
                metrics().dedupe_poison.inc();
                (false, Some(existing))
            }
        }
    }

    async fn create_record(&self, key: &str, envelope: &Envelope) -> Result<DedupeRecord> {
        self.store
            .create_record(
                key,
                envelope.id,
                envelope.tenant_id,
                &self.config.consumer_group,
                self.config.ttl,
            )
            .await
    }

    pub async fn mark_completed(&self, envelope: &Envelope) -> bool {
        let key = self.dedupe_key(envelope);
        match self
            .store
            .update_status(&key, DedupeStatus::Completed, None, Some(&self.processing_node))
            .await
        {
            Ok(success) => {
                if success {
                    metrics().dedupe_processed.inc();
                } else {
                    warn!(envelope_id = %envelope.id, "failed to mark event completed: record not found");
                }
                success
            }
            Err(e) => {
                error!(envelope_id = %envelope.id, error = %e, "error marking event completed");
                metrics().dedupe_store_errors.inc();
                false
            }
        }
    }

    pub async fn mark_failed(&self, envelope: &Envelope, error: &str) -> bool {
        let key = self.dedupe_key(envelope);
        match self
            .store
            .update_status(&key, DedupeStatus::Failed, Some(error), Some(&self.processing_node))
            .await
        {
            Ok(success) => success,
            Err(e) => {
                error!(envelope_id = %envelope.id, error = %e, "error marking event failed");
                metrics().dedupe_store_errors.inc();
                false
            }
        }
    }

    /// Wraps a fallible handler with exactly-once semantics: skips
    /// duplicates, marks completion or failure around the handler call.
    pub async fn wrap<F, Fut>(&self, envelope: &Envelope, handler: F) -> Result<ProcessOutcome>
    where
        F: FnOnce(Envelope) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let (should_process, record) = self.should_process(envelope).await;
        if !should_process {
            let poisoned = record
                .as_ref()
                .is_some_and(|r| r.status == DedupeStatus::Failed && !r.can_retry(self.config.max_attempts));
            if poisoned {
                warn!(envelope_id = %envelope.id, "skipping poisoned event: exceeded max retry attempts");
                return Ok(ProcessOutcome::Poison);
            }
            debug!(envelope_id = %envelope.id, "skipping duplicate event");
            return Ok(ProcessOutcome::Duplicate);
        }

        match handler(envelope.clone()).await {
            Ok(()) => {
                self.mark_completed(envelope).await;
                Ok(ProcessOutcome::Completed)
            }
            Err(e) => {
                self.mark_failed(envelope, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Spawns the background cleanup loop. Log-and-continue: a single failed
    /// pass never stops the loop.
    pub fn start_cleanup_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleanup_interval);
            loop {
                ticker.tick().await;
                match self.store.cleanup_expired().await {
                    Ok(count) if count > 0 => debug!(count = count, "dedupe cleanup removed stale records"),
                    Ok(_) => {}
                    Err(e) => error!("dedupe cleanup loop error: {}", e),
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Duplicate,
    /// Dead-lettered: the event has already failed `max_attempts` times and
    /// will not be retried. Distinct from an ordinary duplicate so callers
    /// can route it to a dead-letter path instead of silently dropping it.
    Poison,
}
