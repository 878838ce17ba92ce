//! The outbox dispatcher: three cooperative background loops that move
//! entries from `pending` to `published`, retry `failed` entries, and
//! expire stale ones.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use streamcore_broker::BrokerAdapter;
use streamcore_core::Envelope;
use telemetry::metrics;
use tracing::{debug, error, warn};

use crate::entry::{OutboxEntry, OutboxStatus};
use crate::store::OutboxStore;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub dispatch_interval: StdDuration,
    pub batch_size: i64,
    pub max_retries: i32,
    pub cleanup_interval: StdDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: StdDuration::from_secs(streamcore_core::limits::DEFAULT_DISPATCH_INTERVAL_SECS),
            batch_size: streamcore_core::limits::DEFAULT_OUTBOX_BATCH_SIZE,
            max_retries: streamcore_core::limits::DEFAULT_OUTBOX_MAX_RETRIES,
            cleanup_interval: StdDuration::from_secs(streamcore_core::limits::DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

/// Runs the dispatch/retry/cleanup loops against a store and a broker. The
/// dispatcher is the sole publisher of outbox-originating envelopes; nothing
/// else in this crate ever calls `BrokerAdapter::publish`.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn BrokerAdapter>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, broker: Arc<dyn BrokerAdapter>, config: DispatcherConfig) -> Self {
        Self { store, broker, config }
    }

    /// Spawns the three background loops. Each loop logs and continues past
    /// its own errors; one loop's failure never stops the others.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.clone().spawn_dispatch_loop(),
            self.clone().spawn_retry_loop(),
            self.spawn_cleanup_loop(),
        ]
    }

    fn spawn_dispatch_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.dispatch_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.dispatch_pending().await {
                    error!("outbox dispatch loop error: {}", e);
                }
            }
        })
    }

    fn spawn_retry_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.dispatch_interval * streamcore_core::limits::RETRY_INTERVAL_MULTIPLE as u32;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.dispatch_failed().await {
                    error!("outbox retry loop error: {}", e);
                }
            }
        })
    }

    fn spawn_cleanup_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleanup_interval);
            loop {
                ticker.tick().await;
                match self.store.cleanup_expired().await {
                    Ok(count) if count > 0 => {
                        metrics().outbox_expired.inc_by(count);
                        debug!(count = count, "cleaned up expired outbox rows");
                    }
                    Ok(_) => {}
                    Err(e) => error!("outbox cleanup loop error: {}", e),
                }
            }
        })
    }

    async fn dispatch_pending(&self) -> streamcore_core::Result<()> {
        let entries = self.store.get_pending_entries(self.config.batch_size, None).await?;
        self.process_entries(entries).await;
        Ok(())
    }

    async fn dispatch_failed(&self) -> streamcore_core::Result<()> {
        let entries = self
            .store
            .get_failed_entries(self.config.batch_size, self.config.max_retries)
            .await?;
        self.process_entries(entries).await;
        Ok(())
    }

    /// One entry's failure does not block the rest of the batch.
    async fn process_entries(&self, entries: Vec<OutboxEntry>) {
        for entry in entries {
            let start = std::time::Instant::now();
            match self.publish_entry(&entry.envelope_data, &entry.topic).await {
                Ok(()) => {
                    if let Err(e) = self.store.update_status(entry.id, OutboxStatus::Published, None).await {
                        error!(entry_id = %entry.id, error = %e, "failed to mark outbox entry published");
                        continue;
                    }
                    metrics().outbox_dispatched.inc();
                    metrics()
                        .outbox_dispatch_latency_ms
                        .observe(start.elapsed().as_millis() as u64);
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "failed to publish outbox entry");
                    metrics().outbox_dispatch_errors.inc();
                    if let Err(update_err) = self
                        .store
                        .update_status(entry.id, OutboxStatus::Failed, Some(&e.to_string()))
                        .await
                    {
                        error!(entry_id = %entry.id, error = %update_err, "failed to mark outbox entry failed");
                    }
                }
            }
        }
    }

    async fn publish_entry(&self, envelope: &Envelope, topic: &str) -> streamcore_core::Result<()> {
        self.broker.publish(topic, envelope, None).await.map(|_| ())
    }

    /// Snapshot used to drive the `outbox_pending`/`outbox_failed` gauges
    /// from an external poll loop (see composition root).
    pub async fn refresh_gauges(&self) -> streamcore_core::Result<()> {
        let stats = self.store.get_stats().await?;
        metrics().outbox_pending.set(stats.pending as u64);
        metrics().outbox_failed.set(stats.failed as u64);
        Ok(())
    }
}
