//! Per-partition-key ordered event processing.
//!
//! Events that share a partition key are handed to handlers strictly in
//! submission order. Events with different keys may run concurrently across
//! partitions. One dedicated worker task per partition owns that ordering
//! guarantee; nothing else is allowed to touch a partition's queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use streamcore_broker::partitioner::stable_hash;
use streamcore_core::{Envelope, Error, Result};
use telemetry::metrics;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type Handler = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Where an event landed once submitted.
#[derive(Debug, Clone)]
pub struct PartitionAssignment {
    pub partition_key: String,
    pub partition_id: usize,
    pub total_partitions: usize,
    pub sequence: u64,
}

#[derive(Debug, Clone)]
pub struct OrderedConfig {
    pub total_partitions: usize,
    pub queue_depth: usize,
}

impl Default for OrderedConfig {
    fn default() -> Self {
        Self {
            total_partitions: streamcore_core::limits::DEFAULT_ORDERED_PARTITIONS,
            queue_depth: streamcore_core::limits::DEFAULT_ORDERED_QUEUE_DEPTH,
        }
    }
}

struct QueueItem {
    envelope: Envelope,
    sequence: u64,
    handler: Handler,
}

/// Processes events with per-partition-key ordering guarantees.
///
/// Construct with `OrderedProcessor::new`, then call `start` once to spawn
/// the per-partition worker tasks before submitting any events.
pub struct OrderedProcessor {
    config: OrderedConfig,
    senders: Vec<mpsc::Sender<QueueItem>>,
    receivers: Mutex<Vec<Option<mpsc::Receiver<QueueItem>>>>,
    sequences: Vec<AtomicU64>,
    queue_depths: Vec<AtomicU64>,
}

impl OrderedProcessor {
    pub fn new(config: OrderedConfig) -> Arc<Self> {
        let mut senders = Vec::with_capacity(config.total_partitions);
        let mut receivers = Vec::with_capacity(config.total_partitions);
        let mut sequences = Vec::with_capacity(config.total_partitions);
        let mut queue_depths = Vec::with_capacity(config.total_partitions);

        for _ in 0..config.total_partitions {
            let (tx, rx) = mpsc::channel(config.queue_depth);
            senders.push(tx);
            receivers.push(Some(rx));
            sequences.push(AtomicU64::new(0));
            queue_depths.push(AtomicU64::new(0));
        }

        Arc::new(Self {
            config,
            senders,
            receivers: Mutex::new(receivers),
            sequences,
            queue_depths,
        })
    }

    /// Spawns one worker per partition. Calling this twice is a no-op for
    /// partitions whose receiver has already been taken.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        let mut receivers = self.receivers.lock();

        for partition_id in 0..self.config.total_partitions {
            let Some(rx) = receivers[partition_id].take() else {
                continue;
            };
            let processor = self.clone();
            handles.push(tokio::spawn(async move {
                processor.run_partition(partition_id, rx).await;
            }));
        }

        info!(partitions = self.config.total_partitions, "ordered event processor started");
        handles
    }

    async fn run_partition(&self, partition_id: usize, mut rx: mpsc::Receiver<QueueItem>) {
        debug!(partition_id, "partition worker started");

        while let Some(item) = rx.recv().await {
            self.queue_depths[partition_id].fetch_sub(1, Ordering::Relaxed);
            metrics().ordered_queue_depth.dec();

            if let Err(e) = (item.handler)(item.envelope.clone()).await {
                metrics().ordered_handler_errors.inc();
                error!(
                    envelope_id = %item.envelope.id,
                    partition_id,
                    sequence = item.sequence,
                    error = %e,
                    "error processing ordered event; continuing with next event"
                );
            } else {
                debug!(
                    envelope_id = %item.envelope.id,
                    partition_id,
                    sequence = item.sequence,
                    "event processed in order"
                );
            }
        }

        debug!(partition_id, "partition worker stopped");
    }

    /// Resolves a partition for `envelope` and enqueues it for ordered
    /// handling. The returned assignment reflects the sequence number this
    /// event was given within its partition.
    pub async fn submit_event(&self, envelope: Envelope, handler: Handler) -> Result<PartitionAssignment> {
        let partition_key = envelope.partition_key()?;
        let partition_id = stable_hash(&partition_key, self.config.total_partitions as u32) as usize;
        let sequence = self.sequences[partition_id].fetch_add(1, Ordering::SeqCst) + 1;

        let item = QueueItem {
            envelope: envelope.clone(),
            sequence,
            handler,
        };

        self.senders[partition_id]
            .send(item)
            .await
            .map_err(|_| Error::transport(format!("ordered processor partition {partition_id} worker is gone")))?;

        self.queue_depths[partition_id].fetch_add(1, Ordering::Relaxed);
        metrics().ordered_queue_depth.inc();

        debug!(
            envelope_id = %envelope.id,
            partition_id,
            partition_key = %partition_key,
            sequence,
            "event submitted for ordered processing"
        );

        Ok(PartitionAssignment {
            partition_key,
            partition_id,
            total_partitions: self.config.total_partitions,
            sequence,
        })
    }

    /// Current queue depth per partition, for diagnostics.
    pub fn queue_depths(&self) -> Vec<u64> {
        self.queue_depths.iter().map(|d| d.load(Ordering::Relaxed)).collect()
    }

    pub fn total_queued(&self) -> u64 {
        self.queue_depths().iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use uuid::Uuid;

    fn envelope(service_id: &str) -> Envelope {
        let mut data = Map::new();
        data.insert("service_id".to_string(), json!(service_id));
        Envelope::new("svc.activation.requested.v1", Uuid::new_v4(), data)
    }

    #[tokio::test]
    async fn events_with_same_key_process_in_submission_order() {
        let processor = OrderedProcessor::new(OrderedConfig {
            total_partitions: 4,
            queue_depth: 16,
        });
        let _handles = processor.start();

        let order = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = {
            let order = order.clone();
            Arc::new(move |envelope: Envelope| {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().push(envelope.data.get("seq").unwrap().as_u64().unwrap());
                    Ok(())
                }) as HandlerFuture
            })
        };

        for i in 0..20u64 {
            let mut env = envelope("same-service");
            env.data.insert("seq".to_string(), json!(i));
            processor.submit_event(env, handler.clone()).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn handler_failure_does_not_block_subsequent_events() {
        let processor = OrderedProcessor::new(OrderedConfig {
            total_partitions: 1,
            queue_depth: 16,
        });
        let _handles = processor.start();

        let processed = Arc::new(AtomicU32::new(0));
        let handler: Handler = {
            let processed = processed.clone();
            Arc::new(move |envelope: Envelope| {
                let processed = processed.clone();
                Box::pin(async move {
                    if envelope.data.get("fail").is_some() {
                        return Err(Error::validation("boom"));
                    }
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as HandlerFuture
            })
        };

        let mut failing = envelope("svc-a");
        failing.data.insert("fail".to_string(), json!(true));
        processor.submit_event(failing, handler.clone()).await.unwrap();
        processor.submit_event(envelope("svc-a"), handler.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_hash_to_partitions_within_range() {
        let processor = OrderedProcessor::new(OrderedConfig {
            total_partitions: 8,
            queue_depth: 16,
        });
        let _handles = processor.start();

        let handler: Handler = Arc::new(|_| Box::pin(async { Ok(()) }) as HandlerFuture);
        let assignment = processor.submit_event(envelope("svc-b"), handler).await.unwrap();
        assert!(assignment.partition_id < 8);
        assert_eq!(assignment.sequence, 1);
    }
}
