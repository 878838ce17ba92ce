//! In-memory broker adapter: a reference/test backend with partitions,
//! consumer groups, and offsets, but no external process.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use streamcore_core::{Envelope, Error, Result};
use tracing::debug;

use crate::adapter::{
    BrokerAdapter, ConsumerGroupInfo, ConsumerRecord, PublishResult, SeekTo, TopicConfigOverrides,
    TopicInfo,
};
use crate::partitioner::stable_hash;

struct StoredMessage {
    offset: i64,
    envelope: Envelope,
    broker_timestamp: chrono::DateTime<Utc>,
}

struct Partition {
    messages: VecDeque<StoredMessage>,
    next_offset: AtomicI64,
    dropped: AtomicU64,
}

impl Partition {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_offset: AtomicI64::new(0),
            dropped: AtomicU64::new(0),
        }
    }
}

struct TopicState {
    partitions: Vec<Partition>,
}

impl TopicState {
    fn new(partition_count: u32) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| Partition::new()).collect(),
        }
    }
}

/// Configuration for the in-memory adapter.
#[derive(Debug, Clone)]
pub struct MemoryBrokerConfig {
    pub default_partitions: u32,
    pub max_messages_per_topic: usize,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            default_partitions: streamcore_core::limits::DEFAULT_TOPIC_PARTITIONS,
            max_messages_per_topic: streamcore_core::limits::DEFAULT_MAX_MESSAGES_PER_TOPIC,
        }
    }
}

/// Broker adapter with no external dependency; used for tests and
/// single-process deployments.
pub struct MemoryBroker {
    config: MemoryBrokerConfig,
    topics: RwLock<HashMap<String, TopicState>>,
    // (group_id, topic, partition) -> last committed offset (next-to-read is committed+1)
    committed: RwLock<HashMap<(String, String, u32), i64>>,
}

impl MemoryBroker {
    pub fn new(config: MemoryBrokerConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
        }
    }

    fn partition_count(&self, topic: &str) -> u32 {
        let topics = self.topics.read();
        topics
            .get(topic)
            .map(|t| t.partitions.len() as u32)
            .unwrap_or(self.config.default_partitions)
    }

    /// Number of messages dropped so far for a topic/partition, for tests.
    pub fn dropped_count(&self, topic: &str, partition: u32) -> u64 {
        let topics = self.topics.read();
        topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition as usize))
            .map(|p| p.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[async_trait]
impl BrokerAdapter for MemoryBroker {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
        partition_key: Option<&str>,
    ) -> Result<PublishResult> {
        let key = match partition_key {
            Some(k) => k.to_string(),
            None => envelope.partition_key()?,
        };

        let partition_count = self.partition_count(topic);
        let partition = stable_hash(&key, partition_count);

        let mut topics = self.topics.write();
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(partition_count));

        let part = &mut state.partitions[partition as usize];
        let offset = part.next_offset.fetch_add(1, Ordering::SeqCst);
        let broker_timestamp = Utc::now();

        part.messages.push_back(StoredMessage {
            offset,
            envelope: envelope.clone(),
            broker_timestamp,
        });

        if part.messages.len() > self.config.max_messages_per_topic {
            part.messages.pop_front();
            part.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %topic, partition = partition, "dropped oldest message, topic at capacity");
        }

        Ok(PublishResult {
            event_id: envelope.id.to_string(),
            partition,
            offset: offset.to_string(),
            broker_timestamp,
        })
    }

    async fn poll(
        &self,
        topics: &[String],
        group_id: &str,
        max_records: usize,
    ) -> Result<Vec<ConsumerRecord>> {
        let mut out = Vec::new();
        let topic_map = self.topics.read();
        let committed = self.committed.read();

        for topic in topics {
            let Some(state) = topic_map.get(topic) else {
                continue;
            };

            for (partition_idx, partition) in state.partitions.iter().enumerate() {
                let partition = partition_idx as u32;
                let committed_offset = committed
                    .get(&(group_id.to_string(), topic.clone(), partition))
                    .copied()
                    .unwrap_or(-1);

                for msg in topic_map[topic].partitions[partition_idx]
                    .messages
                    .iter()
                    .filter(|m| m.offset > committed_offset)
                {
                    if out.len() >= max_records {
                        return Ok(out);
                    }
                    out.push(ConsumerRecord {
                        envelope: msg.envelope.clone(),
                        topic: topic.clone(),
                        partition,
                        offset: msg.offset.to_string(),
                    });
                }
            }
        }

        Ok(out)
    }

    async fn commit_offset(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: &str,
    ) -> Result<()> {
        let offset: i64 = offset
            .parse()
            .map_err(|_| Error::validation(format!("invalid offset: {offset}")))?;
        self.committed.write().insert(
            (group_id.to_string(), topic.to_string(), partition),
            offset,
        );
        Ok(())
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        _replication_factor: u32,
        _overrides: TopicConfigOverrides,
    ) -> Result<()> {
        let mut topics = self.topics.write();
        if topics.contains_key(name) {
            return Err(Error::conflict(format!("topic already exists: {name}")));
        }
        topics.insert(name.to_string(), TopicState::new(partitions));
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let mut topics = self.topics.write();
        if topics.remove(name).is_none() {
            return Err(Error::not_found(format!("topic not found: {name}")));
        }
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<TopicInfo>> {
        let topics = self.topics.read();
        Ok(topics
            .iter()
            .map(|(name, state)| TopicInfo {
                name: name.clone(),
                partitions: state.partitions.len() as u32,
                replication_factor: 1,
            })
            .collect())
    }

    async fn get_topic_info(&self, name: &str) -> Result<TopicInfo> {
        let topics = self.topics.read();
        let state = topics
            .get(name)
            .ok_or_else(|| Error::not_found(format!("topic not found: {name}")))?;
        Ok(TopicInfo {
            name: name.to_string(),
            partitions: state.partitions.len() as u32,
            replication_factor: 1,
        })
    }

    async fn list_consumer_groups(&self) -> Result<Vec<ConsumerGroupInfo>> {
        let committed = self.committed.read();
        let mut groups: Vec<String> = committed.keys().map(|(g, _, _)| g.clone()).collect();
        groups.sort();
        groups.dedup();
        Ok(groups
            .into_iter()
            .map(|group_id| ConsumerGroupInfo {
                group_id,
                members: Vec::new(),
            })
            .collect())
    }

    async fn delete_consumer_group(&self, group_id: &str) -> Result<()> {
        self.committed.write().retain(|(g, _, _), _| g != group_id);
        Ok(())
    }

    async fn get_consumer_group_info(&self, group_id: &str) -> Result<ConsumerGroupInfo> {
        Ok(ConsumerGroupInfo {
            group_id: group_id.to_string(),
            members: Vec::new(),
        })
    }

    async fn seek(
        &self,
        group_id: &str,
        topic: &str,
        partition: Option<u32>,
        to: SeekTo,
    ) -> Result<()> {
        let partition_count = self.partition_count(topic);
        let partitions: Vec<u32> = match partition {
            Some(p) => vec![p],
            None => (0..partition_count).collect(),
        };

        for partition in partitions {
            let offset = match to {
                SeekTo::Beginning => -1,
                SeekTo::End => self.get_latest_offset(topic, partition).await?,
                SeekTo::Offset(o) => o - 1,
            };
            self.committed.write().insert(
                (group_id.to_string(), topic.to_string(), partition),
                offset,
            );
        }
        Ok(())
    }

    async fn get_latest_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        let topics = self.topics.read();
        let state = topics
            .get(topic)
            .ok_or_else(|| Error::not_found(format!("topic not found: {topic}")))?;
        Ok(state
            .partitions
            .get(partition as usize)
            .map(|p| p.next_offset.load(Ordering::SeqCst) - 1)
            .unwrap_or(-1))
    }

    async fn get_earliest_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        let topics = self.topics.read();
        let state = topics
            .get(topic)
            .ok_or_else(|| Error::not_found(format!("topic not found: {topic}")))?;
        Ok(state
            .partitions
            .get(partition as usize)
            .and_then(|p| p.messages.front())
            .map(|m| m.offset)
            .unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(service_id: &str) -> Envelope {
        let mut data = serde_json::Map::new();
        data.insert("service_id".to_string(), json!(service_id));
        Envelope::new("svc.activation.requested.v1", Uuid::new_v4(), data)
    }

    #[tokio::test]
    async fn publish_then_poll_round_trips() {
        let broker = MemoryBroker::new(MemoryBrokerConfig::default());
        let env = envelope("S1");
        broker
            .publish("t1", &env, None)
            .await
            .expect("publish succeeds");

        let records = broker
            .poll(&["t1".to_string()], "g1", 10)
            .await
            .expect("poll succeeds");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].envelope.id, env.id);
    }

    #[tokio::test]
    async fn commit_advances_group_offset_past_consumed_record() {
        let broker = MemoryBroker::new(MemoryBrokerConfig::default());
        let env = envelope("S1");
        broker.publish("t1", &env, None).await.unwrap();

        let records = broker.poll(&["t1".to_string()], "g1", 10).await.unwrap();
        let rec = &records[0];
        broker
            .commit_offset("g1", "t1", rec.partition, &rec.offset)
            .await
            .unwrap();

        let records = broker.poll(&["t1".to_string()], "g1", 10).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn same_partition_key_lands_on_same_partition_in_publish_order() {
        let broker = MemoryBroker::new(MemoryBrokerConfig::default());
        let e1 = envelope("S1");
        let e2 = envelope("S1");
        let r1 = broker.publish("t1", &e1, None).await.unwrap();
        let r2 = broker.publish("t1", &e2, None).await.unwrap();
        assert_eq!(r1.partition, r2.partition);
        assert!(r1.offset.parse::<i64>().unwrap() < r2.offset.parse::<i64>().unwrap());
    }

    #[tokio::test]
    async fn exceeding_max_messages_drops_oldest_and_counts_it() {
        let broker = MemoryBroker::new(MemoryBrokerConfig {
            default_partitions: 1,
            max_messages_per_topic: 2,
        });
        for _ in 0..5 {
            let env = envelope("S1");
            broker.publish("t1", &env, None).await.unwrap();
        }
        assert_eq!(broker.dropped_count("t1", 0), 3);
    }

    #[tokio::test]
    async fn duplicate_topic_creation_is_a_conflict() {
        let broker = MemoryBroker::new(MemoryBrokerConfig::default());
        broker
            .create_topic("t1", 3, 1, TopicConfigOverrides::default())
            .await
            .unwrap();
        let err = broker
            .create_topic("t1", 3, 1, TopicConfigOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
