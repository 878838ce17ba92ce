//! Redis Streams broker adapter: one stream per topic partition, consumer
//! groups via `XREADGROUP`/`XACK`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use streamcore_core::{Envelope, Error, Result};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::adapter::{
    BrokerAdapter, ConsumerGroupInfo, ConsumerRecord, PublishResult, SeekTo, TopicConfigOverrides,
    TopicInfo,
};
use crate::config::RedisStreamConfig;
use crate::partitioner::stable_hash;

fn stream_key(topic: &str, partition: u32) -> String {
    format!("{topic}-{partition}")
}

/// Broker adapter over Redis Streams, emulating partitions as distinct
/// stream keys `<topic>-<partition>`.
pub struct RedisStreamBroker {
    config: RedisStreamConfig,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisStreamBroker {
    pub fn new(config: RedisStreamConfig) -> Self {
        Self {
            config,
            conn: RwLock::new(None),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        {
            let guard = self.conn.read().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
        }

        let client = redis::Client::open(self.config.url.as_str())
            .map_err(|e| Error::transport(format!("invalid redis url: {e}")))?;
        let manager = client.get_connection_manager().await?;

        *self.conn.write().await = Some(manager.clone());
        Ok(manager)
    }

    /// Idempotently ensures the consumer group exists on the stream.
    async fn ensure_group(&self, conn: &mut ConnectionManager, key: &str, group_id: &str) -> Result<()> {
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(key)
            .arg(group_id)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        if let Err(e) = result {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerAdapter for RedisStreamBroker {
    async fn connect(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.conn.write().await = None;
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
        let partition = stable_hash(&key, self.config.default_partitions);
        let stream = stream_key(topic, partition);
        let payload = serde_json::to_string(envelope)?;

        let mut conn = self.connection().await?;
        let id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.stream_maxlen)
            .arg("*")
            .arg("envelope")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        debug!(topic = %topic, partition = partition, id = %id, "published envelope to stream");

        Ok(PublishResult {
            event_id: envelope.id.to_string(),
            partition,
            offset: id,
            broker_timestamp: chrono::Utc::now(),
        })
    }

    async fn poll(
        &self,
        topics: &[String],
        group_id: &str,
        max_records: usize,
    ) -> Result<Vec<ConsumerRecord>> {
        let mut conn = self.connection().await?;
        let mut out = Vec::new();

        for topic in topics {
            for partition in 0..self.config.default_partitions {
                if out.len() >= max_records {
                    return Ok(out);
                }

                let stream = stream_key(topic, partition);
                self.ensure_group(&mut conn, &stream, group_id).await?;

                let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
                    .arg("GROUP")
                    .arg(group_id)
                    .arg("consumer-1")
                    .arg("COUNT")
                    .arg(max_records)
                    .arg("STREAMS")
                    .arg(&stream)
                    .arg(">")
                    .query_async(&mut conn)
                    .await?;

                for stream_key_entry in reply.keys {
                    for id in stream_key_entry.ids {
                        let Some(redis::Value::BulkString(bytes)) = id.map.get("envelope") else {
                            continue;
                        };
                        match serde_json::from_slice::<Envelope>(bytes) {
                            Ok(envelope) => out.push(ConsumerRecord {
                                envelope,
                                topic: topic.clone(),
                                partition,
                                offset: id.id.clone(),
                            }),
                            Err(e) => warn!(id = %id.id, error = %e, "failed to deserialize envelope"),
                        }
                    }
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
        let stream = stream_key(topic, partition);
        let mut conn = self.connection().await?;
        let _: i64 = conn.xack(&stream, group_id, &[offset]).await?;
        Ok(())
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        _replication_factor: u32,
        _overrides: TopicConfigOverrides,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        for partition in 0..partitions {
            let stream = stream_key(name, partition);
            let _: () = redis::cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg("_init")
                .arg("1")
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        for partition in 0..self.config.default_partitions {
            let stream = stream_key(name, partition);
            let _: i64 = conn.del(&stream).await?;
        }
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<TopicInfo>> {
        Err(Error::validation(
            "listing topics is not supported by the redis streams adapter",
        ))
    }

    async fn get_topic_info(&self, name: &str) -> Result<TopicInfo> {
        Ok(TopicInfo {
            name: name.to_string(),
            partitions: self.config.default_partitions,
            replication_factor: 1,
        })
    }

    async fn list_consumer_groups(&self) -> Result<Vec<ConsumerGroupInfo>> {
        Err(Error::validation(
            "listing consumer groups is not supported by the redis streams adapter",
        ))
    }

    async fn delete_consumer_group(&self, _group_id: &str) -> Result<()> {
        Err(Error::validation(
            "group deletion requires a topic; use the per-stream XGROUP DESTROY out of band",
        ))
    }

    async fn get_consumer_group_info(&self, group_id: &str) -> Result<ConsumerGroupInfo> {
        Ok(ConsumerGroupInfo {
            group_id: group_id.to_string(),
            members: Vec::new(),
        })
    }

    async fn seek(
        &self,
        _group_id: &str,
        _topic: &str,
        _partition: Option<u32>,
        _to: SeekTo,
    ) -> Result<()> {
        Err(Error::validation(
            "seek is not supported by the redis streams adapter; recreate the consumer group at the desired id instead",
        ))
    }

    async fn get_latest_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        let stream = stream_key(topic, partition);
        let mut conn = self.connection().await?;
        let len: i64 = conn.xlen(&stream).await?;
        Ok(len)
    }

    async fn get_earliest_offset(&self, _topic: &str, _partition: u32) -> Result<i64> {
        Ok(0)
    }

    async fn health_check(&self) -> bool {
        match self.connection().await {
            Ok(mut conn) => redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok(),
            Err(_) => false,
        }
    }
}
