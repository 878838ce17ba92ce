//! Partitioned-log broker adapter (Kafka-like) built on `rskafka`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rskafka::client::{
    partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling},
    ClientBuilder, Credentials, SaslConfig,
};
use rskafka::record::Record;
use streamcore_core::{Envelope, Error, Result};
use telemetry::metrics;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::adapter::{
    BrokerAdapter, ConsumerGroupInfo, ConsumerRecord, PublishResult, SeekTo, TopicConfigOverrides,
    TopicInfo,
};
use crate::config::KafkaConfig;
use crate::partitioner::stable_hash;

fn create_tls_config() -> Arc<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

fn compression_for(name: &str) -> Compression {
    match name {
        "gzip" => Compression::Gzip,
        "snappy" => Compression::Snappy,
        "lz4" => Compression::Lz4,
        "zstd" => Compression::Zstd,
        _ => Compression::NoCompression,
    }
}

/// Broker adapter over a Kafka-compatible partitioned log.
///
/// Offset commits are tracked process-locally (see `SPEC_FULL.md` §4.3):
/// the generic `BrokerAdapter::commit_offset` interface updates this local
/// table; true consumer-group coordination is delegated to whatever the
/// transport's own group-membership protocol provides when running multiple
/// consumer processes against the same group.
pub struct KafkaBroker {
    config: KafkaConfig,
    clients: RwLock<BTreeMap<(String, u32), Arc<PartitionClient>>>,
    committed: RwLock<HashMap<(String, String, u32), AtomicI64>>,
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(BTreeMap::new()),
            committed: RwLock::new(HashMap::new()),
        }
    }

    async fn get_client(&self, topic: &str, partition: u32) -> Result<Arc<PartitionClient>> {
        let key = (topic.to_string(), partition);
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut builder = ClientBuilder::new(vec![self.config.broker_string()]);
        if let (Some(user), Some(pass)) = (&self.config.sasl_username, &self.config.sasl_password) {
            builder = builder
                .tls_config(create_tls_config())
                .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                    user.clone(),
                    pass.clone(),
                )));
        }

        let client = builder
            .build()
            .await
            .map_err(|e| Error::transport(format!("failed to connect to broker: {e}")))?;

        let partition_client = Arc::new(
            client
                .partition_client(topic.to_string(), partition as i32, UnknownTopicHandling::Error)
                .await
                .map_err(|e| Error::transport(format!("failed to get partition client: {e}")))?,
        );

        self.clients.write().await.insert(key, partition_client.clone());
        Ok(partition_client)
    }

    fn committed_offset(&self, group_id: &str, topic: &str, partition: u32, guard: &HashMap<(String, String, u32), AtomicI64>) -> i64 {
        guard
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .map(|o| o.load(Ordering::SeqCst))
            .unwrap_or(-1)
    }
}

#[async_trait]
impl BrokerAdapter for KafkaBroker {
    async fn connect(&self) -> Result<()> {
        ClientBuilder::new(vec![self.config.broker_string()])
            .build()
            .await
            .map(|_| ())
            .map_err(|e| Error::transport(format!("failed to connect to broker: {e}")))
    }

    async fn disconnect(&self) -> Result<()> {
        self.clients.write().await.clear();
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
        let client = self.get_client(topic, partition).await?;

        let payload = serde_json::to_vec(envelope)?;
        let record = Record {
            key: Some(key.into_bytes()),
            value: Some(payload),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        let start = std::time::Instant::now();
        let offsets = client
            .produce(vec![record], compression_for(&self.config.compression))
            .await
            .map_err(|e| {
                metrics().broker_publish_errors.inc();
                Error::transport(format!("failed to produce: {e}"))
            })?;

        metrics().broker_publish_count.inc();
        metrics()
            .broker_publish_latency_ms
            .observe(start.elapsed().as_millis() as u64);

        let offset = offsets
            .first()
            .copied()
            .ok_or_else(|| Error::transport("produce returned no offsets"))?;

        debug!(topic = %topic, partition = partition, offset = offset, "published envelope");

        Ok(PublishResult {
            event_id: envelope.id.to_string(),
            partition,
            offset: offset.to_string(),
            broker_timestamp: Utc::now(),
        })
    }

    async fn poll(
        &self,
        topics: &[String],
        group_id: &str,
        max_records: usize,
    ) -> Result<Vec<ConsumerRecord>> {
        let mut out = Vec::new();

        for topic in topics {
            for partition in 0..self.config.default_partitions {
                if out.len() >= max_records {
                    return Ok(out);
                }

                let client = self.get_client(topic, partition).await?;

                let current = {
                    let committed = self.committed.read().await;
                    let offset = self.committed_offset(group_id, topic, partition, &committed);
                    if offset < 0 {
                        match self.config.auto_offset_reset.as_str() {
                            "latest" => client
                                .get_offset(OffsetAt::Latest)
                                .await
                                .map_err(|e| Error::transport(format!("failed to get offset: {e}")))?,
                            _ => client
                                .get_offset(OffsetAt::Earliest)
                                .await
                                .map_err(|e| Error::transport(format!("failed to get offset: {e}")))?,
                        }
                    } else {
                        offset + 1
                    }
                };

                let max_bytes = (max_records * 64 * 1024) as i32;
                let (records, _watermark) = client
                    .fetch_records(current, 1..max_bytes, self.config.request_timeout_ms as i32)
                    .await
                    .map_err(|e| {
                        metrics().broker_consume_errors.inc();
                        Error::transport(format!("failed to fetch records: {e}"))
                    })?;

                for record in records {
                    let Some(value) = record.record.value else {
                        continue;
                    };
                    match serde_json::from_slice::<Envelope>(&value) {
                        Ok(envelope) => {
                            metrics().broker_consume_count.inc();
                            out.push(ConsumerRecord {
                                envelope,
                                topic: topic.clone(),
                                partition,
                                offset: record.offset.to_string(),
                            });
                            if out.len() >= max_records {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(offset = record.offset, error = %e, "failed to deserialize envelope");
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
        let offset: i64 = offset
            .parse()
            .map_err(|_| Error::validation(format!("invalid offset: {offset}")))?;
        let mut committed = self.committed.write().await;
        committed
            .entry((group_id.to_string(), topic.to_string(), partition))
            .and_modify(|o| o.store(offset, Ordering::SeqCst))
            .or_insert_with(|| AtomicI64::new(offset));
        Ok(())
    }

    async fn create_topic(
        &self,
        name: &str,
        _partitions: u32,
        _replication_factor: u32,
        _overrides: TopicConfigOverrides,
    ) -> Result<()> {
        // The pure-Rust client used here is producer/consumer-only; topic
        // administration is expected to happen out of band (broker-side
        // auto-create or an operator-run admin tool). Surface readiness via
        // get_topic_info instead of creating it here.
        info!(topic = %name, "create_topic requested; relying on broker auto-create");
        Ok(())
    }

    async fn delete_topic(&self, _name: &str) -> Result<()> {
        Err(Error::validation(
            "topic deletion is not supported by the partitioned-log adapter",
        ))
    }

    async fn list_topics(&self) -> Result<Vec<TopicInfo>> {
        let client = ClientBuilder::new(vec![self.config.broker_string()])
            .build()
            .await
            .map_err(|e| Error::transport(format!("failed to connect to broker: {e}")))?;

        let topics = client
            .list_topics()
            .await
            .map_err(|e| Error::transport(format!("failed to list topics: {e}")))?;

        Ok(topics
            .into_iter()
            .map(|t| TopicInfo {
                name: t.name,
                partitions: self.config.default_partitions,
                replication_factor: 1,
            })
            .collect())
    }

    async fn get_topic_info(&self, name: &str) -> Result<TopicInfo> {
        self.list_topics()
            .await?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::not_found(format!("topic not found: {name}")))
    }

    async fn list_consumer_groups(&self) -> Result<Vec<ConsumerGroupInfo>> {
        let committed = self.committed.read().await;
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
        self.committed
            .write()
            .await
            .retain(|(g, _, _), _| g != group_id);
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
        let partitions: Vec<u32> = match partition {
            Some(p) => vec![p],
            None => (0..self.config.default_partitions).collect(),
        };

        for partition in partitions {
            let client = self.get_client(topic, partition).await?;
            let offset = match to {
                SeekTo::Beginning => client
                    .get_offset(OffsetAt::Earliest)
                    .await
                    .map_err(|e| Error::transport(format!("failed to get offset: {e}")))?
                    - 1,
                SeekTo::End => client
                    .get_offset(OffsetAt::Latest)
                    .await
                    .map_err(|e| Error::transport(format!("failed to get offset: {e}")))?
                    - 1,
                SeekTo::Offset(o) => o - 1,
            };

            let mut committed = self.committed.write().await;
            committed
                .entry((group_id.to_string(), topic.to_string(), partition))
                .and_modify(|o| o.store(offset, Ordering::SeqCst))
                .or_insert_with(|| AtomicI64::new(offset));
        }
        Ok(())
    }

    async fn get_latest_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        let client = self.get_client(topic, partition).await?;
        client
            .get_offset(OffsetAt::Latest)
            .await
            .map_err(|e| Error::transport(format!("failed to get offset: {e}")))
    }

    async fn get_earliest_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        let client = self.get_client(topic, partition).await?;
        client
            .get_offset(OffsetAt::Earliest)
            .await
            .map_err(|e| Error::transport(format!("failed to get offset: {e}")))
    }

    async fn health_check(&self) -> bool {
        match ClientBuilder::new(vec![self.config.broker_string()]).build().await {
            Ok(client) => match client.list_topics().await {
                Ok(topics) => {
                    debug!(topics = topics.len(), "broker connection healthy");
                    true
                }
                Err(e) => {
                    error!("failed to list topics: {}", e);
                    false
                }
            },
            Err(e) => {
                error!("failed to connect to broker: {}", e);
                false
            }
        }
    }
}
