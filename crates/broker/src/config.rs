//! Broker transport configuration.

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize broker addresses as either a comma-separated string or a list.
fn deserialize_brokers<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct BrokersVisitor;

    impl<'de> Visitor<'de> for BrokersVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a comma-separated string or a list of broker addresses")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.split(',').map(|s| s.trim().to_string()).collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut brokers = Vec::new();
            while let Some(broker) = seq.next_element::<String>()? {
                brokers.push(broker);
            }
            Ok(brokers)
        }
    }

    deserializer.deserialize_any(BrokersVisitor)
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_partitions() -> u32 {
    crate::DEFAULT_PARTITIONS
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    3
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_max_poll_records() -> usize {
    500
}

/// Configuration for the partitioned-log (Kafka-like) adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses, comma-separated string or list.
    #[serde(deserialize_with = "deserialize_brokers", default = "default_brokers")]
    pub brokers: Vec<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    #[serde(default = "default_partitions")]
    pub default_partitions: u32,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// `auto_offset_reset`: "earliest" or "latest".
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            sasl_username: None,
            sasl_password: None,
            default_partitions: default_partitions(),
            compression: default_compression(),
            request_timeout_ms: default_request_timeout_ms(),
            retries: default_retries(),
            session_timeout_ms: default_session_timeout_ms(),
            auto_offset_reset: default_auto_offset_reset(),
            max_poll_records: default_max_poll_records(),
        }
    }
}

impl KafkaConfig {
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }
}

/// Configuration for the Redis Streams adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStreamConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Trims each stream to this length on publish (`XADD ... MAXLEN ~`).
    #[serde(default = "default_stream_maxlen")]
    pub stream_maxlen: usize,
    #[serde(default = "default_partitions")]
    pub default_partitions: u32,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_stream_maxlen() -> usize {
    100_000
}

impl Default for RedisStreamConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            stream_maxlen: default_stream_maxlen(),
            default_partitions: default_partitions(),
        }
    }
}
