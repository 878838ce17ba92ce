//! The broker adapter contract and its in-memory, Kafka-like, and Redis
//! Streams realizations.

pub mod adapter;
pub mod config;
pub mod health;
pub mod kafka;
pub mod memory;
pub mod partitioner;
pub mod redis_stream;

/// Default partition count for a newly created topic.
pub const DEFAULT_PARTITIONS: u32 = streamcore_core::limits::DEFAULT_TOPIC_PARTITIONS;

pub use adapter::{
    BrokerAdapter, ConsumerGroupInfo, ConsumerRecord, ConsumerRecordStream, PublishResult, SeekTo,
    TopicConfigOverrides, TopicInfo,
};
pub use config::{KafkaConfig, RedisStreamConfig};
pub use kafka::KafkaBroker;
pub use memory::{MemoryBroker, MemoryBrokerConfig};
pub use redis_stream::RedisStreamBroker;
