//! Exactly-once processing: a dedupe store keyed by
//! `<tenant>:<consumer_group>:<envelope_id>`, and a processor that uses it to
//! guard handler invocation against redelivery.

pub mod processor;
pub mod record;
pub mod store;

pub use processor::{ExactlyOnceProcessor, ProcessOutcome, ProcessorConfig};
pub use record::{DedupeRecord, DedupeStats, DedupeStatus};
pub use store::{DedupeStore, RedisDedupeStore};
