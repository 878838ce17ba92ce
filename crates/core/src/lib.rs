//! Envelope, error, and shared limits for the event streaming core.

pub mod envelope;
pub mod error;
pub mod limits;

pub use envelope::{is_partition_exempt, strip_version_suffix, topic_for, DeliveryRecord, Envelope};
pub use error::{Error, Result};
