//! Shared numeric defaults for the event streaming core.
//!
//! Centralized here so every crate's `#[serde(default = "...")]` config
//! fields and every hand-written default agree. Keep in sync with the
//! `Default` impls in `streamcore-broker`, `streamcore-outbox`,
//! `streamcore-dedupe`, and `streamcore-ordered` when changing a value.

// === Topic / Partition ===

/// Default partition count for a newly created topic.
pub const DEFAULT_TOPIC_PARTITIONS: u32 = 3;

/// Default bound on buffered messages per topic for the in-memory adapter.
/// Beyond this the oldest message is dropped and the drop counter advances.
pub const DEFAULT_MAX_MESSAGES_PER_TOPIC: usize = 10_000;

/// Default per-subscriber queue depth for the in-memory adapter's fanout.
pub const DEFAULT_SUBSCRIBER_QUEUE_DEPTH: usize = 1_000;

// === Outbox ===

/// How often the dispatch loop fetches pending entries.
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 1;

/// Entries fetched per dispatch tick.
pub const DEFAULT_OUTBOX_BATCH_SIZE: i64 = 100;

/// Retry loop cadence is this many dispatch intervals.
pub const RETRY_INTERVAL_MULTIPLE: u64 = 10;

/// Maximum retry attempts before an entry is considered poison.
pub const DEFAULT_OUTBOX_MAX_RETRIES: i32 = 3;

/// Cleanup loop cadence, in seconds (5 minutes).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Expired outbox rows older than this are deleted outright (7 days).
pub const EXPIRED_ROW_RETENTION_DAYS: i64 = 7;

// === Dedupe ===

/// Default TTL for a dedupe record, in seconds (1 hour).
pub const DEFAULT_DEDUPE_TTL_SECS: u64 = 3600;

/// Default maximum processing attempts before a dedupe record is poison.
pub const DEFAULT_DEDUPE_MAX_ATTEMPTS: u32 = 3;

/// Dedupe cleanup loop cadence, in seconds (5 minutes).
pub const DEDUPE_CLEANUP_INTERVAL_SECS: u64 = 300;

// === Ordered Processor ===

/// Default number of internal processing partitions.
pub const DEFAULT_ORDERED_PARTITIONS: usize = 16;

/// Default bound on a single partition's pending-work queue.
pub const DEFAULT_ORDERED_QUEUE_DEPTH: usize = 1_000;

// === Authorization / Replay Prevention ===

/// Replay-prevention key TTL, in seconds (1 hour).
pub const DEFAULT_REPLAY_WINDOW_SECS: u64 = 3600;

// === Timeouts ===

/// Default publish timeout, in seconds.
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;
