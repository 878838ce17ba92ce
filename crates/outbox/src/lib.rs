//! Transactional outbox: staging, storage, and dispatch of envelopes that
//! must become visible only when the producer's own database transaction
//! commits.

pub mod dispatcher;
pub mod entry;
pub mod store;
pub mod transactional;

pub use dispatcher::{DispatcherConfig, OutboxDispatcher};
pub use entry::{OutboxEntry, OutboxStats, OutboxStatus};
pub use store::{OutboxStore, PostgresOutboxStore};
pub use transactional::{OutboxPublisher, OutboxTransactionContext, TransactionalOutbox};

pub use streamcore_core::limits::EXPIRED_ROW_RETENTION_DAYS;
