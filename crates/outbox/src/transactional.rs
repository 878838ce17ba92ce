//! Transactional staging of outbox entries bound to a database transaction.
//!
//! A `TransactionalOutbox` never publishes inline — it only inserts outbox
//! rows, in the same transaction as the caller's business write. Publishing
//! is the dispatcher's job, always, so this type enforces that boundary by
//! construction: it has no handle to a broker adapter at all.

use std::sync::Arc;

use chrono::Duration;
use sqlx::{Postgres, Transaction};
use streamcore_core::{Envelope, Result};
use uuid::Uuid;

use crate::entry::OutboxEntry;
use crate::store::OutboxStore;

/// Wraps an `OutboxStore` for staging envelopes that become visible only
/// when the caller's surrounding database transaction commits.
pub struct TransactionalOutbox {
    store: Arc<dyn OutboxStore>,
    default_ttl: Option<Duration>,
}

impl TransactionalOutbox {
    pub fn new(store: Arc<dyn OutboxStore>, default_ttl: Option<Duration>) -> Self {
        Self { store, default_ttl }
    }

    /// Opens a staging context. The caller is expected to have already
    /// begun a database transaction that shares the same connection/pool as
    /// `store`; committing that transaction is what makes the inserted rows
    /// visible to the dispatcher.
    pub fn context(&self) -> OutboxTransactionContext<'_> {
        OutboxTransactionContext {
            outbox: self,
            staged: Vec::new(),
        }
    }
}

/// Accumulates envelopes to be inserted as outbox rows. `commit_events`
/// performs the inserts; it does not publish anything.
pub struct OutboxTransactionContext<'a> {
    outbox: &'a TransactionalOutbox,
    staged: Vec<(Envelope, String)>,
}

impl<'a> OutboxTransactionContext<'a> {
    /// Stages an envelope for insertion under the given topic.
    pub fn add_event(&mut self, envelope: Envelope, topic: impl Into<String>) {
        self.staged.push((envelope, topic.into()));
    }

    /// Inserts every staged envelope as a pending outbox row, using the
    /// caller's own open transaction. The rows are part of that transaction:
    /// they become visible when it commits and disappear if it rolls back.
    /// Call this immediately before the caller's business write commits.
    pub async fn commit_events(self, tx: &mut Transaction<'_, Postgres>) -> Result<Vec<OutboxEntry>> {
        let mut entries = Vec::with_capacity(self.staged.len());
        for (envelope, topic) in self.staged {
            let entry = self
                .outbox
                .store
                .create_entry_in_transaction(tx, envelope, &topic, self.outbox.default_ttl)
                .await?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
}

/// Thin convenience wrapper for callers that just want to enqueue one event
/// without staging a multi-event transaction.
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    default_ttl: Option<Duration>,
}

impl OutboxPublisher {
    pub fn new(store: Arc<dyn OutboxStore>, default_ttl: Option<Duration>) -> Self {
        Self { store, default_ttl }
    }

    pub async fn publish_event(&self, envelope: Envelope, topic: impl Into<String>) -> Result<Uuid> {
        let entry = self
            .store
            .create_entry(envelope, &topic.into(), self.default_ttl)
            .await?;
        Ok(entry.id)
    }
}
