//! Transactional outbox commit boundary and dispatcher behavior, against a
//! real Postgres container and the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use integration_tests::containers::PostgresContainer;
use integration_tests::fixtures::test_envelope;
use streamcore_broker::{BrokerAdapter, MemoryBroker, MemoryBrokerConfig};
use streamcore_outbox::{DispatcherConfig, OutboxDispatcher, OutboxStatus, OutboxStore, PostgresOutboxStore, TransactionalOutbox};
use uuid::Uuid;

async fn store() -> Arc<PostgresOutboxStore> {
    let pg = PostgresContainer::start().await;
    Arc::new(PostgresOutboxStore::connect(&pg.url).await.unwrap())
}

#[tokio::test]
async fn staged_events_are_invisible_until_commit_events_is_called() {
    let store = store().await;
    let outbox = TransactionalOutbox::new(store.clone(), None);

    let tenant = Uuid::new_v4();
    let env = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");
    let mut ctx = outbox.context();
    ctx.add_event(env.clone(), env.topic());
    assert_eq!(ctx.staged_count(), 1);

    // Nothing has been inserted until commit_events runs.
    let pending_before = store.get_pending_entries(10, Some(tenant)).await.unwrap();
    assert!(pending_before.is_empty());

    let mut tx = store.pool().begin().await.unwrap();
    let entries = ctx.commit_events(&mut tx).await.unwrap();
    assert_eq!(entries.len(), 1);
    tx.commit().await.unwrap();

    let pending_after = store.get_pending_entries(10, Some(tenant)).await.unwrap();
    assert_eq!(pending_after.len(), 1);
    assert_eq!(pending_after[0].envelope_id, env.id);
}

#[tokio::test]
async fn rolling_back_the_caller_transaction_discards_staged_entries() {
    let store = store().await;
    let outbox = TransactionalOutbox::new(store.clone(), None);

    let tenant = Uuid::new_v4();
    let env1 = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");
    let env2 = test_envelope("svc.billing.invoice_paid.v1", tenant, "C1");
    let mut ctx = outbox.context();
    ctx.add_event(env1.clone(), env1.topic());
    ctx.add_event(env2.clone(), env2.topic());

    let mut tx = store.pool().begin().await.unwrap();
    let entries = ctx.commit_events(&mut tx).await.unwrap();
    assert_eq!(entries.len(), 2);
    tx.rollback().await.unwrap();

    let pending_after = store.get_pending_entries(10, Some(tenant)).await.unwrap();
    assert!(
        pending_after.is_empty(),
        "rows inserted inside a rolled-back transaction must not survive"
    );
}

#[tokio::test]
async fn dispatcher_publishes_pending_entries_and_marks_them_published() {
    let store = store().await;
    let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new(MemoryBrokerConfig::default()));
    broker.connect().await.unwrap();

    let tenant = Uuid::new_v4();
    let env = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");
    let topic = env.topic();
    broker.create_topic(&topic, 4, 1, Default::default()).await.unwrap();

    let entry = store.create_entry(env.clone(), &topic, None).await.unwrap();
    assert_eq!(entry.status, OutboxStatus::Pending);

    let dispatcher = Arc::new(OutboxDispatcher::new(
        store.clone(),
        broker.clone(),
        DispatcherConfig {
            dispatch_interval: Duration::from_millis(50),
            ..DispatcherConfig::default()
        },
    ));
    let handles = dispatcher.start();

    let mut published = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Some(refreshed) = store.get_entry(entry.id).await.unwrap() {
            if refreshed.status == OutboxStatus::Published {
                published = true;
                break;
            }
        }
    }
    assert!(published, "dispatcher did not publish the pending entry in time");

    let records = broker.poll(&[topic], "verifier", 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].envelope.id, env.id);

    for handle in handles {
        handle.abort();
    }
}
