//! Publish/consume round trip and partition stability over the in-memory
//! broker adapter.

use integration_tests::fixtures::test_envelope;
use streamcore_broker::{BrokerAdapter, MemoryBroker, MemoryBrokerConfig};
use uuid::Uuid;

#[tokio::test]
async fn publish_then_poll_returns_the_same_envelope() {
    let broker = MemoryBroker::new(MemoryBrokerConfig::default());
    broker.connect().await.unwrap();

    let tenant = Uuid::new_v4();
    let env = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");
    let topic = env.topic();
    broker.create_topic(&topic, 4, 1, Default::default()).await.unwrap();

    let result = broker.publish(&topic, &env, None).await.unwrap();
    assert_eq!(result.event_id, env.id.to_string());

    let records = broker.poll(&[topic.clone()], "group-a", 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].envelope.id, env.id);
    assert_eq!(records[0].topic, topic);
}

#[tokio::test]
async fn same_partition_key_always_lands_on_the_same_partition() {
    let broker = MemoryBroker::new(MemoryBrokerConfig::default());
    broker.connect().await.unwrap();

    let tenant = Uuid::new_v4();
    let topic = format!("tenant-{tenant}.svc.billing.invoice_created");
    broker.create_topic(&topic, 8, 1, Default::default()).await.unwrap();

    let mut partitions = std::collections::HashSet::new();
    for _ in 0..5 {
        let env = test_envelope("svc.billing.invoice_created.v1", tenant, "stable-key");
        let result = broker.publish(&topic, &env, None).await.unwrap();
        partitions.insert(result.partition);
    }

    assert_eq!(partitions.len(), 1, "one partition key must always route to one partition");
}

#[tokio::test]
async fn poll_returns_empty_when_nothing_new() {
    let broker = MemoryBroker::new(MemoryBrokerConfig::default());
    broker.connect().await.unwrap();

    let tenant = Uuid::new_v4();
    let topic = format!("tenant-{tenant}.svc.billing.invoice_created");
    broker.create_topic(&topic, 1, 1, Default::default()).await.unwrap();

    let records = broker.poll(&[topic], "group-a", 10).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn committed_offset_is_not_redelivered() {
    let broker = MemoryBroker::new(MemoryBrokerConfig::default());
    broker.connect().await.unwrap();

    let tenant = Uuid::new_v4();
    let env = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");
    let topic = env.topic();
    broker.create_topic(&topic, 1, 1, Default::default()).await.unwrap();
    broker.publish(&topic, &env, None).await.unwrap();

    let first = broker.poll(&[topic.clone()], "group-a", 10).await.unwrap();
    assert_eq!(first.len(), 1);
    broker
        .commit_offset("group-a", &topic, first[0].partition, &first[0].offset)
        .await
        .unwrap();

    let second = broker.poll(&[topic], "group-a", 10).await.unwrap();
    assert!(second.is_empty());
}
