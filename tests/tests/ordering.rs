//! Per-partition-key ordered processing: strict FIFO within a partition key,
//! no ordering guarantee required across distinct keys.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use integration_tests::fixtures::test_envelopes;
use streamcore_ordered::{Handler, HandlerFuture, OrderedConfig, OrderedProcessor};
use uuid::Uuid;

#[tokio::test]
async fn events_sharing_a_partition_key_complete_in_submission_order() {
    let processor = OrderedProcessor::new(OrderedConfig::default());
    let _handles = processor.start();

    let tenant = Uuid::new_v4();
    let envelopes = test_envelopes("svc.billing.invoice_created.v1", tenant, "C1", 20);

    let completed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    for (i, env) in envelopes.into_iter().enumerate() {
        let completed = completed.clone();
        let handler: Handler = Arc::new(move |_env| {
            let completed = completed.clone();
            Box::pin(async move {
                // Vary sleep so a naive concurrent scheduler would reorder
                // completions if it didn't serialize per partition.
                let delay = if i % 2 == 0 { 5 } else { 1 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                completed.lock().unwrap().push(i);
                Ok(())
            }) as HandlerFuture
        });
        processor.submit_event(env, handler).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let order = completed.lock().unwrap().clone();
    let expected: Vec<usize> = (0..20).collect();
    assert_eq!(order, expected, "handler completions must preserve submission order within a partition key");
}

#[tokio::test]
async fn distinct_partition_keys_route_to_partitions_within_range() {
    let config = OrderedConfig {
        total_partitions: 4,
        ..OrderedConfig::default()
    };
    let processor = OrderedProcessor::new(config);
    let _handles = processor.start();

    let tenant = Uuid::new_v4();
    for key in ["A", "B", "C", "D", "E", "F"] {
        let env = test_envelopes("svc.billing.invoice_created.v1", tenant, key, 1).remove(0);
        let handler: Handler = Arc::new(|_env| Box::pin(async { Ok(()) }) as HandlerFuture);
        let assignment = processor.submit_event(env, handler).await.unwrap();
        assert!(assignment.partition_id < 4);
    }
}

#[tokio::test]
async fn a_failing_handler_does_not_block_later_events_on_the_same_partition() {
    let processor = OrderedProcessor::new(OrderedConfig::default());
    let _handles = processor.start();

    let tenant = Uuid::new_v4();
    let envelopes = test_envelopes("svc.billing.invoice_created.v1", tenant, "C1", 3);
    let completed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    for (i, env) in envelopes.into_iter().enumerate() {
        let completed = completed.clone();
        let handler: Handler = Arc::new(move |_env| {
            let completed = completed.clone();
            Box::pin(async move {
                if i == 0 {
                    return Err(streamcore_core::Error::transport("simulated handler failure"));
                }
                completed.lock().unwrap().push(i);
                Ok(())
            }) as HandlerFuture
        });
        processor.submit_event(env, handler).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let order = completed.lock().unwrap().clone();
    assert_eq!(order, vec![1, 2], "events after a failing one must still run");
}
