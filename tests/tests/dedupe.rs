//! Exactly-once processing: duplicate suppression via the dedupe store.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use integration_tests::containers::RedisContainer;
use integration_tests::fixtures::test_envelope;
use streamcore_dedupe::{ExactlyOnceProcessor, ProcessOutcome, ProcessorConfig, RedisDedupeStore};
use uuid::Uuid;

async fn processor() -> Arc<ExactlyOnceProcessor> {
    let redis = RedisContainer::start().await;
    let store = Arc::new(RedisDedupeStore::new(redis.url));
    Arc::new(ExactlyOnceProcessor::new(store, ProcessorConfig::new("test-group")))
}

async fn processor_with_max_attempts(max_attempts: u32) -> Arc<ExactlyOnceProcessor> {
    let redis = RedisContainer::start().await;
    let store = Arc::new(RedisDedupeStore::new(redis.url));
    let mut config = ProcessorConfig::new("test-group");
    config.max_attempts = max_attempts;
    Arc::new(ExactlyOnceProcessor::new(store, config))
}

#[tokio::test]
async fn redelivered_event_is_skipped_after_first_success() {
    let processor = processor().await;
    let tenant = Uuid::new_v4();
    let env = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let outcome1 = processor
        .wrap(&env, |_e| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
    assert!(matches!(outcome1, ProcessOutcome::Completed));

    let calls_clone = calls.clone();
    let outcome2 = processor
        .wrap(&env, |_e| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
    assert!(matches!(outcome2, ProcessOutcome::Duplicate));

    assert_eq!(calls.load(Ordering::SeqCst), 1, "handler must run exactly once");
}

#[tokio::test]
async fn distinct_envelopes_are_both_processed() {
    let processor = processor().await;
    let tenant = Uuid::new_v4();
    let env_a = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");
    let env_b = test_envelope("svc.billing.invoice_created.v1", tenant, "C2");

    let calls = Arc::new(AtomicUsize::new(0));

    for env in [env_a, env_b] {
        let calls_clone = calls.clone();
        let outcome = processor
            .wrap(&env, |_e| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Completed));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_handler_allows_retry_up_to_the_attempt_limit() {
    let processor = processor().await;
    let tenant = Uuid::new_v4();
    let env = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");

    let outcome = processor
        .wrap(&env, |_e| async { Err(streamcore_core::Error::transport("boom")) })
        .await;
    assert!(outcome.is_err());

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let retried = processor
        .wrap(&env, |_e| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
    assert!(matches!(retried, ProcessOutcome::Completed));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "a failed attempt must be retryable, not poisoned immediately");
}

#[tokio::test]
async fn exhausting_max_attempts_yields_poison_outcome() {
    let processor = processor_with_max_attempts(1).await;
    let tenant = Uuid::new_v4();
    let env = test_envelope("svc.billing.invoice_created.v1", tenant, "C1");

    let first = processor
        .wrap(&env, |_e| async { Err(streamcore_core::Error::transport("boom")) })
        .await;
    assert!(first.is_err());

    let second = processor
        .wrap(&env, |_e| async {
            panic!("handler must not run once max_attempts is exhausted")
        })
        .await
        .unwrap();
    assert!(
        matches!(second, ProcessOutcome::Poison),
        "an event that exceeded max_attempts must be reported as poison, not an ordinary duplicate"
    );
}
