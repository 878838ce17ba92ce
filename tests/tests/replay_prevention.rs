//! Cross-tenant replay prevention: a signature may be recorded once within
//! the replay window, and a second recording is refused.

use chrono::Utc;
use integration_tests::containers::RedisContainer;
use streamcore_authz::CrossTenantReplayPrevention;
use uuid::Uuid;

#[tokio::test]
async fn first_recording_succeeds_and_a_replay_is_refused() {
    let redis = RedisContainer::start().await;
    let guard = CrossTenantReplayPrevention::new(redis.url, 60);

    let envelope_id = Uuid::new_v4().to_string();
    let tenant_id = Uuid::new_v4().to_string();
    let producer_id = "service:billing".to_string();
    let occurred_at = Utc::now();

    guard
        .record_event_signature(&envelope_id, &tenant_id, &producer_id, occurred_at)
        .await
        .unwrap();

    let replay = guard
        .record_event_signature(&envelope_id, &tenant_id, &producer_id, occurred_at)
        .await;
    assert!(replay.is_err(), "recording the same signature twice must be refused");
}

#[tokio::test]
async fn distinct_events_are_independently_recordable() {
    let redis = RedisContainer::start().await;
    let guard = CrossTenantReplayPrevention::new(redis.url, 60);

    let tenant_id = Uuid::new_v4().to_string();
    let producer_id = "service:billing".to_string();
    let occurred_at = Utc::now();

    for _ in 0..5 {
        let envelope_id = Uuid::new_v4().to_string();
        guard
            .record_event_signature(&envelope_id, &tenant_id, &producer_id, occurred_at)
            .await
            .unwrap();
    }
}
