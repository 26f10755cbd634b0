//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use pushlab_common::QueueConfig;
use pushlab_queue::{
    DeadLetterReason, Disposition, Envelope, MessageQueue, QueueError, QueueStats, RedisQueue,
};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(1);

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Queue settings with a name no other test uses.
fn config() -> QueueConfig {
    serde_json::from_value(serde_json::json!({
        "url": get_redis_url(),
        "queue_name": format!("pushlab-test-{}", uuid::Uuid::new_v4()),
        "consumer_name": "it",
    }))
    .unwrap()
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_publish_receive_ack() {
    let queue = RedisQueue::connect(&config(), &CancellationToken::new())
        .await
        .unwrap();

    queue.publish(&Envelope::new(r#"{"n":1}"#)).await.unwrap();
    let message = queue.receive(WAIT).await.unwrap().unwrap();
    assert_eq!(message.envelope.body, r#"{"n":1}"#);
    assert_eq!(
        queue.stats().await.unwrap(),
        QueueStats {
            ready: 0,
            in_flight: 1,
            dead_letter: 0
        }
    );

    queue.settle(&message, Disposition::Ack).await.unwrap();
    assert_eq!(queue.stats().await.unwrap(), QueueStats::default());

    queue.close().await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_receive_empty_times_out() {
    let queue = RedisQueue::connect(&config(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(queue.receive(WAIT).await.unwrap().is_none());
    queue.close().await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_requeue_then_dead_letter() {
    let queue = RedisQueue::connect(&config(), &CancellationToken::new())
        .await
        .unwrap();
    queue.publish(&Envelope::new("job")).await.unwrap();

    let first = queue.receive(WAIT).await.unwrap().unwrap();
    queue
        .settle(&first, Disposition::NackRequeue { retry_count: 1 })
        .await
        .unwrap();

    let second = queue.receive(WAIT).await.unwrap().unwrap();
    assert_eq!(second.envelope.retry_count(), 1);
    queue
        .settle(
            &second,
            Disposition::NackDeadLetter {
                reason: DeadLetterReason::MaxRetries,
            },
        )
        .await
        .unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.dead_letter, 1);

    queue.close().await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_unsettled_messages_recovered_on_connect() {
    let config = config();
    let queue = RedisQueue::connect(&config, &CancellationToken::new())
        .await
        .unwrap();
    queue.publish(&Envelope::new("first")).await.unwrap();
    queue.publish(&Envelope::new("second")).await.unwrap();

    queue.receive(WAIT).await.unwrap().unwrap();
    queue.receive(WAIT).await.unwrap().unwrap();
    queue.close().await;

    let queue = RedisQueue::connect(&config, &CancellationToken::new())
        .await
        .unwrap();
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.ready, 2);
    assert_eq!(stats.in_flight, 0);

    let next = queue.receive(WAIT).await.unwrap().unwrap();
    assert_eq!(next.envelope.body, "first");

    queue.close().await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_second_worker_leaves_first_workers_messages_alone() {
    // Default consumer names, as two worker processes would have
    let settings = serde_json::json!({
        "url": get_redis_url(),
        "queue_name": format!("pushlab-test-{}", uuid::Uuid::new_v4()),
    });
    let first_config: QueueConfig = serde_json::from_value(settings.clone()).unwrap();
    let second_config: QueueConfig = serde_json::from_value(settings).unwrap();
    assert_ne!(first_config.consumer_name, second_config.consumer_name);

    let first = RedisQueue::connect(&first_config, &CancellationToken::new())
        .await
        .unwrap();
    first.publish(&Envelope::new("job")).await.unwrap();
    let message = first.receive(WAIT).await.unwrap().unwrap();

    let second = RedisQueue::connect(&second_config, &CancellationToken::new())
        .await
        .unwrap();
    assert!(second.receive(WAIT).await.unwrap().is_none());
    assert_eq!(first.stats().await.unwrap().in_flight, 1);

    first.settle(&message, Disposition::Ack).await.unwrap();
    assert_eq!(first.stats().await.unwrap(), QueueStats::default());
    assert_eq!(second.stats().await.unwrap(), QueueStats::default());

    first.close().await;
    second.close().await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_closed_queue_reports_disconnected() {
    let queue = RedisQueue::connect(&config(), &CancellationToken::new())
        .await
        .unwrap();
    queue.close().await;

    let err = queue.publish(&Envelope::new("late")).await.unwrap_err();
    assert!(matches!(err, QueueError::Disconnected));
}

#[tokio::test]
async fn test_unreachable_broker_fails_fast() {
    let config: QueueConfig = serde_json::from_value(serde_json::json!({
        "url": "redis://127.0.0.1:1",
    }))
    .unwrap();

    let result = RedisQueue::connect(&config, &CancellationToken::new()).await;
    assert!(result.is_err());
}
