//! Work queue integration tests

use registry_operator::config::RateLimitConfig;
use registry_operator::workqueue::{
    default_controller_rate_limiter, ItemExponentialFailureRateLimiter, WorkQueue,
};
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "instance";

fn new_queue() -> Arc<WorkQueue<&'static str>> {
    Arc::new(WorkQueue::new(
        "test",
        Box::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        )),
    ))
}

#[tokio::test]
async fn test_notifications_during_processing_collapse_to_one() {
    let queue = new_queue();
    queue.add(KEY).await;
    let key = queue.get().await.unwrap();

    let mut adds = Vec::new();
    for _ in 0..50 {
        let q = Arc::clone(&queue);
        adds.push(tokio::spawn(async move { q.add(KEY).await }));
    }
    for add in adds {
        add.await.unwrap();
    }
    assert!(queue.is_empty().await);

    queue.done(&key).await;
    assert_eq!(queue.len().await, 1);

    let key = queue.get().await.unwrap();
    queue.done(&key).await;
    assert!(queue.is_empty().await);
}

#[test]
fn test_get_on_empty_queue_is_woken_by_add() {
    let queue = new_queue();
    let mut get = tokio_test::task::spawn(queue.get());
    tokio_test::assert_pending!(get.poll());

    tokio_test::block_on(queue.add(KEY));

    assert!(get.is_woken());
    assert_eq!(tokio_test::assert_ready!(get.poll()), Some(KEY));
}

#[tokio::test]
async fn test_blocked_get_wakes_on_add() {
    let queue = new_queue();
    let q = Arc::clone(&queue);
    let waiter = tokio::spawn(async move { q.get().await });

    tokio::task::yield_now().await;
    queue.add(KEY).await;

    assert_eq!(waiter.await.unwrap(), Some(KEY));
}

#[tokio::test]
async fn test_shutdown_releases_blocked_getters() {
    let queue = new_queue();
    let getters: Vec<_> = (0..3)
        .map(|_| {
            let q = Arc::clone(&queue);
            tokio::spawn(async move { q.get().await })
        })
        .collect();

    tokio::task::yield_now().await;
    queue.shut_down().await;

    for getter in getters {
        assert_eq!(getter.await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_get_returns_none_after_shutdown_with_pending_keys() {
    let queue = new_queue();
    queue.add(KEY).await;
    queue.shut_down().await;

    assert_eq!(queue.get().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_in_flight_key() {
    let queue = new_queue();
    queue.add(KEY).await;
    let key = queue.get().await.unwrap();

    let q = Arc::clone(&queue);
    let drain = tokio::spawn(async move { q.shut_down_with_drain().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!drain.is_finished());

    queue.done(&key).await;
    assert!(drain.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_drain_completes_when_in_flight_key_was_readded() {
    let queue = new_queue();
    queue.add(KEY).await;
    let key = queue.get().await.unwrap();
    queue.add(KEY).await;

    let q = Arc::clone(&queue);
    let drain = tokio::spawn(async move { q.shut_down_with_drain().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!drain.is_finished());

    queue.done(&key).await;
    let drained = tokio::time::timeout(Duration::from_secs(2), drain)
        .await
        .expect("drain did not finish after the in-flight key was done");
    assert!(drained.unwrap());
    assert_eq!(queue.get().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_requeue_backs_off_exponentially() {
    let queue = new_queue();

    queue.add_rate_limited(KEY).await;
    tokio::time::sleep(Duration::from_millis(4)).await;
    assert!(queue.is_empty().await);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(queue.len().await, 1);

    let key = queue.get().await.unwrap();
    queue.add_rate_limited(key).await;
    queue.done(&key).await;

    // Second failure waits 10ms.
    tokio::time::sleep(Duration::from_millis(9)).await;
    assert!(queue.is_empty().await);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(queue.len().await, 1);
    assert_eq!(queue.num_requeues(&KEY), 2);

    queue.forget(&KEY);
    assert_eq!(queue.num_requeues(&KEY), 0);
}

#[tokio::test(start_paused = true)]
async fn test_default_controller_rate_limiter_starts_at_base_delay() {
    let config = RateLimitConfig::default();
    let queue: Arc<WorkQueue<&'static str>> = Arc::new(WorkQueue::new(
        "default",
        Box::new(default_controller_rate_limiter(&config)),
    ));

    queue.add_rate_limited(KEY).await;
    tokio::time::sleep(config.base_delay() + Duration::from_millis(1)).await;

    assert_eq!(queue.len().await, 1);
    assert_eq!(queue.num_requeues(&KEY), 1);
}
