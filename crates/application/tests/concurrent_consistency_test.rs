//! 并发一致性测试
//!
//! 验证令牌桶、在线表和订阅集在多任务并发访问下的计数一致性

use std::sync::Arc;
use std::time::Duration;

use application::{ChannelOutbound, NotificationFeed, PresenceHub, RateLimiter};
use domain::{NewNotification, NotificationId, UserId};
use futures::future::join_all;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_exceed_capacity() {
    let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(3600)));

    let admitted = join_all((0..200).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.allow() })
    }))
    .await
    .into_iter()
    .filter(|result| matches!(result, Ok(true)))
    .count();

    assert_eq!(admitted, 50);
    assert_eq!(limiter.available(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_and_leaves_keep_hub_consistent() {
    let hub = Arc::new(PresenceHub::new());

    // 偶数用户加入后离开，奇数用户保持在线
    let results = join_all((0..100i64).map(|id| {
        let hub = hub.clone();
        tokio::spawn(async move {
            let (outbound, receiver) = ChannelOutbound::channel(4);
            let connection = hub.join(UserId::new(id), Box::new(outbound));
            if id % 2 == 0 {
                assert!(hub.leave_connection(UserId::new(id), connection));
            }
            receiver
        })
    }))
    .await;

    let receivers: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(hub.count(), 50);
    assert!(hub.online_users().iter().all(|user| user.as_i64() % 2 == 1));
    drop(receivers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_subscriber_sees_every_notification_once() {
    let feed = Arc::new(NotificationFeed::new(64));
    let mut subscriptions: Vec<_> = (0..8).map(|_| feed.subscribe()).collect();

    join_all((0..20i64).map(|n| {
        let feed = feed.clone();
        tokio::spawn(async move {
            let record = NewNotification::new(UserId::new(1), UserId::new(2), format!("n{n}"))
                .into_record(NotificationId::new(n), chrono::Utc::now());
            feed.publish(&record)
        })
    }))
    .await;

    for subscription in &mut subscriptions {
        let mut seen = Vec::new();
        for _ in 0..20 {
            let record = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
                .await
                .expect("notification in time")
                .expect("feed open");
            seen.push(record.id.0);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }
}
