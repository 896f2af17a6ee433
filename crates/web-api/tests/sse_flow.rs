mod support;

use std::time::Duration;

use chrono::Utc;
use domain::{NewNotification, NotificationId, UserId};
use reqwest::Client;

use support::{eventually, TestApp};

#[tokio::test]
async fn stream_only_carries_the_requesters_notifications() {
    let app = TestApp::new();
    let (addr, shutdown) = app.serve().await;

    let mut response = Client::new()
        .get(format!("http://{}/api/notifications/stream", addr))
        .bearer_auth(app.token(2))
        .send()
        .await
        .expect("open stream");
    assert!(response.status().is_success());

    let feed = app.state.feed.clone();
    assert!(eventually(|| feed.subscriber_count() == 1).await);

    let for_alice = NewNotification::new(UserId::new(2), UserId::new(1), "not for bob")
        .into_record(NotificationId::new(1), Utc::now());
    let for_bob = NewNotification::new(UserId::new(1), UserId::new(2), "alice sent you a message")
        .into_record(NotificationId::new(2), Utc::now());
    feed.publish(&for_alice);
    feed.publish(&for_bob);

    let mut received = String::new();
    let read = tokio::time::timeout(Duration::from_secs(2), async {
        while !received.contains("alice sent you a message") {
            match response.chunk().await {
                Ok(Some(chunk)) => received.push_str(&String::from_utf8_lossy(&chunk)),
                _ => break,
            }
        }
    })
    .await;

    assert!(read.is_ok());
    assert!(received.contains("data: alice sent you a message"));
    assert!(!received.contains("not for bob"));

    // 断开后下一次写入失败，订阅随响应流一起注销
    drop(response);
    assert!(
        eventually(|| {
            feed.publish(&for_bob);
            feed.subscriber_count() == 0
        })
        .await
    );

    let _ = shutdown.send(());
}

#[tokio::test]
async fn stream_accepts_token_in_query() {
    let app = TestApp::new();
    let (addr, shutdown) = app.serve().await;

    let response = Client::new()
        .get(format!(
            "http://{}/api/notifications/stream?token={}",
            addr,
            app.token(1)
        ))
        .send()
        .await
        .expect("open stream");
    assert!(response.status().is_success());

    let response = Client::new()
        .get(format!("http://{}/api/notifications/stream", addr))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let _ = shutdown.send(());
}
