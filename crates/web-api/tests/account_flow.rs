mod support;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use domain::{FriendshipStatus, UserId};
use serde_json::{json, Value};
use tower::ServiceExt;

use support::TestApp;

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn registration_creates_account_and_queues_welcome_email() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(post_json(
            "/api/auth/register",
            None,
            json!({ "username": "carol", "email": "carol@example.com", "password": "pw" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["username"], "carol");
    assert!(body.get("password_hash").is_none());
    assert_eq!(app.broker.pending_count("default"), 1);
}

#[tokio::test]
async fn registration_with_taken_email_is_rejected() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(post_json(
            "/api/auth/register",
            None,
            json!({ "username": "alice2", "email": "alice@example.com", "password": "pw" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_ARGUMENT");
    assert_eq!(app.broker.pending_count("default"), 0);
}

#[tokio::test]
async fn registration_succeeds_while_the_queue_is_down() {
    let app = TestApp::new();
    app.broker.set_unavailable(true);

    let response = app
        .router()
        .oneshot(post_json(
            "/api/auth/register",
            None,
            json!({ "username": "dave", "email": "dave@example.com", "password": "pw" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn friend_request_round_trip_queues_both_notifications() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(post_json(
            "/api/friends",
            Some(&app.token(1)),
            json!({ "sender_id": 1, "receiver_id": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = json_body(response).await["id"].as_i64().unwrap();
    assert_eq!(app.broker.pending_count("default"), 1);

    // 只有接收者可以处理请求
    let response = app
        .router()
        .oneshot(post_json(
            &format!("/api/friends/{id}?status=accepted"),
            Some(&app.token(1)),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router()
        .oneshot(post_json(
            &format!("/api/friends/{id}?status=accepted"),
            Some(&app.token(2)),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "accepted");

    let friendships = app.friendships.friendships();
    assert_eq!(friendships[0].status, FriendshipStatus::Accepted);
    assert_eq!(friendships[0].requester_id, UserId::new(1));
    assert_eq!(app.broker.pending_count("default"), 2);
}

#[tokio::test]
async fn friend_request_requires_authentication_and_a_real_receiver() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(post_json(
            "/api/friends",
            None,
            json!({ "sender_id": 1, "receiver_id": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router()
        .oneshot(post_json(
            "/api/friends",
            Some(&app.token(1)),
            json!({ "sender_id": 1, "receiver_id": 99 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.friendships.friendships().is_empty());
    assert_eq!(app.broker.pending_count("default"), 0);
}
