use std::convert::Infallible;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, Stream, StreamExt};
use serde::Deserialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use application::{FriendRequest, OnlineReport, RegisterRequest, SendMessageRequest};
use domain::{Account, ChatMessage, Friendship, FriendshipId, FriendshipStatus, UserId};

use crate::{
    error::ApiError, rate_limit::admission, state::AppState, ws_connection::WebSocketConnection,
};

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    sender_id: UserId,
    receiver_id: Option<UserId>,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct FriendRequestPayload {
    sender_id: UserId,
    receiver_id: UserId,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    status: FriendshipStatus,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    let limiter = state.limiter.clone();

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .route("/ws/messages", get(websocket_upgrade))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, admission))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/friends", post(send_friend_request))
        .route("/friends/{id}", post(respond_to_friend_request))
        .route("/messages", post(send_message))
        .route("/users/online", get(online_users))
        .route("/notifications/stream", get(notification_stream))
}

/// `*` 表示允许任意来源
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static("last-event-id"),
        ]);

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let requester = state.jwt_service.extract_user_from_headers(&headers)?;

    let message = state
        .message_service
        .send(
            requester,
            SendMessageRequest {
                sender_id: payload.sender_id,
                receiver_id: payload.receiver_id,
                content: payload.content,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let account = state
        .account_service
        .register(RegisterRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

async fn send_friend_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<FriendRequestPayload>,
) -> Result<(StatusCode, Json<Friendship>), ApiError> {
    let requester = state.jwt_service.extract_user_from_headers(&headers)?;

    let friendship = state
        .friendship_service
        .send_request(
            requester,
            FriendRequest {
                sender_id: payload.sender_id,
                receiver_id: payload.receiver_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(friendship)))
}

/// `?status=accepted|rejected`
async fn respond_to_friend_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Friendship>, ApiError> {
    let requester = state.jwt_service.extract_user_from_headers(&headers)?;

    let friendship = state
        .friendship_service
        .respond(requester, FriendshipId::new(id), query.status)
        .await?;

    Ok(Json(friendship))
}

async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OnlineReport>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    Ok(Json(state.online_users.report().await))
}

/// 当前用户的通知流，响应被丢弃时订阅随之注销
async fn notification_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_id = state
        .jwt_service
        .extract_user(&headers, query.token.as_deref())?;

    let subscription = state.feed.subscribe();
    tracing::info!(user_id = %user_id, subscription_id = subscription.id(), "通知订阅已建立");

    let events = stream::unfold(subscription, move |mut subscription| async move {
        let record = subscription.recv_for(user_id).await?;
        let event = Event::default()
            .event("notification")
            .id(record.id.to_string())
            .data(record.content);
        Some((Ok(event), subscription))
    })
    .take_until(state.shutdown.clone().cancelled_owned());

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = state
        .jwt_service
        .extract_user(&headers, query.token.as_deref())?;

    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(state, user_id).run(socket)))
}
