//! 请求准入中间件
//!
//! 每个请求消耗令牌桶中的一个令牌，与路由无关；令牌耗尽时直接返回 429。

use std::sync::Arc;

use application::RateLimiter;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

pub async fn admission(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.allow() {
        tracing::debug!(path = %request.uri().path(), "请求被限流");
        return ApiError::too_many_requests().into_response();
    }
    next.run(request).await
}
