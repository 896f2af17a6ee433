//! Web API 层。
//!
//! 提供 Axum 路由：请求准入中间件、账户注册、好友请求、消息发送、在线用户、
//! SSE 通知流与 WebSocket 在线连接。

mod auth;
mod error;
mod rate_limit;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::{cors_layer, router};
pub use state::AppState;
