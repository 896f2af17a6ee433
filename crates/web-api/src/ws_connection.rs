use application::ChannelOutbound;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 单条 WebSocket 连接
///
/// 连接建立时加入在线表，在线表推送的事件原样写回客户端；
/// 任一方向结束后只按本连接的 ID 离开在线表一次，不会误删同一用户的新连接。
pub struct WebSocketConnection {
    state: AppState,
    user_id: UserId,
}

impl WebSocketConnection {
    pub fn new(state: AppState, user_id: UserId) -> Self {
        Self { state, user_id }
    }

    /// 运行连接主循环，直到任意一端断开
    pub async fn run(self, socket: WebSocket) {
        let (outbound, mut events) = ChannelOutbound::channel(self.state.outbound_buffer);
        let connection_id = self.state.hub.join(self.user_id, Box::new(outbound));
        tracing::info!(user_id = %self.user_id, connection_id = %connection_id, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(8);
        let shutdown = self.state.shutdown.clone();

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(text) => {
                            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                                tracing::warn!("Failed to send text message");
                                break;
                            }
                        }
                        None => {
                            // 在线表关闭了本连接（被新连接替换或已离开）
                            let _ = sender.send(WsMessage::Close(None)).await;
                            break;
                        }
                    },
                    _ = shutdown.cancelled() => {
                        // 服务关闭，通知客户端后结束连接
                        let _ = sender.send(WsMessage::Close(None)).await;
                        break;
                    }
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => {
                            if sender.send(WsMessage::Pong(data)).await.is_err() {
                                tracing::warn!("Failed to send pong message");
                                break;
                            }
                        }
                    },
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        // 接收任务：处理来自WebSocket客户端的消息
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if Self::handle_incoming(message, &cmd_tx).await.is_err() {
                    break;
                }
            }
            tracing::debug!("WebSocket接收任务结束");
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        let removed = self
            .state
            .hub
            .leave_connection(self.user_id, connection_id);
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %connection_id,
            removed,
            "WebSocket连接已断开"
        );
    }

    async fn handle_incoming(
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::debug!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Text(_) | WsMessage::Binary(_) => {
                // 消息通过 HTTP 接口发送，这里忽略客户端写入
                tracing::debug!("收到客户端消息");
            }
        }
        Ok(())
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}
