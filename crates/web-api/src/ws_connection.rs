use application::{ApplicationError, ClientEvent, ConnectionId, ReceiptRequest, ServerEvent};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{DomainError, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::state::AppState;

/// WebSocket 连接管理器
///
/// 封装单个 WebSocket 连接的生命周期：
/// - 在在线状态表中登记出站队列
/// - 解析客户端事件并分发给应用层服务
/// - 将服务器事件写回客户端
/// - 断开时注销连接
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
}

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理除服务器事件外对 WebSocket sender 的写操作
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState) -> Self {
        Self { socket, state }
    }

    /// 运行 WebSocket 连接的主循环，直到任一方向结束
    pub async fn run(self) {
        let Self { socket, state } = self;
        let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(state.connection_buffer);
        let connection_id = state.services.sessions.connect(events_tx.clone()).await;
        tracing::info!(connection_id = %connection_id, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => {
                            if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                                tracing::warn!("发送 pong 失败");
                                break;
                            }
                        }
                    },
                    event = events_rx.recv() => {
                        let Some(event) = event else { break };
                        let payload = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(error = %err, event = event.name(), "事件序列化失败");
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            tracing::warn!("发送事件失败");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket 发送任务结束");
        });

        // 接收任务：处理来自客户端的帧
        let mut recv_task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    match message {
                        WsMessage::Close(_) => {
                            tracing::info!(connection_id = %connection_id, "WebSocket 收到关闭消息");
                            break;
                        }
                        WsMessage::Ping(data) => {
                            if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) => {}
                        WsMessage::Text(text) => {
                            handle_text(&state, connection_id, &events_tx, text.as_str()).await;
                        }
                        WsMessage::Binary(_) => {
                            tracing::debug!(connection_id = %connection_id, "忽略二进制帧");
                        }
                    }
                }
                tracing::debug!("WebSocket 接收任务结束");
            })
        };

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        state.services.sessions.disconnect(connection_id).await;
        tracing::info!(connection_id = %connection_id, "WebSocket 连接已断开，在线状态已清理");
    }
}

async fn handle_text(
    state: &AppState,
    connection_id: ConnectionId,
    reply: &mpsc::Sender<ServerEvent>,
    text: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(connection_id = %connection_id, error = %err, "无法解析客户端事件");
            send_error(reply, "INVALID_EVENT", err.to_string());
            return;
        }
    };

    if let Err(err) = dispatch(state, connection_id, event).await {
        let api = ApiError::from(err);
        tracing::debug!(connection_id = %connection_id, code = api.code(), "客户端事件被拒绝");
        send_error(reply, api.code(), api.message().to_owned());
    }
}

/// 认证之外的事件要求连接已绑定用户，且载荷中的 user_id 与之一致
async fn dispatch(
    state: &AppState,
    connection_id: ConnectionId,
    event: ClientEvent,
) -> Result<(), ApplicationError> {
    let sessions = &state.services.sessions;
    if let ClientEvent::Authenticate { user_id } = event {
        sessions.authenticate(connection_id, user_id).await?;
        return Ok(());
    }

    let Some(bound) = sessions.bound_user(connection_id).await else {
        tracing::warn!(connection_id = %connection_id, "未认证连接发送事件，已忽略");
        return Ok(());
    };

    if let Some((message_id, user_id, kind)) = event.receipt() {
        ensure_same_user(bound, user_id)?;
        state
            .services
            .messages
            .set_status(ReceiptRequest {
                user_id,
                message_id,
                kind,
            })
            .await?;
        return Ok(());
    }

    match event {
        ClientEvent::TypingStart { chat_id, user_id } => {
            sessions.typing(connection_id, chat_id, user_id, true).await?;
        }
        ClientEvent::TypingStop { chat_id, user_id } => {
            sessions.typing(connection_id, chat_id, user_id, false).await?;
        }
        ClientEvent::CallSignal {
            target_user_id,
            signal,
        } => {
            state
                .services
                .calls
                .relay_signal(bound, target_user_id, signal)
                .await;
        }
        ClientEvent::Authenticate { .. }
        | ClientEvent::MessageDelivered { .. }
        | ClientEvent::MessageRead { .. } => {}
    }
    Ok(())
}

fn ensure_same_user(bound: UserId, claimed: UserId) -> Result<(), ApplicationError> {
    if bound != claimed {
        return Err(DomainError::permission_denied(
            "event user does not match the authenticated connection",
        )
        .into());
    }
    Ok(())
}

fn send_error(reply: &mpsc::Sender<ServerEvent>, code: &str, message: String) {
    if reply.try_send(ServerEvent::error(code, message)).is_err() {
        tracing::debug!("错误事件未能入队");
    }
}
