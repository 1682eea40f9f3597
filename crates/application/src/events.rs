//! 实时事件
//!
//! 线上格式：`{"event": "<名称>", "data": {...}}`，双向一致。

use domain::{Call, ChatId, Message, MessageId, MessageStatus, ReceiptKind, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 服务器推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        user_id: UserId,
    },
    UserOnline {
        user_id: UserId,
    },
    UserOffline {
        user_id: UserId,
    },
    NewMessage(Message),
    MessageUpdated(Message),
    MessageDeleted {
        message_id: MessageId,
        chat_id: ChatId,
        for_everyone: bool,
    },
    MessageReaction(Message),
    MessageStatus {
        message_id: MessageId,
        status: MessageStatus,
        user_id: UserId,
    },
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        typing: bool,
    },
    IncomingCall(Call),
    CallUpdated(Call),
    CallSignal {
        from_user_id: UserId,
        signal: JsonValue,
    },
    /// 客户端事件被拒绝时回给该连接
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::UserOnline { .. } => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::MessageUpdated(_) => "message_updated",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::MessageReaction(_) => "message_reaction",
            ServerEvent::MessageStatus { .. } => "message_status",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::IncomingCall(_) => "incoming_call",
            ServerEvent::CallUpdated(_) => "call_updated",
            ServerEvent::CallSignal { .. } => "call_signal",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// 客户端发往服务器的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate {
        user_id: UserId,
    },
    TypingStart {
        chat_id: ChatId,
        user_id: UserId,
    },
    TypingStop {
        chat_id: ChatId,
        user_id: UserId,
    },
    MessageDelivered {
        message_id: MessageId,
        user_id: UserId,
    },
    MessageRead {
        message_id: MessageId,
        user_id: UserId,
    },
    CallSignal {
        target_user_id: UserId,
        signal: JsonValue,
    },
}

impl ClientEvent {
    /// 回执类事件对应的回执种类
    pub fn receipt(&self) -> Option<(MessageId, UserId, ReceiptKind)> {
        match self {
            ClientEvent::MessageDelivered {
                message_id,
                user_id,
            } => Some((*message_id, *user_id, ReceiptKind::Delivered)),
            ClientEvent::MessageRead {
                message_id,
                user_id,
            } => Some((*message_id, *user_id, ReceiptKind::Read)),
            _ => None,
        }
    }
}
