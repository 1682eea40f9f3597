use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use domain::{
    Chat, ChatId, DomainError, Message, MessageDraft, MessageId, MessageType, ReceiptKind,
    Timestamp, UserId,
};
use serde_json::Value as JsonValue;

use crate::error::ApplicationError;
use crate::events::ServerEvent;
use crate::repository::MessageQuery;
use crate::services::ServiceDependencies;

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub chat_id: ChatId,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<MessageId>,
    pub attachments: Vec<JsonValue>,
    pub encryption_data: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct EditMessageRequest {
    pub editor_id: UserId,
    pub message_id: MessageId,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct DeleteMessageRequest {
    pub requester_id: UserId,
    pub message_id: MessageId,
    pub for_everyone: bool,
}

#[derive(Debug, Clone)]
pub struct ReceiptRequest {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub kind: ReceiptKind,
}

#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub viewer_id: UserId,
    pub chat_id: ChatId,
    pub limit: Option<u32>,
    pub before: Option<Timestamp>,
    pub before_sequence: Option<u64>,
}

pub struct MessageService {
    deps: ServiceDependencies,
}

impl MessageService {
    pub fn new(deps: ServiceDependencies) -> Self {
        Self { deps }
    }

    async fn load_chat(&self, chat_id: ChatId) -> Result<Chat, ApplicationError> {
        self.deps
            .repositories
            .chats
            .find_by_id(chat_id)
            .await?
            .ok_or_else(|| DomainError::not_found("chat", chat_id).into())
    }

    async fn load_message(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.deps
            .repositories
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::not_found("message", message_id).into())
    }

    /// 加载消息并确认操作者是其所在会话的成员
    async fn load_for_member(
        &self,
        user_id: UserId,
        message_id: MessageId,
        action: &str,
    ) -> Result<Message, ApplicationError> {
        let message = self.load_message(message_id).await?;
        let chat = self.load_chat(message.chat_id).await?;
        chat.ensure_participant(user_id, action)?;
        Ok(message)
    }

    pub async fn send(&self, request: SendMessageRequest) -> Result<Message, ApplicationError> {
        let chat = self.load_chat(request.chat_id).await?;
        chat.ensure_can_post(request.sender_id)?;

        if let Some(reply_to) = request.reply_to {
            let original = self.deps.repositories.messages.find_by_id(reply_to).await?;
            if original.map(|m| m.chat_id) != Some(chat.id) {
                return Err(DomainError::invalid_argument(
                    "reply_to",
                    "replied message does not belong to this chat",
                )
                .into());
            }
        }

        let now = self.deps.clock.now();
        let expires_after = chat
            .settings
            .disappearing_timer
            .map(|secs| Duration::seconds(secs as i64));
        let message = Message::compose(
            MessageId::generate(),
            MessageDraft {
                chat_id: chat.id,
                sender_id: request.sender_id,
                content: request.content,
                message_type: request.message_type,
                reply_to: request.reply_to,
                attachments: request.attachments,
                encryption_data: request.encryption_data,
            },
            now,
            expires_after,
        )?;

        let stored = self.deps.repositories.messages.insert(message).await?;

        // 消息一旦写入就不会回滚，更新时间失败只记录
        if let Err(err) = self.deps.repositories.chats.touch(chat.id, now).await {
            tracing::warn!(chat_id = %chat.id, error = %err, "更新会话时间失败");
        }

        tracing::info!(
            chat_id = %stored.chat_id,
            message_id = %stored.id,
            sequence = stored.sequence,
            "消息已发送"
        );
        self.deps
            .bus
            .broadcast_to_room(stored.chat_id, ServerEvent::NewMessage(stored.clone()), None)
            .await;
        Ok(stored)
    }

    pub async fn edit(&self, request: EditMessageRequest) -> Result<Message, ApplicationError> {
        let now = self.deps.clock.now();
        let EditMessageRequest {
            editor_id,
            message_id,
            content,
        } = request;

        let updated = self
            .deps
            .repositories
            .messages
            .modify(
                message_id,
                Box::new(move |message: &mut Message| message.edit(editor_id, content, now)),
            )
            .await
            .map_err(|err| not_found_as_message(err, message_id))?;

        self.deps
            .bus
            .broadcast_to_room(updated.chat_id, ServerEvent::MessageUpdated(updated.clone()), None)
            .await;
        Ok(updated)
    }

    pub async fn delete(&self, request: DeleteMessageRequest) -> Result<Message, ApplicationError> {
        let DeleteMessageRequest {
            requester_id,
            message_id,
            for_everyone,
        } = request;

        if !for_everyone {
            self.load_for_member(requester_id, message_id, "delete message")
                .await?;
            let updated = self
                .deps
                .repositories
                .messages
                .modify(
                    message_id,
                    Box::new(move |message: &mut Message| {
                        message.delete_for(requester_id);
                        Ok(())
                    }),
                )
                .await
                .map_err(|err| not_found_as_message(err, message_id))?;
            tracing::debug!(message_id = %message_id, user_id = %requester_id, "消息仅对自己删除");
            return Ok(updated);
        }

        let now = self.deps.clock.now();
        let window = self.deps.policy.delete_for_everyone_window;
        let tombstoned = Arc::new(AtomicBool::new(false));
        let flag = tombstoned.clone();
        let updated = self
            .deps
            .repositories
            .messages
            .modify(
                message_id,
                Box::new(move |message: &mut Message| {
                    let changed = message.delete_for_everyone(requester_id, now, window)?;
                    flag.store(changed, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .map_err(|err| not_found_as_message(err, message_id))?;

        if !tombstoned.load(Ordering::SeqCst) {
            tracing::debug!(message_id = %message_id, "消息已被全员删除，跳过广播");
            return Ok(updated);
        }

        tracing::info!(chat_id = %updated.chat_id, message_id = %message_id, "消息已为所有人删除");
        self.deps
            .bus
            .broadcast_to_room(
                updated.chat_id,
                ServerEvent::MessageDeleted {
                    message_id,
                    chat_id: updated.chat_id,
                    for_everyone: true,
                },
                None,
            )
            .await;
        Ok(updated)
    }

    pub async fn react(
        &self,
        user_id: UserId,
        message_id: MessageId,
        emoji: String,
    ) -> Result<Message, ApplicationError> {
        self.load_for_member(user_id, message_id, "react to message")
            .await?;
        let now = self.deps.clock.now();
        let updated = self
            .deps
            .repositories
            .messages
            .modify(
                message_id,
                Box::new(move |message: &mut Message| message.react(user_id, emoji, now)),
            )
            .await
            .map_err(|err| not_found_as_message(err, message_id))?;

        self.deps
            .bus
            .broadcast_to_room(updated.chat_id, ServerEvent::MessageReaction(updated.clone()), None)
            .await;
        Ok(updated)
    }

    /// 投递/已读回执
    pub async fn set_status(&self, request: ReceiptRequest) -> Result<Message, ApplicationError> {
        let ReceiptRequest {
            user_id,
            message_id,
            kind,
        } = request;
        self.load_for_member(user_id, message_id, "acknowledge message")
            .await?;
        let now = self.deps.clock.now();
        let updated = self
            .deps
            .repositories
            .messages
            .modify(
                message_id,
                Box::new(move |message: &mut Message| {
                    message.record_receipt(user_id, kind, now)
                }),
            )
            .await
            .map_err(|err| not_found_as_message(err, message_id))?;

        tracing::debug!(message_id = %message_id, user_id = %user_id, status = ?updated.status, "回执已记录");
        self.deps
            .bus
            .broadcast_to_room(
                updated.chat_id,
                ServerEvent::MessageStatus {
                    message_id,
                    status: updated.status,
                    user_id,
                },
                None,
            )
            .await;
        Ok(updated)
    }

    /// 不检查成员资格的内部读取，调用方负责边界校验
    pub async fn list(&self, request: HistoryRequest) -> Result<Vec<Message>, ApplicationError> {
        let query = MessageQuery {
            chat_id: request.chat_id,
            viewer: request.viewer_id,
            limit: self.deps.policy.history_limit(request.limit),
            before: request.before,
            before_sequence: request.before_sequence,
            now: self.deps.clock.now(),
        };
        Ok(self.deps.repositories.messages.list_visible(query).await?)
    }

    /// 对外的历史记录读取：只有会话成员可以读取
    pub async fn history(&self, request: HistoryRequest) -> Result<Vec<Message>, ApplicationError> {
        let chat = self.load_chat(request.chat_id).await?;
        chat.ensure_participant(request.viewer_id, "read messages")?;
        self.list(request).await
    }
}

fn not_found_as_message(err: domain::RepositoryError, message_id: MessageId) -> ApplicationError {
    match err {
        domain::RepositoryError::NotFound => DomainError::not_found("message", message_id).into(),
        other => other.into(),
    }
}
