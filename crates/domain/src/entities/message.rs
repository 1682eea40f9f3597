//! 消息实体
//!
//! 消息生命周期：发送 → 编辑 / 表情回应 / 回执 → 删除（仅自己可见性或全员墓碑）。

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::DomainError;
use crate::value_objects::{ChatId, MessageId, Timestamp, UserId};

/// 全员删除后替换正文的占位文本
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Contact,
}

/// 消息级聚合状态，只前进不后退
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// 客户端上报的回执种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

impl From<ReceiptKind> for MessageStatus {
    fn from(kind: ReceiptKind) -> Self {
        match kind {
            ReceiptKind::Delivered => MessageStatus::Delivered,
            ReceiptKind::Read => MessageStatus::Read,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: Timestamp,
}

/// 单个接收者的投递/已读时间
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
}

/// 发送请求中已校验过成员资格的部分
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<MessageId>,
    pub attachments: Vec<JsonValue>,
    pub encryption_data: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    /// 会话内单调递增序号，由存储在写入时分配
    pub sequence: u64,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<MessageId>,
    pub forwarded_from: Option<MessageId>,
    pub attachments: Vec<JsonValue>,
    pub reactions: Vec<Reaction>,
    pub status: MessageStatus,
    #[serde(default)]
    pub receipts: BTreeMap<UserId, Receipt>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub deleted_for: BTreeSet<UserId>,
    pub encryption_data: Option<JsonValue>,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl Message {
    pub fn compose(
        id: MessageId,
        draft: MessageDraft,
        created_at: Timestamp,
        expires_after: Option<Duration>,
    ) -> Result<Self, DomainError> {
        if draft.message_type == MessageType::Text && draft.content.trim().is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        if draft.message_type != MessageType::Text
            && draft.content.trim().is_empty()
            && draft.attachments.is_empty()
        {
            return Err(DomainError::invalid_argument(
                "attachments",
                "media message needs content or attachments",
            ));
        }

        Ok(Self {
            id,
            chat_id: draft.chat_id,
            sender_id: draft.sender_id,
            sequence: 0,
            content: draft.content,
            message_type: draft.message_type,
            reply_to: draft.reply_to,
            forwarded_from: None,
            attachments: draft.attachments,
            reactions: Vec::new(),
            status: MessageStatus::Sent,
            receipts: BTreeMap::new(),
            is_edited: false,
            is_deleted: false,
            deleted_for: BTreeSet::new(),
            encryption_data: draft.encryption_data,
            created_at,
            edited_at: None,
            expires_at: expires_after.map(|ttl| created_at + ttl),
        })
    }

    /// 编辑只允许发送者，且没有时间限制
    pub fn edit(
        &mut self,
        editor: UserId,
        content: String,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if editor != self.sender_id {
            return Err(DomainError::permission_denied(
                "edit message: only the sender can edit",
            ));
        }
        if self.is_deleted {
            return Err(DomainError::failed_precondition("message was deleted"));
        }
        if content.trim().is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        self.content = content;
        self.is_edited = true;
        self.edited_at = Some(now);
        Ok(())
    }

    /// 全员删除：仅发送者，且在窗口期内。正文不可恢复。
    ///
    /// 返回 `false` 表示消息此前已被全员删除，本次没有变更。
    pub fn delete_for_everyone(
        &mut self,
        requester: UserId,
        now: Timestamp,
        window: Duration,
    ) -> Result<bool, DomainError> {
        if requester != self.sender_id {
            return Err(DomainError::permission_denied(
                "delete for everyone: only the sender can delete",
            ));
        }
        if self.is_deleted {
            return Ok(false);
        }
        if now - self.created_at > window {
            return Err(DomainError::failed_precondition("time limit exceeded"));
        }
        self.content = DELETED_PLACEHOLDER.to_owned();
        self.attachments.clear();
        self.encryption_data = None;
        self.is_deleted = true;
        Ok(true)
    }

    /// 仅对自己隐藏，重复调用无副作用
    pub fn delete_for(&mut self, user_id: UserId) -> bool {
        self.deleted_for.insert(user_id)
    }

    /// 每个用户最多一个回应，新回应替换旧回应
    pub fn react(
        &mut self,
        user_id: UserId,
        emoji: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let emoji = emoji.into().trim().to_owned();
        if emoji.is_empty() {
            return Err(DomainError::invalid_argument("emoji", "cannot be empty"));
        }
        if emoji.chars().count() > 16 {
            return Err(DomainError::invalid_argument("emoji", "too long"));
        }
        if self.is_deleted {
            return Err(DomainError::failed_precondition("message was deleted"));
        }
        self.reactions.retain(|reaction| reaction.user_id != user_id);
        self.reactions.push(Reaction {
            user_id,
            emoji,
            created_at: now,
        });
        Ok(())
    }

    pub fn reaction_of(&self, user_id: UserId) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.user_id == user_id)
    }

    /// 记录接收者回执。已读隐含已投递，时间戳不回退，聚合状态不回退。
    pub fn record_receipt(
        &mut self,
        user_id: UserId,
        kind: ReceiptKind,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if user_id == self.sender_id {
            return Err(DomainError::invalid_argument(
                "user_id",
                "sender cannot acknowledge their own message",
            ));
        }
        let receipt = self.receipts.entry(user_id).or_default();
        receipt.delivered_at.get_or_insert(now);
        if kind == ReceiptKind::Read {
            receipt.read_at.get_or_insert(now);
        }
        self.status = self.status.max(MessageStatus::from(kind));
        Ok(())
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// 消息列表对某个用户的可见性
    pub fn is_visible_to(&self, user_id: UserId, now: Timestamp) -> bool {
        !self.is_deleted && !self.deleted_for.contains(&user_id) && !self.is_expired(now)
    }
}
