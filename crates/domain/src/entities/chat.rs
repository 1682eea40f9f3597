//! 会话实体
//!
//! 单聊按无序用户对唯一；群组与频道由创建者担任 owner 与首位管理员。

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChatId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    Group,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// 仅管理员可发言
    pub only_admins_message: bool,
    /// 阅后即焚计时（秒）
    pub disappearing_timer: Option<u64>,
    pub encryption_enabled: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            only_admins_message: false,
            disappearing_timer: None,
            encryption_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
    pub participants: Vec<UserId>,
    pub admins: Vec<UserId>,
    pub owner_id: Option<UserId>,
    pub settings: ChatSettings,
    pub invite_link: Option<String>,
    pub pinned_message_id: Option<MessageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Chat {
    pub fn new_direct(
        id: ChatId,
        requester: UserId,
        other: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if requester == other {
            return Err(DomainError::invalid_argument(
                "participants",
                "direct chat needs another participant",
            ));
        }
        Ok(Self {
            id,
            kind: ChatKind::Direct,
            name: None,
            avatar_url: None,
            description: None,
            participants: vec![requester, other],
            admins: Vec::new(),
            owner_id: None,
            settings: ChatSettings::default(),
            invite_link: None,
            pinned_message_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn new_group(
        id: ChatId,
        kind: ChatKind,
        name: Option<String>,
        owner: UserId,
        members: &[UserId],
        invite_token: String,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if kind == ChatKind::Direct {
            return Err(DomainError::invalid_argument(
                "type",
                "use a direct chat for two-party conversations",
            ));
        }
        let name = name.map(|n| n.trim().to_owned()).filter(|n| !n.is_empty());
        if let Some(name) = &name {
            if name.chars().count() > 100 {
                return Err(DomainError::invalid_argument("name", "too long"));
            }
        }

        let mut participants = vec![owner];
        for member in members {
            if !participants.contains(member) {
                participants.push(*member);
            }
        }

        Ok(Self {
            id,
            kind,
            name,
            avatar_url: None,
            description: None,
            participants,
            admins: vec![owner],
            owner_id: Some(owner),
            settings: ChatSettings::default(),
            invite_link: Some(invite_token),
            pinned_message_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 单聊去重键：与参与者顺序无关
    pub fn direct_key(a: UserId, b: UserId) -> String {
        if a <= b {
            format!("{a}:{b}")
        } else {
            format!("{b}:{a}")
        }
    }

    /// 单聊返回去重键，其他类型返回 None
    pub fn pair_key(&self) -> Option<String> {
        match (self.kind, self.participants.as_slice()) {
            (ChatKind::Direct, [a, b]) => Some(Self::direct_key(*a, *b)),
            _ => None,
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn ensure_participant(&self, user_id: UserId, action: &str) -> Result<(), DomainError> {
        if self.is_participant(user_id) {
            Ok(())
        } else {
            Err(DomainError::permission_denied(format!(
                "{action}: not a participant of chat {}",
                self.id
            )))
        }
    }

    /// 发言权限：必须是成员，开启“仅管理员发言”时还必须是管理员
    pub fn ensure_can_post(&self, user_id: UserId) -> Result<(), DomainError> {
        self.ensure_participant(user_id, "send message")?;
        if self.settings.only_admins_message && !self.is_admin(user_id) {
            return Err(DomainError::permission_denied(
                "send message: only admins can post in this chat",
            ));
        }
        Ok(())
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn direct_key_is_order_independent() {
        let a = UserId::generate();
        let b = UserId::generate();
        assert_eq!(Chat::direct_key(a, b), Chat::direct_key(b, a));
    }

    #[test]
    fn direct_chat_rejects_self() {
        let a = UserId::generate();
        assert!(Chat::new_direct(ChatId::generate(), a, a, Utc::now()).is_err());
    }

    #[test]
    fn group_owner_is_admin_and_members_are_deduplicated() {
        let owner = UserId::generate();
        let other = UserId::generate();
        let chat = Chat::new_group(
            ChatId::generate(),
            ChatKind::Group,
            Some(" friends ".into()),
            owner,
            &[other, owner, other],
            "token".into(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(chat.participants, vec![owner, other]);
        assert_eq!(chat.owner_id, Some(owner));
        assert!(chat.is_admin(owner));
        assert_eq!(chat.name.as_deref(), Some("friends"));
        assert!(chat.pair_key().is_none());
    }

    #[test]
    fn admin_only_chat_blocks_members_from_posting() {
        let owner = UserId::generate();
        let member = UserId::generate();
        let mut chat = Chat::new_group(
            ChatId::generate(),
            ChatKind::Channel,
            None,
            owner,
            &[member],
            "token".into(),
            Utc::now(),
        )
        .unwrap();
        chat.settings.only_admins_message = true;
        assert!(chat.ensure_can_post(owner).is_ok());
        assert!(matches!(
            chat.ensure_can_post(member),
            Err(DomainError::PermissionDenied { .. })
        ));
    }
}
