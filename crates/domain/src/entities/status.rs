//! 24 小时动态

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{StatusId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusContentType {
    Text,
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPrivacy {
    Contacts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub user_id: UserId,
    pub content_type: StatusContentType,
    pub content: String,
    pub media_url: Option<String>,
    pub background_color: Option<String>,
    pub viewers: Vec<UserId>,
    pub privacy: StatusPrivacy,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct StatusDraft {
    pub user_id: UserId,
    pub content_type: StatusContentType,
    pub content: String,
    pub media_url: Option<String>,
    pub background_color: Option<String>,
}

impl Status {
    pub fn post(
        id: StatusId,
        draft: StatusDraft,
        now: Timestamp,
        ttl: Duration,
    ) -> Result<Self, DomainError> {
        let media_url = draft.media_url.filter(|url| !url.trim().is_empty());
        match draft.content_type {
            StatusContentType::Text if draft.content.trim().is_empty() => {
                return Err(DomainError::invalid_argument("content", "cannot be empty"));
            }
            StatusContentType::Image | StatusContentType::Video if media_url.is_none() => {
                return Err(DomainError::invalid_argument(
                    "media_url",
                    "media status requires a media url",
                ));
            }
            _ => {}
        }

        Ok(Self {
            id,
            user_id: draft.user_id,
            content_type: draft.content_type,
            content: draft.content,
            media_url,
            background_color: draft.background_color,
            viewers: Vec::new(),
            privacy: StatusPrivacy::Contacts,
            created_at: now,
            expires_at: now + ttl,
        })
    }

    /// 过期只是读取时的过滤条件，不存在删除事件
    pub fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    /// 浏览者集合只增不减，返回是否为新浏览者
    pub fn add_viewer(&mut self, viewer: UserId) -> bool {
        if viewer == self.user_id || self.viewers.contains(&viewer) {
            return false;
        }
        self.viewers.push(viewer);
        true
    }
}
