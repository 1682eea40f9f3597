//! 用户、设备与联系人实体

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ContactId, DeviceId, Timestamp, UserId, Username};

/// 资料字段的可见范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Everyone,
    Contacts,
    Nobody,
}

/// 隐私设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacySettings {
    pub profile_photo: Visibility,
    pub about: Visibility,
    pub last_seen: Visibility,
    pub status: Visibility,
    pub read_receipts: bool,
    pub online_status: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            profile_photo: Visibility::Everyone,
            about: Visibility::Everyone,
            last_seen: Visibility::Everyone,
            status: Visibility::Contacts,
            read_receipts: true,
            online_status: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub username: Option<Username>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub about: String,
    pub public_key: Option<String>,
    pub identity_key: Option<String>,
    pub privacy_settings: PrivacySettings,
    pub created_at: Timestamp,
    pub last_seen: Timestamp,
}

/// 资料更新：只列出允许修改的字段，未知字段在边界处被拒绝
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserProfileUpdate {
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub avatar_url: Option<String>,
    pub username: Option<String>,
    pub privacy_settings: Option<PrivacySettings>,
}

impl UserProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.about.is_none()
            && self.avatar_url.is_none()
            && self.username.is_none()
            && self.privacy_settings.is_none()
    }
}

impl User {
    /// 身份校验通过后首次出现的手机号/邮箱创建用户
    pub fn register(
        id: UserId,
        phone_number: Option<String>,
        email: Option<String>,
        display_name: Option<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let phone_number = normalize(phone_number);
        let email = normalize(email);
        if phone_number.is_none() && email.is_none() {
            return Err(DomainError::invalid_argument(
                "identity",
                "phone number or email required",
            ));
        }
        if let Some(email) = &email {
            if !email.contains('@') {
                return Err(DomainError::invalid_argument("email", "must contain '@'"));
            }
        }

        let display_name = normalize(display_name)
            .or_else(|| phone_number.clone())
            .or_else(|| email.clone())
            .unwrap_or_else(|| "User".to_owned());
        let simple = id.0.simple().to_string();
        let username = Username::parse(format!("user_{}", &simple[..8]))?;

        Ok(Self {
            id,
            phone_number,
            email,
            username: Some(username),
            display_name,
            avatar_url: None,
            about: String::new(),
            public_key: None,
            identity_key: None,
            privacy_settings: PrivacySettings::default(),
            created_at: now,
            last_seen: now,
        })
    }

    pub fn apply_update(&mut self, update: UserProfileUpdate) -> Result<(), DomainError> {
        if let Some(display_name) = update.display_name {
            let display_name = display_name.trim();
            if display_name.is_empty() {
                return Err(DomainError::invalid_argument(
                    "display_name",
                    "cannot be empty",
                ));
            }
            if display_name.chars().count() > 64 {
                return Err(DomainError::invalid_argument("display_name", "too long"));
            }
            self.display_name = display_name.to_owned();
        }
        if let Some(username) = update.username {
            self.username = Some(Username::parse(username)?);
        }
        if let Some(about) = update.about {
            if about.chars().count() > 140 {
                return Err(DomainError::invalid_argument("about", "too long"));
            }
            self.about = about;
        }
        if let Some(avatar_url) = update.avatar_url {
            self.avatar_url = normalize(Some(avatar_url));
        }
        if let Some(privacy_settings) = update.privacy_settings {
            self.privacy_settings = privacy_settings;
        }
        Ok(())
    }

    pub fn touch_last_seen(&mut self, now: Timestamp) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Ios,
    Android,
    Desktop,
    Web,
}

/// 一次会话注册对应的设备，公钥对本系统不透明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub user_id: UserId,
    pub device_name: String,
    pub device_type: DeviceType,
    pub public_key: String,
    pub created_at: Timestamp,
    pub last_active: Timestamp,
    pub is_active: bool,
}

impl Device {
    pub fn register(
        id: DeviceId,
        user_id: UserId,
        device_name: impl Into<String>,
        device_type: DeviceType,
        public_key: impl Into<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let device_name = device_name.into().trim().to_owned();
        if device_name.is_empty() {
            return Err(DomainError::invalid_argument("device_name", "cannot be empty"));
        }
        let public_key = public_key.into();
        if public_key.trim().is_empty() {
            return Err(DomainError::invalid_argument("public_key", "cannot be empty"));
        }
        Ok(Self {
            id,
            user_id,
            device_name,
            device_type,
            public_key,
            created_at: now,
            last_active: now,
            is_active: true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub user_id: UserId,
    pub contact_user_id: UserId,
    pub nickname: Option<String>,
    pub is_blocked: bool,
    pub created_at: Timestamp,
}

impl Contact {
    pub fn new(
        id: ContactId,
        user_id: UserId,
        contact_user_id: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if user_id == contact_user_id {
            return Err(DomainError::invalid_argument(
                "contact",
                "cannot add yourself as a contact",
            ));
        }
        Ok(Self {
            id,
            user_id,
            contact_user_id,
            nickname: None,
            is_blocked: false,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn register_requires_phone_or_email() {
        let err = User::register(UserId::generate(), None, Some("  ".into()), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));
    }

    #[test]
    fn register_defaults_display_name_to_identity() {
        let user = User::register(
            UserId::generate(),
            Some("+15550100".into()),
            None,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(user.display_name, "+15550100");
        assert!(user.username.unwrap().as_str().starts_with("user_"));
    }

    #[test]
    fn profile_update_touches_only_given_fields() {
        let mut user = User::register(
            UserId::generate(),
            None,
            Some("a@example.com".into()),
            Some("Alice".into()),
            Utc::now(),
        )
        .unwrap();
        user.apply_update(UserProfileUpdate {
            about: Some("busy".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(user.display_name, "Alice");
        assert_eq!(user.about, "busy");
    }

    #[test]
    fn profile_update_rejects_unknown_fields() {
        let parsed = serde_json::from_str::<UserProfileUpdate>(r#"{"phone_number":"1"}"#);
        assert!(parsed.is_err());
    }
}
