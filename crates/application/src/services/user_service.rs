use domain::{
    Contact, ContactId, Device, DeviceId, DeviceType, DomainError, User, UserId,
    UserProfileUpdate,
};
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;
use crate::services::ServiceDependencies;

/// 搜索结果上限
const SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub device_name: String,
    pub device_type: DeviceType,
    pub public_key: String,
}

/// 身份校验通过后的注册请求（手机号/邮箱由外部校验）
#[derive(Debug, Clone)]
pub struct RegisterDeviceRequest {
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub user: User,
    pub device: Device,
    /// 本次注册是否新建了用户
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct AddContactRequest {
    pub user_id: UserId,
    pub phone_number: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactEntry {
    pub contact: Contact,
    pub user: User,
}

pub struct UserService {
    deps: ServiceDependencies,
}

impl UserService {
    pub fn new(deps: ServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register_device(
        &self,
        request: RegisterDeviceRequest,
    ) -> Result<Registration, ApplicationError> {
        let now = self.deps.clock.now();
        // 先构造候选用户，顺带完成手机号/邮箱校验
        let candidate = User::register(
            UserId::generate(),
            request.phone_number,
            request.email,
            request.display_name,
            now,
        )?;

        let users = &self.deps.repositories.users;
        let mut existing = None;
        if let Some(phone) = candidate.phone_number.as_deref() {
            existing = users.find_by_phone(phone).await?;
        }
        if existing.is_none() {
            if let Some(email) = candidate.email.as_deref() {
                existing = users.find_by_email(email).await?;
            }
        }

        let (user, created) = match existing {
            Some(user) => (user, false),
            None => {
                let user = users.create(candidate).await?;
                tracing::info!(user_id = %user.id, "新用户注册");
                (user, true)
            }
        };

        let device = Device::register(
            DeviceId::generate(),
            user.id,
            request.device.device_name,
            request.device.device_type,
            request.device.public_key,
            now,
        )?;
        let device = self.deps.repositories.devices.create(device).await?;
        tracing::info!(user_id = %user.id, device_id = %device.id, "设备已登记");

        Ok(Registration {
            user,
            device,
            created,
        })
    }

    pub async fn get_profile(&self, user_id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .repositories
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user", user_id).into())
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        update: UserProfileUpdate,
    ) -> Result<User, ApplicationError> {
        let mut user = self.get_profile(user_id).await?;
        if update.is_empty() {
            return Ok(user);
        }
        user.apply_update(update)?;
        Ok(self.deps.repositories.users.update(user).await?)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<User>, ApplicationError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .deps
            .repositories
            .users
            .search(query, SEARCH_LIMIT)
            .await?)
    }

    /// 按手机号或用户名添加联系人，重复添加返回已有记录
    pub async fn add_contact(&self, request: AddContactRequest) -> Result<Contact, ApplicationError> {
        let users = &self.deps.repositories.users;
        let target = match (request.phone_number.as_deref(), request.username.as_deref()) {
            (Some(phone), _) => users
                .find_by_phone(phone.trim())
                .await?
                .ok_or_else(|| DomainError::not_found("user", phone))?,
            (None, Some(username)) => users
                .find_by_username(username.trim())
                .await?
                .ok_or_else(|| DomainError::not_found("user", username))?,
            (None, None) => {
                return Err(DomainError::invalid_argument(
                    "contact",
                    "phone_number or username required",
                )
                .into())
            }
        };

        let contact = Contact::new(
            ContactId::generate(),
            request.user_id,
            target.id,
            self.deps.clock.now(),
        )?;
        Ok(self
            .deps
            .repositories
            .contacts
            .create_if_absent(contact)
            .await?)
    }

    pub async fn list_contacts(&self, user_id: UserId) -> Result<Vec<ContactEntry>, ApplicationError> {
        let contacts = self.deps.repositories.contacts.list_for_user(user_id).await?;
        let mut entries = Vec::with_capacity(contacts.len());
        for contact in contacts {
            // 已不存在的用户直接跳过
            if let Some(user) = self
                .deps
                .repositories
                .users
                .find_by_id(contact.contact_user_id)
                .await?
            {
                entries.push(ContactEntry { contact, user });
            }
        }
        Ok(entries)
    }
}
