//! 记录存储的能力接口
//!
//! 存储只需支持按 id 查找、条件扫描、单文档原子更新。各实现必须保证
//! `modify` 对同一文档是原子的：读取、执行变更闭包、写回之间不会插入其他写入，
//! 闭包返回错误时文档保持原样。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Call, CallId, Chat, ChatId, Contact, Device, DomainError, Message, MessageId,
    RepositoryError, Status, StatusId, Timestamp, User, UserId,
};

/// 单文档原子变更
pub type Mutation<T> = Box<dyn FnOnce(&mut T) -> Result<(), DomainError> + Send>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    /// 用户名/昵称不区分大小写的子串匹配，手机号子串匹配
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<User>, RepositoryError>;
    async fn touch_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn create(&self, device: Device) -> Result<Device, RepositoryError>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Device>, RepositoryError>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// 已存在相同 (user, contact) 时返回已有记录
    async fn create_if_absent(&self, contact: Contact) -> Result<Contact, RepositoryError>;
    /// 未被屏蔽的联系人
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Contact>, RepositoryError>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn create(&self, chat: Chat) -> Result<Chat, RepositoryError>;
    /// 单聊的“查找或创建”，同一无序用户对最多一个会话
    async fn create_direct(&self, chat: Chat) -> Result<Chat, RepositoryError>;
    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError>;
    async fn touch(&self, id: ChatId, at: Timestamp) -> Result<(), RepositoryError>;
}

/// 消息分页查询
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub chat_id: ChatId,
    pub viewer: UserId,
    pub limit: u32,
    pub before: Option<Timestamp>,
    pub before_sequence: Option<u64>,
    pub now: Timestamp,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 写入新消息并分配会话内序号
    async fn insert(&self, message: Message) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    async fn modify(
        &self,
        id: MessageId,
        mutation: Mutation<Message>,
    ) -> Result<Message, RepositoryError>;
    /// 对 viewer 可见的最近 `limit` 条消息，按 (created_at, sequence) 升序返回
    async fn list_visible(&self, query: MessageQuery) -> Result<Vec<Message>, RepositoryError>;
    /// 会话中最后一条未被全员删除的消息
    async fn latest(&self, chat_id: ChatId) -> Result<Option<Message>, RepositoryError>;
}

#[async_trait]
pub trait StatusRepository: Send + Sync {
    async fn create(&self, status: Status) -> Result<Status, RepositoryError>;
    async fn find_by_id(&self, id: StatusId) -> Result<Option<Status>, RepositoryError>;
    /// owners 发布的、在 now 时刻仍有效的动态，按创建时间倒序
    async fn list_live(
        &self,
        owners: &[UserId],
        now: Timestamp,
    ) -> Result<Vec<Status>, RepositoryError>;
    async fn modify(
        &self,
        id: StatusId,
        mutation: Mutation<Status>,
    ) -> Result<Status, RepositoryError>;
}

#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn create(&self, call: Call) -> Result<Call, RepositoryError>;
    async fn find_by_id(&self, id: CallId) -> Result<Option<Call>, RepositoryError>;
    async fn modify(&self, id: CallId, mutation: Mutation<Call>) -> Result<Call, RepositoryError>;
}

/// 一组存储实现
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub chats: Arc<dyn ChatRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub statuses: Arc<dyn StatusRepository>,
    pub calls: Arc<dyn CallRepository>,
}
