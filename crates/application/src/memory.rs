//! 进程内存储
//!
//! 单机部署与测试使用。每类记录一把读写锁，`modify` 在写锁内完成
//! “读取 → 变更 → 写回”，因此对同一文档是原子的。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Call, CallId, Chat, ChatId, Contact, Device, Message, MessageId, RepositoryError, Status,
    StatusId, Timestamp, User, UserId,
};
use tokio::sync::RwLock;

use crate::repository::{
    CallRepository, ChatRepository, ContactRepository, DeviceRepository, MessageQuery,
    MessageRepository, Mutation, Repositories, StatusRepository, UserRepository,
};

#[derive(Default)]
struct MessageTable {
    records: HashMap<MessageId, Message>,
    /// 会话内最后分配的序号
    sequences: HashMap<ChatId, u64>,
}

#[derive(Default)]
struct ChatTable {
    records: HashMap<ChatId, Chat>,
    direct_index: HashMap<String, ChatId>,
}

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, User>>,
    devices: RwLock<Vec<Device>>,
    contacts: RwLock<Vec<Contact>>,
    chats: RwLock<ChatTable>,
    messages: RwLock<MessageTable>,
    statuses: RwLock<HashMap<StatusId, Status>>,
    calls: RwLock<HashMap<CallId, Call>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一份存储以各仓储接口的形式暴露
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            users: self.clone(),
            devices: self.clone(),
            contacts: self.clone(),
            chats: self.clone(),
            messages: self.clone(),
            statuses: self.clone(),
            calls: self.clone(),
        }
    }
}

fn apply<T: Clone>(record: &mut T, mutation: Mutation<T>) -> Result<T, RepositoryError> {
    let mut draft = record.clone();
    mutation(&mut draft).map_err(RepositoryError::Rejected)?;
    *record = draft;
    Ok(record.clone())
}

fn identity_taken(existing: &User, candidate: &User) -> bool {
    let same = |a: &Option<String>, b: &Option<String>| a.is_some() && a == b;
    existing.id != candidate.id
        && (same(&existing.phone_number, &candidate.phone_number)
            || same(&existing.email, &candidate.email)
            || (existing.username.is_some() && existing.username == candidate.username))
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || users.values().any(|u| identity_taken(u, &user)) {
            return Err(RepositoryError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(RepositoryError::NotFound);
        }
        if users.values().any(|u| identity_taken(u, &user)) {
            return Err(RepositoryError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.phone_number.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.username.as_ref().is_some_and(|n| n.as_str() == username))
            .cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<User>, RepositoryError> {
        let needle = query.to_lowercase();
        let users = self.users.read().await;
        let mut found: Vec<User> = users
            .values()
            .filter(|u| {
                u.display_name.to_lowercase().contains(&needle)
                    || u
                        .username
                        .as_ref()
                        .is_some_and(|n| n.as_str().to_lowercase().contains(&needle))
                    || u.phone_number.as_deref().is_some_and(|p| p.contains(query))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        found.truncate(limit);
        Ok(found)
    }

    async fn touch_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.touch_last_seen(at);
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn create(&self, device: Device) -> Result<Device, RepositoryError> {
        let mut devices = self.devices.write().await;
        if devices.iter().any(|d| d.id == device.id) {
            return Err(RepositoryError::Conflict);
        }
        devices.push(device.clone());
        Ok(device)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Device>, RepositoryError> {
        let devices = self.devices.read().await;
        Ok(devices
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn create_if_absent(&self, contact: Contact) -> Result<Contact, RepositoryError> {
        let mut contacts = self.contacts.write().await;
        if let Some(existing) = contacts.iter().find(|c| {
            c.user_id == contact.user_id && c.contact_user_id == contact.contact_user_id
        }) {
            return Ok(existing.clone());
        }
        contacts.push(contact.clone());
        Ok(contact)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Contact>, RepositoryError> {
        let contacts = self.contacts.read().await;
        Ok(contacts
            .iter()
            .filter(|c| c.user_id == user_id && !c.is_blocked)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn create(&self, chat: Chat) -> Result<Chat, RepositoryError> {
        let mut table = self.chats.write().await;
        if table.records.contains_key(&chat.id) {
            return Err(RepositoryError::Conflict);
        }
        if let Some(key) = chat.pair_key() {
            if table.direct_index.contains_key(&key) {
                return Err(RepositoryError::Conflict);
            }
            table.direct_index.insert(key, chat.id);
        }
        table.records.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn create_direct(&self, chat: Chat) -> Result<Chat, RepositoryError> {
        let key = chat
            .pair_key()
            .ok_or_else(|| RepositoryError::storage("create_direct needs a two-party chat"))?;
        let mut table = self.chats.write().await;
        if let Some(existing) = table
            .direct_index
            .get(&key)
            .and_then(|id| table.records.get(id))
        {
            return Ok(existing.clone());
        }
        table.direct_index.insert(key, chat.id);
        table.records.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        Ok(self.chats.read().await.records.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError> {
        let table = self.chats.read().await;
        let mut chats: Vec<Chat> = table
            .records
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn touch(&self, id: ChatId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut table = self.chats.write().await;
        let chat = table.records.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        chat.touch(at);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert(&self, mut message: Message) -> Result<Message, RepositoryError> {
        let mut table = self.messages.write().await;
        if table.records.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        let sequence = table.sequences.entry(message.chat_id).or_insert(0);
        *sequence += 1;
        message.sequence = *sequence;
        table.records.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.messages.read().await.records.get(&id).cloned())
    }

    async fn modify(
        &self,
        id: MessageId,
        mutation: Mutation<Message>,
    ) -> Result<Message, RepositoryError> {
        let mut table = self.messages.write().await;
        let record = table.records.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        apply(record, mutation)
    }

    async fn list_visible(&self, query: MessageQuery) -> Result<Vec<Message>, RepositoryError> {
        let table = self.messages.read().await;
        let mut page: Vec<&Message> = table
            .records
            .values()
            .filter(|m| m.chat_id == query.chat_id)
            .filter(|m| m.is_visible_to(query.viewer, query.now))
            .filter(|m| query.before.map_or(true, |before| m.created_at < before))
            .filter(|m| query.before_sequence.map_or(true, |seq| m.sequence < seq))
            .collect();
        page.sort_by(|a, b| (b.created_at, b.sequence).cmp(&(a.created_at, a.sequence)));
        page.truncate(query.limit as usize);
        page.reverse();
        Ok(page.into_iter().cloned().collect())
    }

    async fn latest(&self, chat_id: ChatId) -> Result<Option<Message>, RepositoryError> {
        let table = self.messages.read().await;
        Ok(table
            .records
            .values()
            .filter(|m| m.chat_id == chat_id && !m.is_deleted)
            .max_by_key(|m| (m.created_at, m.sequence))
            .cloned())
    }
}

#[async_trait]
impl StatusRepository for MemoryStore {
    async fn create(&self, status: Status) -> Result<Status, RepositoryError> {
        let mut statuses = self.statuses.write().await;
        if statuses.contains_key(&status.id) {
            return Err(RepositoryError::Conflict);
        }
        statuses.insert(status.id, status.clone());
        Ok(status)
    }

    async fn find_by_id(&self, id: StatusId) -> Result<Option<Status>, RepositoryError> {
        Ok(self.statuses.read().await.get(&id).cloned())
    }

    async fn list_live(
        &self,
        owners: &[UserId],
        now: Timestamp,
    ) -> Result<Vec<Status>, RepositoryError> {
        let statuses = self.statuses.read().await;
        let mut live: Vec<Status> = statuses
            .values()
            .filter(|s| owners.contains(&s.user_id) && s.is_live(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(live)
    }

    async fn modify(
        &self,
        id: StatusId,
        mutation: Mutation<Status>,
    ) -> Result<Status, RepositoryError> {
        let mut statuses = self.statuses.write().await;
        let record = statuses.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        apply(record, mutation)
    }
}

#[async_trait]
impl CallRepository for MemoryStore {
    async fn create(&self, call: Call) -> Result<Call, RepositoryError> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(&call.id) {
            return Err(RepositoryError::Conflict);
        }
        calls.insert(call.id, call.clone());
        Ok(call)
    }

    async fn find_by_id(&self, id: CallId) -> Result<Option<Call>, RepositoryError> {
        Ok(self.calls.read().await.get(&id).cloned())
    }

    async fn modify(&self, id: CallId, mutation: Mutation<Call>) -> Result<Call, RepositoryError> {
        let mut calls = self.calls.write().await;
        let record = calls.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        apply(record, mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::{DomainError, MessageDraft, MessageType};

    fn text(chat_id: ChatId, sender: UserId, at: Timestamp) -> Message {
        Message::compose(
            MessageId::generate(),
            MessageDraft {
                chat_id,
                sender_id: sender,
                content: "hello".into(),
                message_type: MessageType::Text,
                reply_to: None,
                attachments: Vec::new(),
                encryption_data: None,
            },
            at,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_increasing_sequence_per_chat() {
        let store = Arc::new(MemoryStore::new());
        let repos = store.repositories();
        let chat = ChatId::generate();
        let other = ChatId::generate();
        let sender = UserId::generate();
        let now = Utc::now();

        let first = repos.messages.insert(text(chat, sender, now)).await.unwrap();
        let second = repos.messages.insert(text(chat, sender, now)).await.unwrap();
        let elsewhere = repos.messages.insert(text(other, sender, now)).await.unwrap();

        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(elsewhere.sequence, 1);
    }

    #[tokio::test]
    async fn list_visible_pages_backwards_in_ascending_order() {
        let store = Arc::new(MemoryStore::new());
        let repos = store.repositories();
        let chat = ChatId::generate();
        let sender = UserId::generate();
        let base = Utc::now();

        let mut ids = Vec::new();
        for offset in 0..5 {
            let m = text(chat, sender, base + Duration::seconds(offset));
            ids.push(repos.messages.insert(m).await.unwrap().id);
        }

        let query = MessageQuery {
            chat_id: chat,
            viewer: sender,
            limit: 2,
            before: Some(base + Duration::seconds(4)),
            before_sequence: None,
            now: base + Duration::seconds(10),
        };
        let page = repos.messages.list_visible(query).await.unwrap();
        let got: Vec<MessageId> = page.iter().map(|m| m.id).collect();
        assert_eq!(got, vec![ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn rejected_mutation_leaves_document_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let repos = store.repositories();
        let stored = repos
            .messages
            .insert(text(ChatId::generate(), UserId::generate(), Utc::now()))
            .await
            .unwrap();

        let result = repos
            .messages
            .modify(
                stored.id,
                Box::new(|m: &mut Message| {
                    m.content = "half-written".into();
                    Err(DomainError::failed_precondition("nope"))
                }),
            )
            .await;
        assert!(matches!(result, Err(RepositoryError::Rejected(_))));

        let reloaded = repos.messages.find_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(reloaded.content, "hello");
    }

    #[tokio::test]
    async fn create_direct_returns_existing_pair() {
        let store = Arc::new(MemoryStore::new());
        let repos = store.repositories();
        let a = UserId::generate();
        let b = UserId::generate();
        let now = Utc::now();

        let first = repos
            .chats
            .create_direct(Chat::new_direct(ChatId::generate(), a, b, now).unwrap())
            .await
            .unwrap();
        let second = repos
            .chats
            .create_direct(Chat::new_direct(ChatId::generate(), b, a, now).unwrap())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn duplicate_identity_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let repos = store.repositories();
        let now = Utc::now();
        let phone = Some("+15550100".to_string());

        let first = User::register(UserId::generate(), phone.clone(), None, None, now).unwrap();
        let second = User::register(UserId::generate(), phone, None, None, now).unwrap();
        repos.users.create(first).await.unwrap();
        assert_eq!(
            repos.users.create(second).await,
            Err(RepositoryError::Conflict)
        );
    }
}
