//! PostgreSQL 记录存储
//!
//! 每条记录整体保存为 JSONB 文档，唯一约束、排序和过滤用到的字段冗余成列。
//! `modify` 在事务内 `SELECT ... FOR UPDATE` 后写回，对同一文档是原子的。

use std::sync::Arc;

use application::{
    CallRepository, ChatRepository, ContactRepository, DeviceRepository, MessageQuery,
    MessageRepository, Mutation, Repositories, StatusRepository, UserRepository,
};
use async_trait::async_trait;
use domain::{
    Call, CallId, Chat, ChatId, ChatKind, Contact, Device, Message, MessageId, RepositoryError,
    Status, StatusId, Timestamp, User, UserId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Encode, Postgres, Type};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn into_docs<T>(rows: Vec<Json<T>>) -> Vec<T> {
    rows.into_iter().map(|Json(doc)| doc).collect()
}

/// 构造 `%needle%`，转义 LIKE 通配符
fn like_pattern(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn kind_label(kind: ChatKind) -> &'static str {
    match kind {
        ChatKind::Direct => "direct",
        ChatKind::Group => "group",
        ChatKind::Channel => "channel",
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

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

    async fn fetch_doc<'q, T, A>(&self, sql: &'q str, key: A) -> Result<Option<T>, RepositoryError>
    where
        T: DeserializeOwned + Send + Unpin + 'static,
        A: 'q + Encode<'q, Postgres> + Type<Postgres> + Send,
    {
        let doc: Option<Json<T>> = sqlx::query_scalar(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(doc.map(|Json(value)| value))
    }

    /// 行锁内读取文档、执行变更并写回；变更被拒绝时回滚
    async fn modify_doc<T>(
        &self,
        table: &'static str,
        id: Uuid,
        mutation: Mutation<T>,
    ) -> Result<T, RepositoryError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static,
    {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let select = format!("SELECT doc FROM {table} WHERE id = $1 FOR UPDATE");
        let current: Option<Json<T>> = sqlx::query_scalar(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        let Json(mut record) = current.ok_or(RepositoryError::NotFound)?;

        if let Err(err) = mutation(&mut record) {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Err(RepositoryError::Rejected(err));
        }

        let update = format!("UPDATE {table} SET doc = $2 WHERE id = $1");
        sqlx::query(&update)
            .bind(id)
            .bind(Json(&record))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(record)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, phone_number, email, username, display_name, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.phone_number.as_deref())
        .bind(user.email.as_deref())
        .bind(user.username.as_ref().map(|name| name.as_str()))
        .bind(&user.display_name)
        .bind(Json(&user))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET phone_number = $2, email = $3, username = $4, display_name = $5, doc = $6
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.phone_number.as_deref())
        .bind(user.email.as_deref())
        .bind(user.username.as_ref().map(|name| name.as_str()))
        .bind(&user.display_name)
        .bind(Json(&user))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM users WHERE id = $1", Uuid::from(id))
            .await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM users WHERE phone_number = $1", phone)
            .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM users WHERE email = $1", email)
            .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM users WHERE username = $1", username)
            .await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<User>, RepositoryError> {
        let rows: Vec<Json<User>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM users
            WHERE lower(display_name) LIKE $1
               OR lower(username) LIKE $1
               OR phone_number LIKE $2
            ORDER BY display_name
            LIMIT $3
            "#,
        )
        .bind(like_pattern(&query.to_lowercase()))
        .bind(like_pattern(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(into_docs(rows))
    }

    async fn touch_last_seen(&self, id: UserId, at: Timestamp) -> Result<(), RepositoryError> {
        self.modify_doc(
            "users",
            id.into(),
            Box::new(move |user: &mut User| {
                user.touch_last_seen(at);
                Ok(())
            }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl DeviceRepository for PgStore {
    async fn create(&self, device: Device) -> Result<Device, RepositoryError> {
        sqlx::query("INSERT INTO devices (id, user_id, doc) VALUES ($1, $2, $3)")
            .bind(Uuid::from(device.id))
            .bind(Uuid::from(device.user_id))
            .bind(Json(&device))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(device)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Device>, RepositoryError> {
        let rows: Vec<Json<Device>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM devices
            WHERE user_id = $1
            ORDER BY (doc->>'created_at')::timestamptz
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(into_docs(rows))
    }
}

#[async_trait]
impl ContactRepository for PgStore {
    async fn create_if_absent(&self, contact: Contact) -> Result<Contact, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO contacts (user_id, contact_user_id, is_blocked, doc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, contact_user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(contact.user_id))
        .bind(Uuid::from(contact.contact_user_id))
        .bind(contact.is_blocked)
        .bind(Json(&contact))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let stored: Json<Contact> = sqlx::query_scalar(
            "SELECT doc FROM contacts WHERE user_id = $1 AND contact_user_id = $2",
        )
        .bind(Uuid::from(contact.user_id))
        .bind(Uuid::from(contact.contact_user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(stored.0)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Contact>, RepositoryError> {
        let rows: Vec<Json<Contact>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM contacts
            WHERE user_id = $1 AND NOT is_blocked
            ORDER BY (doc->>'created_at')::timestamptz
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(into_docs(rows))
    }
}

#[async_trait]
impl ChatRepository for PgStore {
    async fn create(&self, chat: Chat) -> Result<Chat, RepositoryError> {
        let participants: Vec<Uuid> = chat.participants.iter().copied().map(Uuid::from).collect();
        sqlx::query(
            r#"
            INSERT INTO chats (id, kind, direct_key, participants, updated_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(chat.id))
        .bind(kind_label(chat.kind))
        .bind(chat.pair_key())
        .bind(participants)
        .bind(chat.updated_at)
        .bind(Json(&chat))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(chat)
    }

    async fn create_direct(&self, chat: Chat) -> Result<Chat, RepositoryError> {
        let key = chat
            .pair_key()
            .ok_or_else(|| RepositoryError::storage("create_direct needs a two-party chat"))?;
        let participants: Vec<Uuid> = chat.participants.iter().copied().map(Uuid::from).collect();

        sqlx::query(
            r#"
            INSERT INTO chats (id, kind, direct_key, participants, updated_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (direct_key) DO NOTHING
            "#,
        )
        .bind(Uuid::from(chat.id))
        .bind(kind_label(chat.kind))
        .bind(&key)
        .bind(participants)
        .bind(chat.updated_at)
        .bind(Json(&chat))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.fetch_doc("SELECT doc FROM chats WHERE direct_key = $1", key.as_str())
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM chats WHERE id = $1", Uuid::from(id))
            .await
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError> {
        let rows: Vec<Json<Chat>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM chats
            WHERE $1 = ANY(participants)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(into_docs(rows))
    }

    async fn touch(&self, id: ChatId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let current: Option<Json<Chat>> =
            sqlx::query_scalar("SELECT doc FROM chats WHERE id = $1 FOR UPDATE")
                .bind(Uuid::from(id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        let Json(mut chat) = current.ok_or(RepositoryError::NotFound)?;
        chat.touch(at);

        sqlx::query("UPDATE chats SET updated_at = $2, doc = $3 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(chat.updated_at)
            .bind(Json(&chat))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn insert(&self, mut message: Message) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO chat_sequences (chat_id, last_sequence) VALUES ($1, 1)
            ON CONFLICT (chat_id)
            DO UPDATE SET last_sequence = chat_sequences.last_sequence + 1
            RETURNING last_sequence
            "#,
        )
        .bind(Uuid::from(message.chat_id))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        message.sequence = sequence as u64;

        sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, sequence, created_at, doc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.chat_id))
        .bind(sequence)
        .bind(message.created_at)
        .bind(Json(&message))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM messages WHERE id = $1", Uuid::from(id))
            .await
    }

    async fn modify(
        &self,
        id: MessageId,
        mutation: Mutation<Message>,
    ) -> Result<Message, RepositoryError> {
        self.modify_doc("messages", id.into(), mutation).await
    }

    async fn list_visible(&self, query: MessageQuery) -> Result<Vec<Message>, RepositoryError> {
        let rows: Vec<Json<Message>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM messages
            WHERE chat_id = $1
              AND NOT (doc->>'is_deleted')::boolean
              AND NOT (doc->'deleted_for' ? $2)
              AND (doc->>'expires_at' IS NULL OR (doc->>'expires_at')::timestamptz > $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
              AND ($5::bigint IS NULL OR sequence < $5)
            ORDER BY created_at DESC, sequence DESC
            LIMIT $6
            "#,
        )
        .bind(Uuid::from(query.chat_id))
        .bind(query.viewer.to_string())
        .bind(query.now)
        .bind(query.before)
        .bind(query.before_sequence.map(|seq| seq as i64))
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut page = into_docs(rows);
        page.reverse();
        Ok(page)
    }

    async fn latest(&self, chat_id: ChatId) -> Result<Option<Message>, RepositoryError> {
        self.fetch_doc(
            r#"
            SELECT doc FROM messages
            WHERE chat_id = $1 AND NOT (doc->>'is_deleted')::boolean
            ORDER BY created_at DESC, sequence DESC
            LIMIT 1
            "#,
            Uuid::from(chat_id),
        )
        .await
    }
}

#[async_trait]
impl StatusRepository for PgStore {
    async fn create(&self, status: Status) -> Result<Status, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO statuses (id, user_id, created_at, expires_at, doc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(status.id))
        .bind(Uuid::from(status.user_id))
        .bind(status.created_at)
        .bind(status.expires_at)
        .bind(Json(&status))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(status)
    }

    async fn find_by_id(&self, id: StatusId) -> Result<Option<Status>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM statuses WHERE id = $1", Uuid::from(id))
            .await
    }

    async fn list_live(
        &self,
        owners: &[UserId],
        now: Timestamp,
    ) -> Result<Vec<Status>, RepositoryError> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let owners: Vec<Uuid> = owners.iter().copied().map(Uuid::from).collect();
        let rows: Vec<Json<Status>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM statuses
            WHERE user_id = ANY($1) AND expires_at > $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(owners)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(into_docs(rows))
    }

    async fn modify(
        &self,
        id: StatusId,
        mutation: Mutation<Status>,
    ) -> Result<Status, RepositoryError> {
        self.modify_doc("statuses", id.into(), mutation).await
    }
}

#[async_trait]
impl CallRepository for PgStore {
    async fn create(&self, call: Call) -> Result<Call, RepositoryError> {
        sqlx::query("INSERT INTO calls (id, chat_id, doc) VALUES ($1, $2, $3)")
            .bind(Uuid::from(call.id))
            .bind(Uuid::from(call.chat_id))
            .bind(Json(&call))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(call)
    }

    async fn find_by_id(&self, id: CallId) -> Result<Option<Call>, RepositoryError> {
        self.fetch_doc("SELECT doc FROM calls WHERE id = $1", Uuid::from(id))
            .await
    }

    async fn modify(&self, id: CallId, mutation: Mutation<Call>) -> Result<Call, RepositoryError> {
        self.modify_doc("calls", id.into(), mutation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ali"), "%ali%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn kind_labels_match_wire_names() {
        for kind in [ChatKind::Direct, ChatKind::Group, ChatKind::Channel] {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, serde_json::json!(kind_label(kind)));
        }
    }
}
