//! 实时连接的生命周期：连接、认证、断开，以及输入状态广播

use domain::{ChatId, DomainError, UserId};

use crate::error::ApplicationError;
use crate::events::ServerEvent;
use crate::presence::{ConnectionId, EventSender};
use crate::services::ServiceDependencies;

pub struct SessionService {
    deps: ServiceDependencies,
}

impl SessionService {
    pub fn new(deps: ServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn connect(&self, sender: EventSender) -> ConnectionId {
        let connection_id = self.deps.presence.connect(sender).await;
        tracing::debug!(connection_id = %connection_id, "连接已建立");
        connection_id
    }

    /// 绑定用户后按会话快照加入房间，回复 authenticated，首个连接时广播上线
    pub async fn authenticate(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        self.deps
            .repositories
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user", user_id))?;

        // 先绑定再取会话快照：期间新建的会话要么在快照里，要么由 join_room 找到该连接
        let binding = self
            .deps
            .presence
            .authenticate(connection_id, user_id, &[])
            .await
            .ok_or_else(|| DomainError::failed_precondition("connection is closed"))?;

        let rooms: Vec<ChatId> = self
            .deps
            .repositories
            .chats
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|chat| chat.id)
            .collect();
        self.deps
            .presence
            .join_rooms(connection_id, user_id, &rooms)
            .await;

        if let Some(previous) = binding.replaced {
            if previous.last_connection {
                self.went_offline(previous.user_id).await;
            }
        }

        let now = self.deps.clock.now();
        self.deps
            .repositories
            .users
            .touch_last_seen(user_id, now)
            .await?;

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            rooms = rooms.len(),
            first_connection = binding.first_connection,
            "连接已认证"
        );
        self.deps
            .bus
            .send_to_connection(connection_id, ServerEvent::Authenticated { user_id })
            .await;
        if binding.first_connection {
            self.deps
                .bus
                .broadcast_all(ServerEvent::UserOnline { user_id }, None)
                .await;
        }
        Ok(())
    }

    /// 最后一个连接断开时才广播下线
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(unbinding) = self.deps.presence.disconnect(connection_id).await else {
            tracing::debug!(connection_id = %connection_id, "未认证连接已断开");
            return;
        };
        tracing::info!(
            connection_id = %connection_id,
            user_id = %unbinding.user_id,
            last_connection = unbinding.last_connection,
            "连接已断开"
        );
        if unbinding.last_connection {
            self.went_offline(unbinding.user_id).await;
        }
    }

    async fn went_offline(&self, user_id: UserId) {
        let now = self.deps.clock.now();
        if let Err(err) = self
            .deps
            .repositories
            .users
            .touch_last_seen(user_id, now)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %err, "更新最后在线时间失败");
        }
        self.deps
            .bus
            .broadcast_all(ServerEvent::UserOffline { user_id }, None)
            .await;
    }

    /// 连接当前绑定的用户
    pub async fn bound_user(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.deps.presence.user_of(connection_id).await
    }

    /// 输入状态：只转发给同房间的其他连接
    pub async fn typing(
        &self,
        connection_id: ConnectionId,
        chat_id: ChatId,
        user_id: UserId,
        typing: bool,
    ) -> Result<usize, ApplicationError> {
        if self.bound_user(connection_id).await != Some(user_id) {
            return Err(DomainError::permission_denied(
                "typing: user does not match the authenticated connection",
            )
            .into());
        }
        if !self.deps.presence.is_in_room(connection_id, chat_id).await {
            return Err(DomainError::permission_denied(format!(
                "typing: not a participant of chat {chat_id}"
            ))
            .into());
        }
        let delivered = self
            .deps
            .bus
            .broadcast_to_room(
                chat_id,
                ServerEvent::Typing {
                    chat_id,
                    user_id,
                    typing,
                },
                Some(connection_id),
            )
            .await;
        Ok(delivered)
    }
}
