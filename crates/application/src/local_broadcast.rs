// 单进程广播器：直接写入各连接的出站队列
use std::sync::Arc;

use async_trait::async_trait;
use domain::ChatId;
use tokio::sync::mpsc::error::TrySendError;

use crate::broadcaster::RealtimeBus;
use crate::events::ServerEvent;
use crate::presence::{ConnectionId, EventSender, PresenceRegistry};

#[derive(Clone)]
pub struct LocalRealtimeBus {
    presence: Arc<PresenceRegistry>,
}

impl LocalRealtimeBus {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    fn deliver(connection_id: ConnectionId, sender: &EventSender, event: ServerEvent) -> bool {
        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    event = event.name(),
                    "连接出站队列已满，丢弃事件"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection_id, "连接已关闭，跳过投递");
                false
            }
        }
    }

    fn fan_out(targets: Vec<(ConnectionId, EventSender)>, event: ServerEvent) -> usize {
        targets
            .iter()
            .filter(|(connection_id, sender)| Self::deliver(*connection_id, sender, event.clone()))
            .count()
    }
}

#[async_trait]
impl RealtimeBus for LocalRealtimeBus {
    async fn broadcast_to_room(
        &self,
        room: ChatId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let targets = self.presence.room_senders(room, exclude).await;
        let delivered = Self::fan_out(targets, event);
        tracing::trace!(chat_id = %room, delivered, "房间广播完成");
        delivered
    }

    async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        match self.presence.sender(connection_id).await {
            Some(sender) => Self::deliver(connection_id, &sender, event),
            None => false,
        }
    }

    async fn broadcast_all(&self, event: ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let targets = self.presence.authenticated_senders(exclude).await;
        Self::fan_out(targets, event)
    }
}
