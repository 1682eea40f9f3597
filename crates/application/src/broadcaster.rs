use async_trait::async_trait;
use domain::ChatId;

use crate::events::ServerEvent;
use crate::presence::ConnectionId;

/// 实时事件分发
///
/// 投递是尽力而为的：接收方队列已满或已关闭时只丢弃该连接的这一条事件，
/// 不会让调用方的写操作失败。返回值是实际入队的连接数。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    /// 发给加入了该会话房间的所有连接
    async fn broadcast_to_room(
        &self,
        room: ChatId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize;

    /// 发给单个连接
    async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool;

    /// 发给所有已认证连接
    async fn broadcast_all(&self, event: ServerEvent, exclude: Option<ConnectionId>) -> usize;
}
