//! 在线状态注册表
//!
//! 维护三张进程内映射：连接 → (用户, 已加入房间)，用户 → 按认证先后排序的连接，
//! 房间 → 连接集合。所有变更都在同一把写锁内完成，因此同一连接/用户的生命周期
//! 事件彼此原子；`resolve` 之类的读取可能略旧，但断开完成后不会再看到该连接。
//!
//! 只覆盖本进程的连接，多实例部署需要共享的在线目录。

use std::collections::{HashMap, HashSet};
use std::fmt;

use domain::{ChatId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::events::ServerEvent;

/// 单个实时连接的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 连接的出站队列
pub type EventSender = mpsc::Sender<ServerEvent>;

struct ConnectionEntry {
    sender: EventSender,
    user_id: Option<UserId>,
    rooms: HashSet<ChatId>,
}

#[derive(Default)]
struct PresenceState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// 最后一个元素是最近认证的连接
    users: HashMap<UserId, Vec<ConnectionId>>,
    rooms: HashMap<ChatId, HashSet<ConnectionId>>,
}

impl PresenceState {
    fn leave_all_rooms(&mut self, connection_id: ConnectionId) {
        let Some(entry) = self.connections.get_mut(&connection_id) else {
            return;
        };
        for room in entry.rooms.drain() {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
    }

    /// 解除连接与用户的绑定，返回该用户是否已没有任何连接
    fn unbind(&mut self, connection_id: ConnectionId, user_id: UserId) -> bool {
        let Some(connections) = self.users.get_mut(&user_id) else {
            return true;
        };
        connections.retain(|id| *id != connection_id);
        if connections.is_empty() {
            self.users.remove(&user_id);
            true
        } else {
            false
        }
    }

    fn join(&mut self, connection_id: ConnectionId, room: ChatId) -> bool {
        let Some(entry) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.rooms.insert(room);
        self.rooms.entry(room).or_default().insert(connection_id)
    }
}

/// 认证绑定的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// 该用户此前没有其他连接
    pub first_connection: bool,
    /// 连接之前绑定的其他用户，以及该用户是否因此离线
    pub replaced: Option<Unbinding>,
}

/// 断开/解绑的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unbinding {
    pub user_id: UserId,
    pub last_connection: bool,
}

#[derive(Default)]
pub struct PresenceRegistry {
    state: RwLock<PresenceState>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个尚未认证的连接
    pub async fn connect(&self, sender: EventSender) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                user_id: None,
                rooms: HashSet::new(),
            },
        );
        connection_id
    }

    /// 绑定用户并用会话快照重建该连接的房间集合。未知连接返回 None。
    pub async fn authenticate(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        rooms: &[ChatId],
    ) -> Option<Binding> {
        let mut state = self.state.write().await;
        let previous = state.connections.get(&connection_id)?.user_id;

        let replaced = match previous {
            Some(previous) if previous == user_id => None,
            Some(previous) => Some(Unbinding {
                user_id: previous,
                last_connection: state.unbind(connection_id, previous),
            }),
            None => None,
        };
        state.leave_all_rooms(connection_id);

        let connections = state.users.entry(user_id).or_default();
        connections.retain(|id| *id != connection_id);
        let first_connection = connections.is_empty();
        connections.push(connection_id);

        if let Some(entry) = state.connections.get_mut(&connection_id) {
            entry.user_id = Some(user_id);
        }
        for room in rooms {
            state.join(connection_id, *room);
        }

        Some(Binding {
            first_connection: first_connection && previous != Some(user_id),
            replaced,
        })
    }

    /// 移除连接；若连接已认证，返回其用户以及是否为最后一个连接
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<Unbinding> {
        let mut state = self.state.write().await;
        state.leave_all_rooms(connection_id);
        let entry = state.connections.remove(&connection_id)?;
        let user_id = entry.user_id?;
        let last_connection = state.unbind(connection_id, user_id);
        Some(Unbinding {
            user_id,
            last_connection,
        })
    }

    /// 把用户当前所有在线连接加入房间（会话在认证之后创建时使用）
    pub async fn join_room(&self, user_id: UserId, room: ChatId) -> usize {
        let mut state = self.state.write().await;
        let connections = state.users.get(&user_id).cloned().unwrap_or_default();
        connections
            .into_iter()
            .filter(|connection_id| state.join(*connection_id, room))
            .count()
    }

    /// 认证后按会话快照加入房间；连接已断开或换绑其他用户时不加入
    pub async fn join_rooms(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        rooms: &[ChatId],
    ) -> usize {
        let mut state = self.state.write().await;
        let bound = state
            .connections
            .get(&connection_id)
            .and_then(|entry| entry.user_id);
        if bound != Some(user_id) {
            return 0;
        }
        rooms
            .iter()
            .filter(|room| state.join(connection_id, **room))
            .count()
    }

    /// 用户最近认证的连接，用于定向信令
    pub async fn resolve(&self, user_id: UserId) -> Option<ConnectionId> {
        let state = self.state.read().await;
        state
            .users
            .get(&user_id)
            .and_then(|connections| connections.last().copied())
    }

    #[cfg(test)]
    pub(crate) async fn is_online(&self, user_id: UserId) -> bool {
        self.state.read().await.users.contains_key(&user_id)
    }

    pub async fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        let state = self.state.read().await;
        state.connections.get(&connection_id)?.user_id
    }

    pub async fn is_in_room(&self, connection_id: ConnectionId, room: ChatId) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(&room)
            .is_some_and(|members| members.contains(&connection_id))
    }

    /// 房间内所有连接的出站队列
    pub async fn room_senders(
        &self,
        room: ChatId,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, EventSender)> {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|connection_id| Some(**connection_id) != exclude)
            .filter_map(|connection_id| {
                state
                    .connections
                    .get(connection_id)
                    .map(|entry| (*connection_id, entry.sender.clone()))
            })
            .collect()
    }

    /// 所有已认证连接的出站队列
    pub async fn authenticated_senders(
        &self,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, EventSender)> {
        let state = self.state.read().await;
        state
            .connections
            .iter()
            .filter(|(connection_id, entry)| {
                entry.user_id.is_some() && Some(**connection_id) != exclude
            })
            .map(|(connection_id, entry)| (*connection_id, entry.sender.clone()))
            .collect()
    }

    pub async fn sender(&self, connection_id: ConnectionId) -> Option<EventSender> {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|entry| entry.sender.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> EventSender {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn authenticate_snapshots_rooms() {
        let registry = PresenceRegistry::new();
        let user = UserId::generate();
        let room = ChatId::generate();
        let connection = registry.connect(channel()).await;

        let binding = registry
            .authenticate(connection, user, &[room])
            .await
            .expect("known connection");
        assert!(binding.first_connection);
        assert!(registry.is_in_room(connection, room).await);
        assert_eq!(registry.resolve(user).await, Some(connection));
    }

    #[tokio::test]
    async fn unknown_connection_cannot_authenticate() {
        let registry = PresenceRegistry::new();
        let result = registry
            .authenticate(ConnectionId::generate(), UserId::generate(), &[])
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn user_goes_offline_only_with_last_connection() {
        let registry = PresenceRegistry::new();
        let user = UserId::generate();
        let phone = registry.connect(channel()).await;
        let laptop = registry.connect(channel()).await;

        assert!(registry.authenticate(phone, user, &[]).await.unwrap().first_connection);
        assert!(!registry.authenticate(laptop, user, &[]).await.unwrap().first_connection);
        assert_eq!(registry.resolve(user).await, Some(laptop));

        let first = registry.disconnect(laptop).await.unwrap();
        assert!(!first.last_connection);
        assert_eq!(registry.resolve(user).await, Some(phone));

        let second = registry.disconnect(phone).await.unwrap();
        assert!(second.last_connection);
        assert!(!registry.is_online(user).await);
        assert_eq!(registry.resolve(user).await, None);
    }

    #[tokio::test]
    async fn disconnect_removes_connection_from_rooms() {
        let registry = PresenceRegistry::new();
        let room = ChatId::generate();
        let connection = registry.connect(channel()).await;
        registry
            .authenticate(connection, UserId::generate(), &[room])
            .await
            .unwrap();

        registry.disconnect(connection).await;
        assert!(registry.room_senders(room, None).await.is_empty());
        assert!(registry.disconnect(connection).await.is_none());
    }

    #[tokio::test]
    async fn reauthenticating_as_another_user_unbinds_the_first() {
        let registry = PresenceRegistry::new();
        let alice = UserId::generate();
        let bob = UserId::generate();
        let old_room = ChatId::generate();
        let connection = registry.connect(channel()).await;

        registry.authenticate(connection, alice, &[old_room]).await;
        let binding = registry.authenticate(connection, bob, &[]).await.unwrap();

        assert_eq!(
            binding.replaced,
            Some(Unbinding {
                user_id: alice,
                last_connection: true
            })
        );
        assert!(!registry.is_online(alice).await);
        assert!(!registry.is_in_room(connection, old_room).await);
        assert_eq!(registry.user_of(connection).await, Some(bob));
    }

    #[tokio::test]
    async fn join_room_reaches_every_live_connection() {
        let registry = PresenceRegistry::new();
        let user = UserId::generate();
        let room = ChatId::generate();
        let a = registry.connect(channel()).await;
        let b = registry.connect(channel()).await;
        registry.authenticate(a, user, &[]).await;
        registry.authenticate(b, user, &[]).await;

        assert_eq!(registry.join_room(user, room).await, 2);
        assert_eq!(registry.join_room(user, room).await, 0);
        assert_eq!(registry.room_senders(room, Some(a)).await.len(), 1);
        assert_eq!(registry.join_room(UserId::generate(), room).await, 0);
    }

    #[tokio::test]
    async fn join_rooms_requires_the_same_binding() {
        let registry = PresenceRegistry::new();
        let alice = UserId::generate();
        let room = ChatId::generate();
        let connection = registry.connect(channel()).await;

        assert_eq!(registry.join_rooms(connection, alice, &[room]).await, 0);

        registry.authenticate(connection, alice, &[]).await;
        assert_eq!(registry.join_rooms(connection, alice, &[room]).await, 1);
        assert!(registry.is_in_room(connection, room).await);

        registry.authenticate(connection, UserId::generate(), &[]).await;
        assert_eq!(registry.join_rooms(connection, alice, &[room]).await, 0);
        assert!(!registry.is_in_room(connection, room).await);
    }
}
