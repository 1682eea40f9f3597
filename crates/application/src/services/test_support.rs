//! 服务测试的公共夹具：内存存储 + 本地广播器 + 可拨动的时钟

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use domain::{Chat, ChatKind, Timestamp, User, UserId};
use tokio::sync::mpsc;

use crate::broadcaster::RealtimeBus;
use crate::clock::Clock;
use crate::events::ServerEvent;
use crate::local_broadcast::LocalRealtimeBus;
use crate::memory::MemoryStore;
use crate::policy::MessagingPolicy;
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::repository::{ChatRepository, Repositories};
use crate::services::{CreateChatRequest, ServiceDependencies, Services};

pub(crate) struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub(crate) fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

pub(crate) struct Harness {
    pub repos: Repositories,
    pub presence: Arc<PresenceRegistry>,
    pub clock: Arc<ManualClock>,
    pub services: Services,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let bus = Arc::new(LocalRealtimeBus::new(presence.clone()));
        Self::build(presence, bus, |repos, _| repos)
    }

    /// 用指定的广播器（例如 mockall 生成的 mock）替换本地广播器
    pub(crate) fn with_bus(bus: Arc<dyn RealtimeBus>) -> Self {
        Self::build(Arc::new(PresenceRegistry::new()), bus, |repos, _| repos)
    }

    /// 包装会话仓储，用来在存储调用中途插入并发操作
    pub(crate) fn with_chats(
        wrap: impl FnOnce(Arc<dyn ChatRepository>, Arc<PresenceRegistry>) -> Arc<dyn ChatRepository>,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let bus = Arc::new(LocalRealtimeBus::new(presence.clone()));
        Self::build(presence, bus, |mut repos, presence| {
            repos.chats = wrap(repos.chats, presence);
            repos
        })
    }

    fn build(
        presence: Arc<PresenceRegistry>,
        bus: Arc<dyn RealtimeBus>,
        customize: impl FnOnce(Repositories, Arc<PresenceRegistry>) -> Repositories,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let repos = customize(store.repositories(), presence.clone());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let services = Services::new(ServiceDependencies {
            repositories: repos.clone(),
            bus,
            presence: presence.clone(),
            clock: clock.clone(),
            policy: MessagingPolicy::default(),
        });
        Self {
            repos,
            presence,
            clock,
            services,
        }
    }

    pub(crate) fn clock_now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) async fn user(&self, phone: &str) -> User {
        let user = User::register(
            UserId::generate(),
            Some(phone.to_owned()),
            None,
            None,
            self.clock.now(),
        )
        .unwrap();
        self.repos.users.create(user).await.unwrap()
    }

    pub(crate) async fn direct(&self, a: UserId, b: UserId) -> Chat {
        self.services
            .chats
            .create_chat(CreateChatRequest {
                requester: a,
                kind: ChatKind::Direct,
                name: None,
                participants: vec![b],
            })
            .await
            .unwrap()
    }

    pub(crate) async fn group(&self, owner: UserId, members: &[UserId]) -> Chat {
        self.services
            .chats
            .create_chat(CreateChatRequest {
                requester: owner,
                kind: ChatKind::Group,
                name: Some("team".into()),
                participants: members.to_vec(),
            })
            .await
            .unwrap()
    }

    /// 建立并认证一条连接，返回其出站队列
    pub(crate) async fn online(
        &self,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let connection = self.services.sessions.connect(tx).await;
        self.services
            .sessions
            .authenticate(connection, user_id)
            .await
            .unwrap();
        (connection, rx)
    }
}

/// 取出队列里当前已有的全部事件
pub(crate) fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::name).collect()
}
