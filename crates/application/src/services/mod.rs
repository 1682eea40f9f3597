use std::sync::Arc;

use crate::broadcaster::RealtimeBus;
use crate::clock::Clock;
use crate::policy::MessagingPolicy;
use crate::presence::PresenceRegistry;
use crate::repository::Repositories;

mod call_service;
mod chat_service;
mod message_service;
mod session_service;
mod status_service;
mod user_service;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod chat_service_tests;

pub use call_service::{CallService, InitiateCallRequest};
pub use chat_service::{ChatService, ChatSummary, CreateChatRequest};
pub use message_service::{
    DeleteMessageRequest, EditMessageRequest, HistoryRequest, MessageService, ReceiptRequest,
    SendMessageRequest,
};
pub use session_service::SessionService;
pub use status_service::{PostStatusRequest, StatusService};
pub use user_service::{
    AddContactRequest, ContactEntry, DeviceInfo, RegisterDeviceRequest, Registration,
    UserService,
};

/// 各服务共享的依赖
#[derive(Clone)]
pub struct ServiceDependencies {
    pub repositories: Repositories,
    pub bus: Arc<dyn RealtimeBus>,
    pub presence: Arc<PresenceRegistry>,
    pub clock: Arc<dyn Clock>,
    pub policy: MessagingPolicy,
}

/// 组装好的全部用例服务
#[derive(Clone)]
pub struct Services {
    pub chats: Arc<ChatService>,
    pub messages: Arc<MessageService>,
    pub statuses: Arc<StatusService>,
    pub calls: Arc<CallService>,
    pub users: Arc<UserService>,
    pub sessions: Arc<SessionService>,
}

impl Services {
    pub fn new(deps: ServiceDependencies) -> Self {
        Self {
            chats: Arc::new(ChatService::new(deps.clone())),
            messages: Arc::new(MessageService::new(deps.clone())),
            statuses: Arc::new(StatusService::new(deps.clone())),
            calls: Arc::new(CallService::new(deps.clone())),
            users: Arc::new(UserService::new(deps.clone())),
            sessions: Arc::new(SessionService::new(deps)),
        }
    }
}
