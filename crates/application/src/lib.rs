//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，处理权限校验、原子更新边界、
//! 以及对外部适配器（记录存储、实时事件分发）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod events;
pub mod local_broadcast;
pub mod memory;
pub mod policy;
pub mod presence;
pub mod repository;
pub mod services;

pub use broadcaster::RealtimeBus;
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use events::{ClientEvent, ServerEvent};
pub use local_broadcast::LocalRealtimeBus;
pub use memory::MemoryStore;
pub use policy::MessagingPolicy;
pub use presence::{Binding, ConnectionId, EventSender, PresenceRegistry, Unbinding};
pub use repository::{
    CallRepository, ChatRepository, ContactRepository, DeviceRepository, MessageQuery,
    MessageRepository, Mutation, Repositories, StatusRepository, UserRepository,
};
pub use services::{
    AddContactRequest, CallService, ChatService, ChatSummary, ContactEntry, CreateChatRequest,
    DeleteMessageRequest, DeviceInfo, EditMessageRequest, HistoryRequest, InitiateCallRequest,
    MessageService, PostStatusRequest, ReceiptRequest, RegisterDeviceRequest, Registration,
    SendMessageRequest, ServiceDependencies, Services, SessionService, StatusService,
    UserService,
};
