//! 领域实体

pub mod call;
pub mod chat;
pub mod message;
pub mod status;
pub mod user;

pub use call::{Call, CallStatus, CallType};
pub use chat::{Chat, ChatKind, ChatSettings};
pub use message::{
    Message, MessageDraft, MessageStatus, MessageType, Reaction, Receipt, ReceiptKind,
    DELETED_PLACEHOLDER,
};
pub use status::{Status, StatusContentType, StatusDraft, StatusPrivacy};
pub use user::{Contact, Device, DeviceType, PrivacySettings, User, UserProfileUpdate, Visibility};
