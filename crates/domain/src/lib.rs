//! 即时通讯系统核心领域模型
//!
//! 包含用户、会话、消息、动态、通话等实体，以及单聊去重、消息墓碑、
//! 表情回应替换、回执单调性等业务规则。

pub mod entities;
pub mod errors;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use value_objects::*;
