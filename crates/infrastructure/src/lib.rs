//! 基础设施层实现。
//!
//! 提供记录存储的 PostgreSQL 适配器，以及按配置装配存储的入口。

pub mod builder;
pub mod migrations;
pub mod postgres;

pub use application::MemoryStore;
pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use postgres::{create_pg_pool, PgStore};
