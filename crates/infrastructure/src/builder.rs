use std::sync::Arc;

use application::{MemoryStore, Repositories};
use config::{StoreBackend, StoreConfig};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::{
    migrations::MIGRATOR,
    postgres::{create_pg_pool, PgStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("postgres backend selected without database_url")]
    MissingDatabaseUrl,
}

/// 按配置装配好的存储
#[derive(Clone)]
pub struct Infrastructure {
    pub repositories: Repositories,
    /// 仅 Postgres 后端存在
    pub pool: Option<PgPool>,
}

impl Infrastructure {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            repositories: store.repositories(),
            pool: None,
        }
    }

    pub async fn connect(config: &StoreConfig) -> Result<Self, InfrastructureError> {
        match config.backend {
            StoreBackend::Memory => {
                info!("使用进程内存储");
                Ok(Self::in_memory())
            }
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or(InfrastructureError::MissingDatabaseUrl)?;
                let pool = create_pg_pool(url, config.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                info!(max_connections = config.max_connections, "PostgreSQL 存储已就绪");

                let store = Arc::new(PgStore::new(pool.clone()));
                Ok(Self {
                    repositories: store.repositories(),
                    pool: Some(pool),
                })
            }
        }
    }
}
