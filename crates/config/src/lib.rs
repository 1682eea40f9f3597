//! 统一配置中心
//!
//! 优先级：内置默认值 → 可选的 YAML 文件 → `MESSENGER_*` 环境变量。
//! 嵌套字段用双下划线分隔，例如 `MESSENGER_SERVER__PORT=9000`。

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "MESSENGER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 记录存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_store"))]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

fn validate_store(store: &StoreConfig) -> Result<(), ValidationError> {
    if store.backend != StoreBackend::Postgres {
        return Ok(());
    }
    match store.database_url.as_deref() {
        Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => Ok(()),
        _ => Err(ValidationError::new("database_url")
            .with_message("postgres backend needs a postgres:// database_url".into())),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_realtime"))]
pub struct RealtimeConfig {
    /// 每个连接出站队列的容量
    #[validate(range(min = 1))]
    pub connection_buffer: usize,
    #[validate(range(min = 1))]
    pub max_history_limit: u32,
    #[validate(range(min = 1))]
    pub default_history_limit: u32,
}

fn validate_realtime(realtime: &RealtimeConfig) -> Result<(), ValidationError> {
    if realtime.default_history_limit > realtime.max_history_limit {
        return Err(ValidationError::new("default_history_limit")
            .with_message("default_history_limit exceeds max_history_limit".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MessagingConfig {
    /// 最长一周
    #[validate(range(max = 604_800))]
    pub delete_for_everyone_window_secs: u64,
    /// 最长 30 天
    #[validate(range(min = 1, max = 720))]
    pub status_ttl_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogConfig {
    /// `RUST_LOG` 未设置时使用的过滤表达式
    #[validate(length(min = 1))]
    pub level: String,
}

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub store: StoreConfig,
    #[validate(nested)]
    pub realtime: RealtimeConfig,
    #[validate(nested)]
    pub messaging: MessagingConfig,
    #[validate(nested)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                cors_origins: vec!["*".into()],
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                database_url: None,
                max_connections: 10,
            },
            realtime: RealtimeConfig {
                connection_buffer: 256,
                max_history_limit: 100,
                default_history_limit: 50,
            },
            messaging: MessagingConfig {
                delete_for_everyone_window_secs: 300,
                status_ttl_hours: 24,
            },
            log: LogConfig {
                level: "info".into(),
            },
        }
    }
}

impl AppConfig {
    /// 按优先级加载并校验配置
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    /// 组合好的配置来源，便于在测试里追加覆盖
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 脱敏后的配置描述（用于日志）
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        if let Some(url) = redacted.store.database_url.as_mut() {
            if let Some(at) = url.rfind('@') {
                let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                url.replace_range(scheme_end..at, "[REDACTED]");
            }
        }
        format!("{redacted:?}")
    }
}
