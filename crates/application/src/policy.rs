use chrono::Duration;

/// 消息与动态的时间规则
#[derive(Debug, Clone)]
pub struct MessagingPolicy {
    /// 发送者可以“为所有人删除”的时间窗口
    pub delete_for_everyone_window: Duration,
    /// 动态存活时间
    pub status_ttl: Duration,
    pub default_history_limit: u32,
    pub max_history_limit: u32,
}

impl Default for MessagingPolicy {
    fn default() -> Self {
        Self {
            delete_for_everyone_window: Duration::minutes(5),
            status_ttl: Duration::hours(24),
            default_history_limit: 50,
            max_history_limit: 100,
        }
    }
}

impl MessagingPolicy {
    pub fn from_config(config: &config::AppConfig) -> Self {
        Self {
            delete_for_everyone_window: Duration::seconds(
                config.messaging.delete_for_everyone_window_secs as i64,
            ),
            status_ttl: Duration::hours(config.messaging.status_ttl_hours as i64),
            default_history_limit: config.realtime.default_history_limit,
            max_history_limit: config.realtime.max_history_limit,
        }
    }

    /// 把请求的分页大小收敛到 [1, max]
    pub fn history_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_history_limit)
            .clamp(1, self.max_history_limit)
    }
}
