use application::Services;
use config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    /// 每个 WebSocket 连接出站队列的容量
    pub connection_buffer: usize,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(services: Services, config: &AppConfig) -> Self {
        Self {
            services,
            connection_buffer: config.realtime.connection_buffer,
            cors_origins: config.server.cors_origins.clone(),
        }
    }
}
