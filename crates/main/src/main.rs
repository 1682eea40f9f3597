//! 主应用程序入口
//!
//! 加载配置、装配存储与用例服务，启动 Axum Web API 服务。

use std::{env, path::PathBuf, sync::Arc};

use application::{
    LocalRealtimeBus, MessagingPolicy, PresenceRegistry, ServiceDependencies, Services,
    SystemClock,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

/// 配置文件路径：命令行第一个参数，其次 `MESSENGER_CONFIG_FILE`
fn config_path() -> Option<PathBuf> {
    env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| env::var_os("MESSENGER_CONFIG_FILE").map(PathBuf::from))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始优雅关闭");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(config_path().as_deref())?;

    // 初始化日志：RUST_LOG 优先，否则使用配置中的级别
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infrastructure = Infrastructure::connect(&config.store).await?;

    let presence = Arc::new(PresenceRegistry::new());
    let services = Services::new(ServiceDependencies {
        repositories: infrastructure.repositories.clone(),
        bus: Arc::new(LocalRealtimeBus::new(presence.clone())),
        presence,
        clock: Arc::new(SystemClock),
        policy: MessagingPolicy::from_config(&config),
    });

    let app = router(AppState::new(services, &config));
    let listen_addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;

    tracing::info!("即时通讯服务启动在 http://{}", listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
