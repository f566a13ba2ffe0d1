mod access;
mod admin;
mod config;
mod error;
mod files;
mod logger;
mod metrics;
mod routes;
mod shared_text;

use access::{AccessGuard, GuardPolicy};
use config::Config;
use files::FileStore;
use logger::{init_logger, LoggerConfig};
use metrics::Metrics;
use shared_text::SharedText;
use std::net::SocketAddr;
use std::sync::Arc;

// 统一的应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub access_guard: Arc<AccessGuard>, // 密码校验 + 按 IP 的失败计数
    pub files: Arc<FileStore>,
    pub shared_text: Arc<SharedText>,
    pub metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先初始化日志，配置加载过程中的警告才能输出
    init_logger(LoggerConfig::from_env())?;

    // 加载配置（失败时回退到默认值，不会中断启动）
    let config = Config::load();
    tracing::info!("服务器地址: {}:{}", config.server.host, config.server.port);
    tracing::info!(
        "安全策略: 最多 {} 次密码错误，锁定 {} 小时",
        access::MAX_FAILED_ATTEMPTS,
        access::LOCKOUT_DURATION_HOURS
    );
    if !config.server.trust_proxy {
        tracing::info!("不信任转发头，仅使用 TCP 对端地址判断来源");
    }

    let policy = GuardPolicy::new(
        config.access.password.clone(),
        config.access.allowed_hosts.clone(),
    );
    let access_guard = Arc::new(AccessGuard::in_memory(policy));
    tokio::spawn(access::attempt_prune_task(access_guard.clone()));

    let files = Arc::new(
        FileStore::open(&config.storage.upload_dir)
            .await
            .map_err(|e| anyhow::anyhow!("上传目录初始化失败 {:?}: {}", config.storage.upload_dir, e))?,
    );
    tracing::info!("上传目录: {:?}", files.dir());

    let shared_text = Arc::new(SharedText::load(&config.storage.shared_text_file).await);
    tokio::fs::create_dir_all(&config.storage.public_dir).await?;

    let metrics = Arc::new(
        Metrics::new().map_err(|e| anyhow::anyhow!("指标初始化失败: {}", e))?,
    );

    let config = Arc::new(config);

    let app_state = AppState {
        config: config.clone(),
        access_guard,
        files,
        shared_text: shared_text.clone(),
        metrics,
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 文件共享服务器运行在 http://{}", addr);
    tracing::info!("🔧 管理接口: GET http://{}/admin/metrics (仅localhost)", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shared_text))
    .await?;

    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal(shared_text: Arc<SharedText>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("无法监听 Ctrl+C 信号: {}", e);
        // 监听失败时不触发关闭
        std::future::pending::<()>().await;
    }

    tracing::info!("📦 正在保存共享文本...");

    if let Err(e) = shared_text.flush().await {
        tracing::error!("❌ 保存失败: {}", e);
    } else {
        tracing::info!("✅ 数据已保存");
    }
}
