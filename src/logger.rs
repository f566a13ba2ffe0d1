use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 日志配置
pub struct LoggerConfig {
    /// 日志目录
    pub log_dir: PathBuf,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 保留的日志文件数量
    pub max_files: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            file_prefix: "fileshare".to_string(),
            max_files: 7,
        }
    }
}

impl LoggerConfig {
    /// 日志目录可以通过 `FILESHARE_LOG_DIR` 覆盖
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("FILESHARE_LOG_DIR") {
            if !dir.is_empty() {
                config.log_dir = PathBuf::from(dir);
            }
        }
        config
    }
}

/// 初始化日志系统
///
/// - 同时输出到控制台和文件
/// - 文件按日期滚动，后台任务清理超出保留数量的旧文件
pub fn init_logger(config: LoggerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    // 东八区时间
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        time::UtcOffset::from_hms(8, 0, 0)?,
        time::format_description::well_known::Rfc3339,
    );

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.file_prefix.as_str())
        .filename_suffix("log")
        .build(&config.log_dir)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fileshare=debug,tower_http=info".into());

    // 文件输出层（不带颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_timer(timer.clone())
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tokio::spawn(log_rotation_task(config));

    Ok(())
}

/// 后台任务：定期清理旧日志
async fn log_rotation_task(config: LoggerConfig) {
    use tokio::time::{interval, Duration};

    let mut interval = interval(Duration::from_secs(60 * 60));

    loop {
        interval.tick().await;

        if let Err(e) = prune_log_files(&config.log_dir, &config.file_prefix, config.max_files).await {
            tracing::warn!("日志文件清理失败: {}", e);
        }
    }
}

/// 只保留最新的 `max_files` 个日志文件，返回删除的数量
async fn prune_log_files(log_dir: &Path, prefix: &str, max_files: usize) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let mut read_dir = tokio::fs::read_dir(log_dir).await?;
    let mut target_files = Vec::new();

    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with(prefix) && file_name.ends_with(".log") {
            if let Ok(metadata) = entry.metadata().await {
                target_files.push((path.clone(), metadata.modified().ok()));
            }
        }
    }

    // 最新的在前
    target_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut deleted = 0;
    for (path, _) in target_files.into_iter().skip(max_files) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                deleted += 1;
                tracing::info!("删除旧日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除旧日志文件失败 {:?}: {}", path, e),
        }
    }

    Ok(deleted)
}
