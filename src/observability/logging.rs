//! 结构化日志初始化

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::config::LoggingConfig;

/// 初始化全局 tracing subscriber
///
/// `RUST_LOG` 优先于配置中的级别。配置了日志目录时额外写入按天滚动的 JSON 文件，
/// 返回的 guard 必须持有到进程退出，否则缓冲中的日志会丢失。
pub fn init_tracing(
    app_name: &str,
    config: &LoggingConfig,
) -> Result<Option<WorkerGuard>, TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}={}", config.level, app_name, config.level))
    });

    let json_layer = config
        .structured
        .then(|| fmt::layer().json().with_target(true).with_current_span(true));
    let text_layer = (!config.structured).then(|| {
        fmt::layer()
            .with_target(true)
            .with_line_number(true)
    });

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
