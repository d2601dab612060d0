pub mod log_config;
pub mod log_level;

pub use log_config::{LogConfig, OutputFormat};
pub use log_level::LogLevel;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化全局日志
///
/// `RUST_LOG` 存在时优先于配置中的级别。重复初始化会返回错误。
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        OutputFormat::Json => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(config.include_target)
                        .with_file(config.include_caller)
                        .with_line_number(config.include_caller),
                )
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        OutputFormat::Pretty => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_target(config.include_target),
                )
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        OutputFormat::Text => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(config.include_target)
                        .with_file(config.include_caller)
                        .with_line_number(config.include_caller),
                )
                .try_init()
                .context("初始化文本日志格式失败")?;
        }
    }

    tracing::info!(level = %config.level.as_filter(), format = ?config.format, "日志系统初始化完成");
    Ok(())
}
