//! 调度器的作业与触发器存储
//!
//! 对外只暴露 `JobStore` 接口、两种后端以及配置和日志入口。

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub use jobstore_core::{
    init_logging, DatabaseConfig, JobStoreConfig, LogConfig, LogLevel, OutputFormat, RetryConfig,
    StoreBackend,
};
pub use jobstore_domain::*;
pub use jobstore_infrastructure::{JobStoreFactory, RamJobStore, RetryPolicy, SqliteJobStore};

/// 加载配置、初始化日志并创建作业存储
///
/// 返回的存储尚未 `initialize`，由调度器传入自己的信号器。
pub async fn bootstrap(config_path: Option<&str>) -> Result<(JobStoreConfig, Arc<dyn JobStore>)> {
    let config = JobStoreConfig::load(config_path).context("加载作业存储配置失败")?;
    init_logging(&config.logging)?;

    let store = JobStoreFactory::create(&config)
        .await
        .context("创建作业存储失败")?;
    info!(
        scheduler_name = %store.scheduler_name(),
        instance_id = %store.instance_id(),
        persistent = store.supports_persistence(),
        "作业存储已就绪"
    );
    Ok((config, store))
}
