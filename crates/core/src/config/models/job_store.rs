use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{database::DatabaseConfig, retry::RetryConfig};
use crate::logging::LogConfig;

/// 自动生成实例ID的占位值
pub const AUTO_INSTANCE_ID: &str = "AUTO";

/// 存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// 作业存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreConfig {
    /// 共享同一数据库的多个调度器通过名称隔离数据
    pub scheduler_name: String,
    /// 集群内唯一的实例ID；`AUTO` 表示按主机名生成
    pub instance_id: String,
    pub backend: StoreBackend,
    /// 超过该时长未触发即视为错过
    pub misfire_threshold_ms: u64,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub logging: LogConfig,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "DefaultScheduler".to_string(),
            instance_id: AUTO_INSTANCE_ID.to_string(),
            backend: StoreBackend::Memory,
            misfire_threshold_ms: 60_000,
            database: DatabaseConfig::default(),
            retry: RetryConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl JobStoreConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: JOBSTORE_, nested keys joined by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/jobstore.toml",
                "jobstore.toml",
                "/etc/jobstore/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("JOBSTORE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: JobStoreConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: JobStoreConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler_name.trim().is_empty() {
            return Err(anyhow::anyhow!("调度器名称不能为空"));
        }

        if self.instance_id.trim().is_empty() {
            return Err(anyhow::anyhow!("实例ID不能为空"));
        }

        if self.misfire_threshold_ms == 0 {
            return Err(anyhow::anyhow!("错过触发阈值必须大于0"));
        }

        if self.backend == StoreBackend::Sqlite {
            self.database.validate().context("数据库配置验证失败")?;
        }

        self.retry.validate().context("重试配置验证失败")?;

        Ok(())
    }

    /// 解析实际使用的实例ID
    pub fn resolved_instance_id(&self) -> String {
        if self.instance_id != AUTO_INSTANCE_ID {
            return self.instance_id.clone();
        }
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        format!("{}-{}", host, chrono::Utc::now().timestamp_millis())
    }
}
