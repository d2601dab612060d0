//! Test helper utilities and common testing patterns

use chrono::{DateTime, Utc};
use jobstore_core::{DatabaseConfig, JobStoreConfig, StoreBackend};
use tempfile::TempDir;

/// 临时目录中的 SQLite 数据库文件，离开作用域时删除
pub struct TestDatabase {
    _dir: TempDir,
    url: String,
}

impl TestDatabase {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}", dir.path().join("jobstore.db").display());
        Ok(Self { _dir: dir, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 指向该数据库文件的 SQLite 后端配置
    pub fn config(&self, scheduler_name: &str, instance_id: &str) -> JobStoreConfig {
        JobStoreConfig {
            scheduler_name: scheduler_name.to_string(),
            instance_id: instance_id.to_string(),
            backend: StoreBackend::Sqlite,
            database: DatabaseConfig {
                url: self.url.clone(),
                max_connections: 4,
                ..DatabaseConfig::default()
            },
            ..JobStoreConfig::default()
        }
    }
}

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Generate unique test names based on timestamp
    pub fn unique_name(prefix: &str) -> String {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        format!("{}_{}", prefix, timestamp)
    }

    /// Generate test timestamps with offsets
    pub fn timestamp_with_offset(offset_seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_seconds)
    }
}
