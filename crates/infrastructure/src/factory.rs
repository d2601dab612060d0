use std::sync::Arc;

use chrono::Duration;
use jobstore_core::{JobStoreConfig, StoreBackend};
use jobstore_domain::JobStore;
use jobstore_errors::{JobStoreError, JobStoreResult};
use tracing::info;

use crate::database::SqliteJobStore;
use crate::memory::RamJobStore;

/// 按配置创建作业存储
pub struct JobStoreFactory;

impl JobStoreFactory {
    pub async fn create(config: &JobStoreConfig) -> JobStoreResult<Arc<dyn JobStore>> {
        config
            .validate()
            .map_err(|e| JobStoreError::config_error(format!("{e:#}")))?;

        let store: Arc<dyn JobStore> = match config.backend {
            StoreBackend::Memory => {
                let misfire_threshold_ms = i64::try_from(config.misfire_threshold_ms)
                    .map_err(|_| JobStoreError::config_error("错过触发阈值过大"))?;
                Arc::new(RamJobStore::with_misfire_threshold(
                    &config.scheduler_name,
                    config.resolved_instance_id(),
                    Duration::milliseconds(misfire_threshold_ms),
                ))
            }
            StoreBackend::Sqlite => Arc::new(SqliteJobStore::connect(config).await?),
        };

        info!(
            backend = ?config.backend,
            scheduler_name = %config.scheduler_name,
            instance_id = %store.instance_id(),
            "作业存储已创建"
        );
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_core::DatabaseConfig;

    #[tokio::test]
    async fn test_create_memory_store() {
        let config = JobStoreConfig {
            instance_id: "node-1".to_string(),
            ..JobStoreConfig::default()
        };
        let store = JobStoreFactory::create(&config).await.unwrap();
        assert!(!store.supports_persistence());
        assert_eq!(store.instance_id(), "node-1");
        assert_eq!(store.scheduler_name(), "DefaultScheduler");
    }

    #[tokio::test]
    async fn test_create_sqlite_store() {
        let config = JobStoreConfig {
            backend: StoreBackend::Sqlite,
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                ..DatabaseConfig::default()
            },
            ..JobStoreConfig::default()
        };
        let store = JobStoreFactory::create(&config).await.unwrap();
        assert!(store.supports_persistence());
        assert!(store.instance_id().contains('-'));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = JobStoreConfig {
            backend: StoreBackend::Sqlite,
            database: DatabaseConfig {
                url: "postgres://localhost/db".to_string(),
                ..DatabaseConfig::default()
            },
            ..JobStoreConfig::default()
        };
        let err = JobStoreFactory::create(&config).await.err().unwrap();
        assert!(err.is_fatal());
    }
}
