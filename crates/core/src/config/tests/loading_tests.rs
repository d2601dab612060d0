use crate::config::models::{JobStoreConfig, StoreBackend, AUTO_INSTANCE_ID};
use crate::logging::{LogLevel, OutputFormat};
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_file_with_environment_override() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
scheduler_name = "ClusterA"
instance_id = "node-1"
backend = "sqlite"
misfire_threshold_ms = 30000

[database]
url = "sqlite://cluster.db"
max_connections = 4

[logging]
level = "debug"
format = "pretty"
"#
    )
    .unwrap();

    // 环境变量优先级最高
    env::set_var("JOBSTORE_RETRY__MAX_ATTEMPTS", "7");
    let config = JobStoreConfig::load(file.path().to_str()).unwrap();
    env::remove_var("JOBSTORE_RETRY__MAX_ATTEMPTS");

    assert_eq!(config.scheduler_name, "ClusterA");
    assert_eq!(config.instance_id, "node-1");
    assert_eq!(config.backend, StoreBackend::Sqlite);
    assert_eq!(config.misfire_threshold_ms, 30_000);
    assert_eq!(config.database.url, "sqlite://cluster.db");
    assert_eq!(config.database.max_connections, 4);
    // 未指定的字段保持默认值
    assert_eq!(config.database.busy_timeout_ms, 5_000);
    assert_eq!(config.retry.max_attempts, 7);
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.format, OutputFormat::Pretty);

    // 不存在的文件直接报错
    assert!(JobStoreConfig::load(Some("/nonexistent/jobstore.toml")).is_err());
}

#[test]
fn test_toml_round_trip() {
    let config = JobStoreConfig {
        scheduler_name: "RoundTrip".to_string(),
        backend: StoreBackend::Sqlite,
        ..JobStoreConfig::default()
    };
    let text = config.to_toml().unwrap();
    let parsed = JobStoreConfig::from_toml(&text).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_defaults_from_empty_toml() {
    let config = JobStoreConfig::from_toml("").unwrap();
    assert_eq!(config.backend, StoreBackend::Memory);
    assert_eq!(config.misfire_threshold_ms, 60_000);
    assert_eq!(config.instance_id, AUTO_INSTANCE_ID);
    assert_eq!(config.retry.max_attempts, 3);
}

#[test]
fn test_resolved_instance_id() {
    let explicit = JobStoreConfig {
        instance_id: "node-7".to_string(),
        ..JobStoreConfig::default()
    };
    assert_eq!(explicit.resolved_instance_id(), "node-7");

    let generated = JobStoreConfig::default().resolved_instance_id();
    assert_ne!(generated, AUTO_INSTANCE_ID);
    assert!(!generated.is_empty());
}
