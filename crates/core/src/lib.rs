pub mod config;
pub mod logging;

pub use config::{DatabaseConfig, JobStoreConfig, RetryConfig, StoreBackend};
pub use logging::{init_logging, LogConfig, LogLevel, OutputFormat};
