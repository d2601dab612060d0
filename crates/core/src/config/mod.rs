//! 作业存储配置
//!
//! 配置按 默认值 → TOML 文件 → 环境变量 的顺序合并，加载后立即校验。

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{DatabaseConfig, JobStoreConfig, RetryConfig, StoreBackend, AUTO_INSTANCE_ID};
