//! 作业存储的两种实现：内存和 SQLite
//!
//! 调度规则只在 `job_store::StoreEngine` 中实现一次，两种后端只提供
//! 各自的存储原语和并发控制。

pub mod database;
pub mod factory;
pub mod job_store;
pub mod memory;
pub mod retry;

pub use database::{DatabaseManager, SqliteJobStore};
pub use factory::JobStoreFactory;
pub use job_store::{StoreContext, StoreEngine, StoreLifecycle, StoreOperations};
pub use memory::RamJobStore;
pub use retry::RetryPolicy;
