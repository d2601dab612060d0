pub mod database;
pub mod job_store;
pub mod retry;

pub use database::DatabaseConfig;
pub use job_store::{JobStoreConfig, StoreBackend, AUTO_INSTANCE_ID};
pub use retry::RetryConfig;
