//! # JobStore Testing Utils
//!
//! 作业存储各个 crate 共用的测试工具。
//!
//! - **Builders**: 带默认值的作业和触发器构造器
//! - **Mocks**: 记录所有通知的信号器
//! - **Helpers**: 临时 SQLite 数据库和时间工具
//!
//! ```toml
//! [dev-dependencies]
//! jobstore-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
