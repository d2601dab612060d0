pub mod entities;
pub mod matchers;
pub mod misfire;
pub mod repositories;
pub mod schedule;
pub mod signaler;
pub mod state_machine;
pub mod value_objects;

// SQLx 类型转换（仅在启用 sqlx-support feature 时编译）
#[cfg(feature = "sqlx-support")]
pub mod sqlx_impls;

pub use entities::*;
pub use jobstore_errors::{EntityKind, ErrorKind, JobStoreError, JobStoreResult};
pub use matchers::GroupMatcher;
pub use misfire::{apply_misfire, is_misfired, MisfireOutcome};
pub use repositories::*;
pub use schedule::{CronExpression, Schedule, REPEAT_INDEFINITELY};
pub use signaler::*;
pub use state_machine::TriggerState;
pub use value_objects::*;
