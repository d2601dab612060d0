use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 未指定分组时使用的默认分组名
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// 作业标识: (name, group)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

/// 触发器标识: (name, group)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

macro_rules! impl_key {
    ($ty:ident) => {
        impl $ty {
            pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
                Self {
                    name: name.into(),
                    group: group.into(),
                }
            }

            /// 使用默认分组创建
            pub fn with_default_group(name: impl Into<String>) -> Self {
                Self::new(name, DEFAULT_GROUP)
            }
        }

        // 先比较分组再比较名称
        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> Ordering {
                self.group
                    .cmp(&other.group)
                    .then_with(|| self.name.cmp(&other.name))
            }
        }

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}", self.group, self.name)
            }
        }
    };
}

impl_key!(JobKey);
impl_key!(TriggerKey);

/// 截断到毫秒精度，保证各存储后端的往返一致
pub fn truncate_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

/// 当前时间（毫秒精度）
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}
