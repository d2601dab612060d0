use serde::{Deserialize, Serialize};

/// 分组名匹配器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMatcher {
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Anything,
}

impl GroupMatcher {
    pub fn group_equals(group: impl Into<String>) -> Self {
        Self::Equals(group.into())
    }

    pub fn group_starts_with(prefix: impl Into<String>) -> Self {
        Self::StartsWith(prefix.into())
    }

    pub fn group_ends_with(suffix: impl Into<String>) -> Self {
        Self::EndsWith(suffix.into())
    }

    pub fn group_contains(fragment: impl Into<String>) -> Self {
        Self::Contains(fragment.into())
    }

    pub fn any_group() -> Self {
        Self::Anything
    }

    pub fn is_match(&self, group: &str) -> bool {
        match self {
            GroupMatcher::Equals(value) => group == value,
            GroupMatcher::StartsWith(value) => group.starts_with(value.as_str()),
            GroupMatcher::EndsWith(value) => group.ends_with(value.as_str()),
            GroupMatcher::Contains(value) => group.contains(value.as_str()),
            GroupMatcher::Anything => true,
        }
    }

    /// 精确匹配时返回分组名
    pub fn exact_group(&self) -> Option<&str> {
        match self {
            GroupMatcher::Equals(value) => Some(value),
            _ => None,
        }
    }
}
