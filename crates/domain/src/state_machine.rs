//! 触发器生命周期状态
//!
//! 所有状态转换都集中在这里，内存存储和数据库存储共用同一套规则。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerState {
    Waiting,
    Acquired,
    Executing,
    Complete,
    Error,
    Blocked,
    Paused,
    PausedBlocked,
}

impl TriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Waiting => "WAITING",
            TriggerState::Acquired => "ACQUIRED",
            TriggerState::Executing => "EXECUTING",
            TriggerState::Complete => "COMPLETE",
            TriggerState::Error => "ERROR",
            TriggerState::Blocked => "BLOCKED",
            TriggerState::Paused => "PAUSED",
            TriggerState::PausedBlocked => "PAUSED_BLOCKED",
        }
    }

    /// 新存入的触发器的初始状态
    pub fn initial(group_paused: bool, job_blocked: bool) -> Self {
        match (group_paused, job_blocked) {
            (true, true) => TriggerState::PausedBlocked,
            (true, false) => TriggerState::Paused,
            (false, true) => TriggerState::Blocked,
            (false, false) => TriggerState::Waiting,
        }
    }

    /// 暂停后的状态；`None` 表示保持不变
    pub fn paused(self, job_blocked: bool) -> Option<Self> {
        match self {
            TriggerState::Complete
            | TriggerState::Error
            | TriggerState::Paused
            | TriggerState::PausedBlocked => None,
            TriggerState::Blocked => Some(TriggerState::PausedBlocked),
            TriggerState::Executing if job_blocked => Some(TriggerState::PausedBlocked),
            TriggerState::Waiting | TriggerState::Acquired | TriggerState::Executing => {
                Some(TriggerState::Paused)
            }
        }
    }

    /// 恢复后的状态；只有暂停中的触发器会变化
    pub fn resumed(self, job_blocked: bool) -> Option<Self> {
        match self {
            TriggerState::Paused | TriggerState::PausedBlocked => Some(if job_blocked {
                TriggerState::Blocked
            } else {
                TriggerState::Waiting
            }),
            _ => None,
        }
    }

    /// 有状态作业开始执行时，同作业其他触发器的状态
    pub fn blocked(self) -> Option<Self> {
        match self {
            TriggerState::Waiting | TriggerState::Acquired => Some(TriggerState::Blocked),
            TriggerState::Paused => Some(TriggerState::PausedBlocked),
            _ => None,
        }
    }

    /// 有状态作业执行结束后解除阻塞
    pub fn unblocked(self) -> Option<Self> {
        match self {
            TriggerState::Blocked => Some(TriggerState::Waiting),
            TriggerState::PausedBlocked => Some(TriggerState::Paused),
            _ => None,
        }
    }

    /// 调度实例重启时对遗留状态的恢复
    pub fn recovered(self) -> Option<Self> {
        match self {
            TriggerState::Acquired | TriggerState::Blocked | TriggerState::Executing => {
                Some(TriggerState::Waiting)
            }
            TriggerState::PausedBlocked => Some(TriggerState::Paused),
            _ => None,
        }
    }

    /// 执行完成后回到的状态（执行期间被暂停的停在 PAUSED）
    pub fn after_execution(self) -> Self {
        match self {
            TriggerState::Paused | TriggerState::PausedBlocked => TriggerState::Paused,
            TriggerState::Executing => TriggerState::Waiting,
            other => other,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, TriggerState::Paused | TriggerState::PausedBlocked)
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(TriggerState::Waiting),
            "ACQUIRED" => Ok(TriggerState::Acquired),
            "EXECUTING" => Ok(TriggerState::Executing),
            "COMPLETE" => Ok(TriggerState::Complete),
            "ERROR" => Ok(TriggerState::Error),
            "BLOCKED" => Ok(TriggerState::Blocked),
            "PAUSED" => Ok(TriggerState::Paused),
            "PAUSED_BLOCKED" => Ok(TriggerState::PausedBlocked),
            _ => Err(format!("Invalid trigger state: {s}")),
        }
    }
}
