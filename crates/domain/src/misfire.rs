//! 错过触发的判定和处理

use chrono::{DateTime, Duration, Utc};

use crate::entities::{MisfireInstruction, Trigger};
use crate::state_machine::TriggerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfireOutcome {
    NotMisfired,
    /// 已按指令重新计算下一次触发时间
    Rescheduled,
    /// 不会再触发，需要删除触发器
    Exhausted,
}

/// 只有 WAITING 且下一次触发时间早于 `now - threshold` 的触发器才算错过
pub fn is_misfired(trigger: &Trigger, now: DateTime<Utc>, threshold: Duration) -> bool {
    if trigger.state != TriggerState::Waiting
        || trigger.misfire_instruction == MisfireInstruction::IgnoreMisfirePolicy
    {
        return false;
    }
    trigger
        .next_fire_time
        .is_some_and(|next| next < now - threshold)
}

/// 判定并按错过触发指令更新触发器
pub fn apply_misfire(trigger: &mut Trigger, now: DateTime<Utc>, threshold: Duration) -> MisfireOutcome {
    if !is_misfired(trigger, now, threshold) {
        return MisfireOutcome::NotMisfired;
    }

    match trigger.misfire_instruction {
        MisfireInstruction::Smart | MisfireInstruction::FireOnceNow => {
            trigger.next_fire_time = Some(now);
        }
        MisfireInstruction::RescheduleNextValid => {
            trigger.next_fire_time = trigger.fire_time_after(now);
        }
        MisfireInstruction::DoNothing => {
            if let Some(missed_from) = trigger.next_fire_time {
                trigger.schedule.consume_missed(missed_from, now);
            }
            trigger.next_fire_time = trigger.fire_time_after(now);
        }
        MisfireInstruction::IgnoreMisfirePolicy => return MisfireOutcome::NotMisfired,
    }

    if trigger.next_fire_time.is_some() {
        MisfireOutcome::Rescheduled
    } else {
        MisfireOutcome::Exhausted
    }
}
