//! 触发器的调度策略
//!
//! 每个触发器携带一个调度策略变体，负责计算下一次触发时间。

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use jobstore_errors::{JobStoreError, JobStoreResult};

use crate::value_objects::truncate_millis;

/// 无限重复
pub const REPEAT_INDEFINITELY: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// 固定间隔重复；repeat_count 为 0 时只在开始时间触发一次
    Simple {
        repeat_interval_ms: i64,
        repeat_count: i32,
        times_triggered: i32,
    },
    /// 带秒字段的CRON表达式，按UTC计算
    Cron { expression: String },
}

impl Schedule {
    pub fn once() -> Self {
        Schedule::Simple {
            repeat_interval_ms: 0,
            repeat_count: 0,
            times_triggered: 0,
        }
    }

    pub fn repeat(interval: Duration, repeat_count: i32) -> Self {
        Schedule::Simple {
            repeat_interval_ms: interval.num_milliseconds(),
            repeat_count,
            times_triggered: 0,
        }
    }

    pub fn repeat_forever(interval: Duration) -> Self {
        Self::repeat(interval, REPEAT_INDEFINITELY)
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            expression: expression.into(),
        }
    }

    /// 校验调度参数
    pub fn validate(&self) -> JobStoreResult<()> {
        match self {
            Schedule::Simple {
                repeat_interval_ms,
                repeat_count,
                ..
            } => {
                if *repeat_count < REPEAT_INDEFINITELY {
                    return Err(JobStoreError::conflict(format!(
                        "重复次数无效: {repeat_count}"
                    )));
                }
                if *repeat_count != 0 && *repeat_interval_ms <= 0 {
                    return Err(JobStoreError::conflict("重复触发时间间隔必须大于0"));
                }
                Ok(())
            }
            Schedule::Cron { expression } => CronExpression::new(expression).map(|_| ()),
        }
    }

    pub fn first_fire_time(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Simple { .. } => {
                if end.is_some_and(|end| end < start) {
                    None
                } else {
                    Some(start)
                }
            }
            Schedule::Cron { .. } => {
                self.fire_time_after(start, end, start - Duration::milliseconds(1))
            }
        }
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn fire_time_after(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let next = match self {
            Schedule::Simple {
                repeat_interval_ms,
                repeat_count,
                times_triggered,
            } => {
                if *repeat_count != REPEAT_INDEFINITELY && times_triggered > repeat_count {
                    return None;
                }
                if after < start {
                    Some(start)
                } else if *repeat_count == 0 || *repeat_interval_ms <= 0 {
                    None
                } else {
                    let elapsed = (after - start).num_milliseconds();
                    let n = elapsed / repeat_interval_ms + 1;
                    if *repeat_count != REPEAT_INDEFINITELY && n > i64::from(*repeat_count) {
                        None
                    } else {
                        slot_time(start, n, *repeat_interval_ms)
                    }
                }
            }
            Schedule::Cron { expression } => {
                let base = if after < start {
                    start - Duration::milliseconds(1)
                } else {
                    after
                };
                match CronExpression::new(expression) {
                    Ok(cron) => cron.next_execution_time(base),
                    Err(e) => {
                        warn!("无法计算CRON触发时间: {}", e);
                        None
                    }
                }
            }
        };

        next.map(truncate_millis)
            .filter(|time| end.map_or(true, |end| *time <= end))
    }

    /// 最后一次触发时间；无限重复且没有结束时间时为 `None`
    pub fn final_fire_time(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let last_slot_before_end = |interval: i64, end: DateTime<Utc>| {
            if end < start {
                return None;
            }
            let slots = (end - start).num_milliseconds() / interval;
            slot_time(start, slots, interval)
        };

        match self {
            Schedule::Simple {
                repeat_interval_ms,
                repeat_count,
                ..
            } => {
                if *repeat_count == 0 || *repeat_interval_ms <= 0 {
                    return Some(start).filter(|time| end.map_or(true, |end| *time <= end));
                }
                if *repeat_count == REPEAT_INDEFINITELY {
                    return last_slot_before_end(*repeat_interval_ms, end?);
                }
                let last = slot_time(start, i64::from(*repeat_count), *repeat_interval_ms);
                match (last, end) {
                    (Some(last), Some(end)) if last <= end => Some(last),
                    (Some(last), None) => Some(last),
                    (_, Some(end)) => last_slot_before_end(*repeat_interval_ms, end),
                    (None, None) => None,
                }
            }
            Schedule::Cron { expression } => {
                let end = end?;
                CronExpression::new(expression)
                    .ok()?
                    .previous_execution_time(end + Duration::milliseconds(1))
                    .map(truncate_millis)
                    .filter(|time| *time >= start)
            }
        }
    }

    /// 记录一次触发
    pub fn triggered(&mut self) {
        if let Schedule::Simple {
            times_triggered, ..
        } = self
        {
            *times_triggered += 1;
        }
    }

    /// 把 `from` 到 `until`（含）之间错过的触发计为已触发
    pub fn consume_missed(&mut self, from: DateTime<Utc>, until: DateTime<Utc>) {
        if let Schedule::Simple {
            repeat_interval_ms,
            times_triggered,
            ..
        } = self
        {
            if until < from {
                return;
            }
            let missed = if *repeat_interval_ms > 0 {
                (until - from).num_milliseconds() / *repeat_interval_ms + 1
            } else {
                1
            };
            *times_triggered = times_triggered.saturating_add(missed.min(i32::MAX as i64) as i32);
        }
    }
}

/// 第 `slots` 个间隔的时间；超出可表示范围时为 `None`
fn slot_time(start: DateTime<Utc>, slots: i64, interval_ms: i64) -> Option<DateTime<Utc>> {
    slots
        .checked_mul(interval_ms)
        .and_then(Duration::try_milliseconds)
        .and_then(|offset| start.checked_add_signed(offset))
}

/// CRON表达式解析和计算
pub struct CronExpression {
    schedule: cron::Schedule,
}

impl CronExpression {
    pub fn new(cron_expr: &str) -> JobStoreResult<Self> {
        let schedule =
            cron::Schedule::from_str(cron_expr).map_err(|e| JobStoreError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { schedule })
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 严格早于指定时间的上一次执行时间
    pub fn previous_execution_time(&self, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&before).next_back()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_simple_once() {
        let schedule = Schedule::once();
        assert_eq!(schedule.first_fire_time(base(), None), Some(base()));
        assert_eq!(schedule.fire_time_after(base(), None, base()), None);
    }

    #[test]
    fn test_simple_repeat_count() {
        let mut schedule = Schedule::repeat(Duration::seconds(10), 2);
        let start = base();

        let first = schedule.first_fire_time(start, None).unwrap();
        assert_eq!(first, start);
        schedule.triggered();
        let second = schedule.fire_time_after(start, None, first).unwrap();
        assert_eq!(second, start + Duration::seconds(10));
        schedule.triggered();
        let third = schedule.fire_time_after(start, None, second).unwrap();
        assert_eq!(third, start + Duration::seconds(20));
        schedule.triggered();
        assert_eq!(schedule.fire_time_after(start, None, third), None);
    }

    #[test]
    fn test_simple_respects_end_time() {
        let schedule = Schedule::repeat_forever(Duration::seconds(10));
        let end = base() + Duration::seconds(15);
        assert_eq!(
            schedule.fire_time_after(base(), Some(end), base()),
            Some(base() + Duration::seconds(10))
        );
        assert_eq!(
            schedule.fire_time_after(base(), Some(end), base() + Duration::seconds(10)),
            None
        );
        assert_eq!(
            schedule.first_fire_time(base(), Some(base() - Duration::seconds(1))),
            None
        );
    }

    #[test]
    fn test_simple_fire_time_after_between_ticks() {
        let schedule = Schedule::repeat_forever(Duration::seconds(10));
        let next = schedule
            .fire_time_after(base(), None, base() + Duration::seconds(25))
            .unwrap();
        assert_eq!(next, base() + Duration::seconds(30));
    }

    #[test]
    fn test_consume_missed() {
        let mut schedule = Schedule::repeat(Duration::seconds(10), 3);
        schedule.consume_missed(base(), base() + Duration::seconds(25));
        match schedule {
            Schedule::Simple {
                times_triggered, ..
            } => assert_eq!(times_triggered, 3),
            _ => unreachable!(),
        }
        assert_eq!(
            schedule.fire_time_after(base(), None, base() + Duration::seconds(25)),
            Some(base() + Duration::seconds(30))
        );
    }

    #[test]
    fn test_cron_first_fire_time_includes_start() {
        let schedule = Schedule::cron("0 * * * * *");
        assert_eq!(schedule.first_fire_time(base(), None), Some(base()));

        let later_start = base() + Duration::seconds(30);
        let first = schedule.first_fire_time(later_start, None).unwrap();
        assert_eq!(first, base() + Duration::minutes(1));
    }

    #[test]
    fn test_cron_next_execution_time() {
        let cron = CronExpression::new("0 0 0 * * *").unwrap();
        let next = cron.next_execution_time(base()).unwrap();
        assert_eq!(next.hour(), 0);
        assert_eq!(next.minute(), 0);

        let upcoming = CronExpression::new("0 0 * * * *")
            .unwrap()
            .upcoming_times(base() + Duration::minutes(30), 3);
        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0].hour(), 13);
        assert_eq!(upcoming[2].hour(), 15);
    }

    #[test]
    fn test_final_fire_time() {
        let finite = Schedule::repeat(Duration::seconds(10), 3);
        assert_eq!(
            finite.final_fire_time(base(), None),
            Some(base() + Duration::seconds(30))
        );
        assert_eq!(
            finite.final_fire_time(base(), Some(base() + Duration::seconds(25))),
            Some(base() + Duration::seconds(20))
        );

        let forever = Schedule::repeat_forever(Duration::seconds(10));
        assert_eq!(forever.final_fire_time(base(), None), None);

        let hourly = Schedule::cron("0 0 * * * *");
        assert_eq!(
            hourly.final_fire_time(base(), Some(base() + Duration::minutes(150))),
            Some(base() + Duration::hours(2))
        );
    }

    #[test]
    fn test_schedule_validation() {
        assert!(Schedule::cron("0 */5 * * * *").validate().is_ok());
        assert!(matches!(
            Schedule::cron("invalid").validate(),
            Err(JobStoreError::InvalidCron { .. })
        ));
        assert!(Schedule::repeat(Duration::zero(), 3).validate().is_err());
        assert!(Schedule::once().validate().is_ok());
    }

    #[test]
    fn test_huge_interval_has_no_next_fire_time() {
        let schedule = Schedule::repeat_forever(Duration::milliseconds(i64::MAX / 2));
        assert!(schedule.validate().is_ok());
        assert_eq!(schedule.first_fire_time(base(), None), Some(base()));
        assert_eq!(schedule.fire_time_after(base(), None, base()), None);

        let bounded = Schedule::repeat(Duration::milliseconds(i64::MAX / 2), 3);
        assert_eq!(bounded.final_fire_time(base(), None), None);
        let end = base() + Duration::days(1);
        assert_eq!(bounded.final_fire_time(base(), Some(end)), Some(base()));
    }
}
