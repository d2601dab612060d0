use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobstore_errors::{JobStoreError, JobStoreResult};

use crate::schedule::Schedule;
use crate::state_machine::TriggerState;
use crate::value_objects::{now_millis, truncate_millis, JobKey, TriggerKey};

/// 作业数据，执行时交给作业逻辑读取
pub type JobDataMap = serde_json::Map<String, serde_json::Value>;

/// 默认触发优先级
pub const DEFAULT_PRIORITY: i32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    pub description: Option<String>,
    /// 作业逻辑的类型标识，由调度器解释
    pub job_type: String,
    /// 没有触发器时仍然保留
    pub durable: bool,
    /// 执行后持久化数据且禁止并发执行
    pub stateful: bool,
    pub job_data: JobDataMap,
}

impl JobDetail {
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            description: None,
            job_type: job_type.into(),
            durable: false,
            stateful: false,
            job_data: JobDataMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.job_data.insert(key.into(), value);
        self
    }
}

/// 错过触发时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MisfireInstruction {
    /// 等同于 FireOnceNow
    #[default]
    Smart,
    FireOnceNow,
    RescheduleNextValid,
    DoNothing,
    IgnoreMisfirePolicy,
}

impl MisfireInstruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MisfireInstruction::Smart => "SMART",
            MisfireInstruction::FireOnceNow => "FIRE_ONCE_NOW",
            MisfireInstruction::RescheduleNextValid => "RESCHEDULE_NEXT_VALID",
            MisfireInstruction::DoNothing => "DO_NOTHING",
            MisfireInstruction::IgnoreMisfirePolicy => "IGNORE_MISFIRE_POLICY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SMART" => Some(MisfireInstruction::Smart),
            "FIRE_ONCE_NOW" => Some(MisfireInstruction::FireOnceNow),
            "RESCHEDULE_NEXT_VALID" => Some(MisfireInstruction::RescheduleNextValid),
            "DO_NOTHING" => Some(MisfireInstruction::DoNothing),
            "IGNORE_MISFIRE_POLICY" => Some(MisfireInstruction::IgnoreMisfirePolicy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub description: Option<String>,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub misfire_instruction: MisfireInstruction,
    pub calendar_name: Option<String>,
    pub schedule: Schedule,
    pub state: TriggerState,
    /// 获取时分配，只存在于本次触发的快照中
    #[serde(skip)]
    pub fire_instance_id: Option<String>,
}

impl Trigger {
    /// 创建触发器并计算首次触发时间
    pub fn new(
        key: TriggerKey,
        job_key: JobKey,
        schedule: Schedule,
        start_time: DateTime<Utc>,
    ) -> Self {
        let start_time = truncate_millis(start_time);
        let mut trigger = Self {
            key,
            job_key,
            description: None,
            priority: DEFAULT_PRIORITY,
            start_time,
            end_time: None,
            next_fire_time: None,
            previous_fire_time: None,
            misfire_instruction: MisfireInstruction::default(),
            calendar_name: None,
            schedule,
            state: TriggerState::Waiting,
            fire_instance_id: None,
        };
        trigger.compute_first_fire_time();
        trigger
    }

    /// 从当前时间开始立即触发
    pub fn start_now(key: TriggerKey, job_key: JobKey, schedule: Schedule) -> Self {
        Self::new(key, job_key, schedule, now_millis())
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(truncate_millis(end_time));
        self.compute_first_fire_time();
        self
    }

    pub fn with_calendar(mut self, calendar_name: impl Into<String>) -> Self {
        self.calendar_name = Some(calendar_name.into());
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn compute_first_fire_time(&mut self) -> Option<DateTime<Utc>> {
        self.next_fire_time = self.schedule.first_fire_time(self.start_time, self.end_time);
        self.next_fire_time
    }

    pub fn fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .fire_time_after(self.start_time, self.end_time, after)
    }

    pub fn final_fire_time(&self) -> Option<DateTime<Utc>> {
        self.schedule.final_fire_time(self.start_time, self.end_time)
    }

    /// 推进到下一次触发：previous ← next，next ← 调度计算值
    pub fn triggered(&mut self) {
        self.schedule.triggered();
        self.previous_fire_time = self.next_fire_time;
        self.next_fire_time = self
            .next_fire_time
            .and_then(|fired| self.fire_time_after(fired));
    }

    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// 存储前的校验
    pub fn validate(&self) -> JobStoreResult<()> {
        self.schedule.validate()?;
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(JobStoreError::conflict(format!(
                    "触发器结束时间早于开始时间: {}",
                    self.key
                )));
            }
        }
        if self.next_fire_time.is_none() {
            return Err(JobStoreError::conflict(format!(
                "触发器永远不会触发: {}",
                self.key
            )));
        }
        Ok(())
    }

    /// 所有时间截断到毫秒，保证持久化往返一致
    pub fn normalized(mut self) -> Self {
        self.start_time = truncate_millis(self.start_time);
        self.end_time = self.end_time.map(truncate_millis);
        self.next_fire_time = self.next_fire_time.map(truncate_millis);
        self.previous_fire_time = self.previous_fire_time.map(truncate_millis);
        self
    }
}

/// 日历：排除规则对存储层是不透明的数据
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Calendar {
    pub description: Option<String>,
    pub data: serde_json::Value,
}

impl Calendar {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            description: None,
            data,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// 触发成功时交给执行器的数据
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiredBundle {
    pub job_detail: JobDetail,
    pub trigger: Trigger,
    pub calendar: Option<Calendar>,
    pub recovering: bool,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FiredDisposition {
    Success(Box<TriggerFiredBundle>),
    /// 有状态作业正在执行，本次触发被否决
    Vetoed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiredResult {
    pub trigger: Trigger,
    pub disposition: FiredDisposition,
}

impl TriggerFiredResult {
    pub fn bundle(&self) -> Option<&TriggerFiredBundle> {
        match &self.disposition {
            FiredDisposition::Success(bundle) => Some(bundle),
            _ => None,
        }
    }

    pub fn is_vetoed(&self) -> bool {
        matches!(self.disposition, FiredDisposition::Vetoed)
    }
}

/// 作业执行完成后对触发器的处理指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletedExecutionInstruction {
    Noop,
    ReExecuteJob,
    SetTriggerComplete,
    DeleteTrigger,
    SetAllJobTriggersComplete,
    SetTriggerError,
    SetAllJobTriggersError,
}

/// 已获取或正在执行的触发记录
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTriggerRecord {
    pub fire_instance_id: String,
    pub instance_id: String,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub stateful: bool,
    pub state: TriggerState,
    pub priority: i32,
    pub fired_time: DateTime<Utc>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl FiredTriggerRecord {
    pub fn acquired(
        trigger: &Trigger,
        fire_instance_id: impl Into<String>,
        instance_id: impl Into<String>,
        stateful: bool,
    ) -> Self {
        Self {
            fire_instance_id: fire_instance_id.into(),
            instance_id: instance_id.into(),
            trigger_key: trigger.key.clone(),
            job_key: trigger.job_key.clone(),
            stateful,
            state: TriggerState::Acquired,
            priority: trigger.priority,
            fired_time: now_millis(),
            scheduled_time: trigger.next_fire_time,
        }
    }

    /// 执行中的有状态作业会阻塞同作业的其他触发器
    pub fn blocks_job(&self) -> bool {
        self.stateful && self.state == TriggerState::Executing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_trigger_defaults() {
        let trigger = Trigger::new(
            TriggerKey::with_default_group("t1"),
            JobKey::with_default_group("j1"),
            Schedule::once(),
            start(),
        );
        assert_eq!(trigger.priority, DEFAULT_PRIORITY);
        assert_eq!(trigger.state, TriggerState::Waiting);
        assert_eq!(trigger.misfire_instruction, MisfireInstruction::Smart);
        assert_eq!(trigger.next_fire_time, Some(start()));
        assert!(trigger.validate().is_ok());
    }

    #[test]
    fn test_trigger_advances_on_fire() {
        let mut trigger = Trigger::new(
            TriggerKey::new("t1", "g"),
            JobKey::new("j1", "g"),
            Schedule::repeat(Duration::minutes(1), 1),
            start(),
        );
        trigger.triggered();
        assert_eq!(trigger.previous_fire_time, Some(start()));
        assert_eq!(trigger.next_fire_time, Some(start() + Duration::minutes(1)));
        trigger.triggered();
        assert_eq!(trigger.next_fire_time, None);
        assert!(!trigger.may_fire_again());
    }

    #[test]
    fn test_trigger_that_never_fires_is_rejected() {
        let trigger = Trigger::new(
            TriggerKey::new("t1", "g"),
            JobKey::new("j1", "g"),
            Schedule::once(),
            start(),
        )
        .with_end_time(start() - Duration::seconds(1));
        assert!(trigger.next_fire_time.is_none());
        assert!(matches!(
            trigger.validate(),
            Err(JobStoreError::LogicalConflict(_))
        ));
    }

    #[test]
    fn test_invalid_cron_is_reported_first() {
        let trigger = Trigger::new(
            TriggerKey::new("t1", "g"),
            JobKey::new("j1", "g"),
            Schedule::cron("not a cron"),
            start(),
        );
        assert!(matches!(
            trigger.validate(),
            Err(JobStoreError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_misfire_instruction_round_trip() {
        for instruction in [
            MisfireInstruction::Smart,
            MisfireInstruction::FireOnceNow,
            MisfireInstruction::RescheduleNextValid,
            MisfireInstruction::DoNothing,
            MisfireInstruction::IgnoreMisfirePolicy,
        ] {
            assert_eq!(MisfireInstruction::parse(instruction.as_str()), Some(instruction));
        }
    }

    #[test]
    fn test_job_detail_builder() {
        let job = JobDetail::new(JobKey::new("j1", "g"), "report")
            .durable(true)
            .stateful(true)
            .with_data("count", serde_json::json!(1));
        assert!(job.durable);
        assert!(job.stateful);
        assert_eq!(job.job_data.get("count"), Some(&serde_json::json!(1)));
    }
}
