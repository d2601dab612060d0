//! 作业存储抽象
//!
//! 调度器只通过该接口访问作业、触发器和日历，内存实现和数据库实现
//! 必须表现出相同的语义。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use jobstore_errors::JobStoreResult;

use crate::entities::{
    Calendar, CompletedExecutionInstruction, JobDetail, Trigger, TriggerFiredResult,
};
use crate::matchers::GroupMatcher;
use crate::signaler::SchedulerSignaler;
use crate::state_machine::TriggerState;
use crate::value_objects::{JobKey, TriggerKey};

/// 一个作业及其全部触发器，用于批量存储
pub type JobWithTriggers = (JobDetail, Vec<Trigger>);

#[async_trait]
pub trait JobStore: Send + Sync {
    // ---- 生命周期 ----

    /// 校验配置并准备存储，只能调用一次
    async fn initialize(&self, signaler: Arc<dyn SchedulerSignaler>) -> JobStoreResult<()>;
    /// 调度器启动，恢复本实例遗留的获取和执行记录
    async fn scheduler_started(&self) -> JobStoreResult<()>;
    async fn scheduler_paused(&self);
    async fn scheduler_resumed(&self);
    async fn shutdown(&self);

    fn supports_persistence(&self) -> bool;
    fn is_clustered(&self) -> bool;
    /// 释放一个已获取触发器的预计耗时
    fn estimated_time_to_release_acquired_trigger(&self) -> Duration;
    fn set_thread_pool_size(&self, size: usize);
    fn instance_id(&self) -> &str;
    fn scheduler_name(&self) -> &str;

    // ---- 作业和触发器 ----

    async fn store_job_and_trigger(&self, job: &JobDetail, trigger: &Trigger)
        -> JobStoreResult<()>;
    async fn store_jobs_and_triggers(
        &self,
        jobs: &[JobWithTriggers],
        replace_existing: bool,
    ) -> JobStoreResult<()>;
    async fn store_job(&self, job: &JobDetail, replace_existing: bool) -> JobStoreResult<()>;
    async fn remove_job(&self, job_key: &JobKey) -> JobStoreResult<bool>;
    async fn remove_jobs(&self, job_keys: &[JobKey]) -> JobStoreResult<bool>;
    async fn retrieve_job(&self, job_key: &JobKey) -> JobStoreResult<Option<JobDetail>>;

    async fn store_trigger(&self, trigger: &Trigger, replace_existing: bool)
        -> JobStoreResult<()>;
    async fn remove_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<bool>;
    async fn remove_triggers(&self, trigger_keys: &[TriggerKey]) -> JobStoreResult<bool>;
    async fn replace_trigger(
        &self,
        trigger_key: &TriggerKey,
        new_trigger: &Trigger,
    ) -> JobStoreResult<bool>;
    async fn retrieve_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<Option<Trigger>>;

    async fn check_job_exists(&self, job_key: &JobKey) -> JobStoreResult<bool>;
    async fn check_trigger_exists(&self, trigger_key: &TriggerKey) -> JobStoreResult<bool>;
    async fn clear_all_scheduling_data(&self) -> JobStoreResult<()>;

    // ---- 日历 ----

    async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace_existing: bool,
    ) -> JobStoreResult<()>;
    async fn remove_calendar(&self, name: &str) -> JobStoreResult<bool>;
    async fn retrieve_calendar(&self, name: &str) -> JobStoreResult<Option<Calendar>>;
    async fn check_calendar_exists(&self, name: &str) -> JobStoreResult<bool>;

    // ---- 查询 ----

    async fn get_number_of_jobs(&self) -> JobStoreResult<usize>;
    async fn get_number_of_triggers(&self) -> JobStoreResult<usize>;
    async fn get_number_of_calendars(&self) -> JobStoreResult<usize>;
    async fn get_job_keys(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<JobKey>>;
    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<TriggerKey>>;
    async fn get_job_group_names(&self) -> JobStoreResult<Vec<String>>;
    async fn get_trigger_group_names(&self) -> JobStoreResult<Vec<String>>;
    async fn get_calendar_names(&self) -> JobStoreResult<Vec<String>>;
    async fn get_triggers_for_job(&self, job_key: &JobKey) -> JobStoreResult<Vec<Trigger>>;
    async fn get_trigger_state(&self, trigger_key: &TriggerKey)
        -> JobStoreResult<Option<TriggerState>>;

    // ---- 暂停和恢复 ----

    async fn pause_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<()>;
    async fn pause_triggers(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>>;
    async fn pause_job(&self, job_key: &JobKey) -> JobStoreResult<()>;
    async fn pause_jobs(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>>;
    async fn resume_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<()>;
    async fn resume_triggers(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>>;
    async fn resume_job(&self, job_key: &JobKey) -> JobStoreResult<()>;
    async fn resume_jobs(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>>;
    async fn get_paused_trigger_groups(&self) -> JobStoreResult<Vec<String>>;
    async fn is_job_group_paused(&self, group: &str) -> JobStoreResult<bool>;
    async fn is_trigger_group_paused(&self, group: &str) -> JobStoreResult<bool>;
    async fn pause_all(&self) -> JobStoreResult<()>;
    async fn resume_all(&self) -> JobStoreResult<()>;

    // ---- 获取、触发和完成 ----

    /// 获取在 `no_later_than + time_window` 之前到期的触发器，并原子地标记为 ACQUIRED
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> JobStoreResult<Vec<Trigger>>;
    /// 放弃一个已获取但不再执行的触发器
    async fn release_acquired_trigger(&self, trigger: &Trigger) -> JobStoreResult<()>;
    async fn triggers_fired(&self, triggers: &[Trigger]) -> JobStoreResult<Vec<TriggerFiredResult>>;
    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> JobStoreResult<()>;
}
