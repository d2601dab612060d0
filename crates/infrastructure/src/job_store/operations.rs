//! 存储原语
//!
//! 调度规则只依赖这些原语，由内存状态和 SQLite 事务分别实现。
//! 每个调用都发生在调用方已经持有的写锁或事务内。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobstore_domain::{
    Calendar, FiredTriggerRecord, GroupMatcher, JobDetail, JobKey, Trigger, TriggerKey,
    TriggerState,
};
use jobstore_errors::JobStoreResult;

#[async_trait]
pub trait StoreOperations: Send {
    // ---- 作业 ----
    async fn job(&mut self, job_key: &JobKey) -> JobStoreResult<Option<JobDetail>>;
    async fn job_exists(&mut self, job_key: &JobKey) -> JobStoreResult<bool>;
    /// 插入或覆盖作业，不影响其触发器
    async fn put_job(&mut self, job: &JobDetail) -> JobStoreResult<()>;
    async fn delete_job(&mut self, job_key: &JobKey) -> JobStoreResult<bool>;
    async fn job_keys(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<JobKey>>;
    async fn job_group_names(&mut self) -> JobStoreResult<Vec<String>>;
    async fn count_jobs(&mut self) -> JobStoreResult<usize>;

    // ---- 触发器 ----
    async fn trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<Option<Trigger>>;
    async fn trigger_exists(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool>;
    /// 插入或覆盖触发器（含状态）
    async fn put_trigger(&mut self, trigger: &Trigger) -> JobStoreResult<()>;
    async fn delete_trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool>;
    async fn triggers_for_job(&mut self, job_key: &JobKey) -> JobStoreResult<Vec<Trigger>>;
    async fn trigger_keys(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<TriggerKey>>;
    async fn trigger_group_names(&mut self) -> JobStoreResult<Vec<String>>;
    async fn count_triggers(&mut self) -> JobStoreResult<usize>;
    async fn calendar_in_use(&mut self, calendar_name: &str) -> JobStoreResult<bool>;
    /// WAITING 且下一次触发时间不晚于 `no_later_than` 的触发器，
    /// 按 (触发时间升序, 优先级降序, 键升序) 排列
    async fn waiting_triggers_due(
        &mut self,
        no_later_than: DateTime<Utc>,
        limit: usize,
    ) -> JobStoreResult<Vec<Trigger>>;
    /// WAITING → ACQUIRED 的比较交换；触发器已被他人修改时返回 `false`
    async fn mark_acquired(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool>;

    // ---- 日历 ----
    async fn calendar(&mut self, name: &str) -> JobStoreResult<Option<Calendar>>;
    async fn calendar_exists(&mut self, name: &str) -> JobStoreResult<bool>;
    async fn put_calendar(&mut self, name: &str, calendar: &Calendar) -> JobStoreResult<()>;
    async fn delete_calendar(&mut self, name: &str) -> JobStoreResult<bool>;
    async fn calendar_names(&mut self) -> JobStoreResult<Vec<String>>;
    async fn count_calendars(&mut self) -> JobStoreResult<usize>;

    // ---- 暂停的分组 ----
    async fn paused_trigger_groups(&mut self) -> JobStoreResult<Vec<String>>;
    async fn is_trigger_group_paused(&mut self, group: &str) -> JobStoreResult<bool>;
    async fn set_trigger_group_paused(&mut self, group: &str, paused: bool)
        -> JobStoreResult<()>;
    async fn paused_job_groups(&mut self) -> JobStoreResult<Vec<String>>;
    async fn is_job_group_paused(&mut self, group: &str) -> JobStoreResult<bool>;
    async fn set_job_group_paused(&mut self, group: &str, paused: bool) -> JobStoreResult<()>;

    // ---- 触发记录 ----
    async fn insert_fired(&mut self, record: &FiredTriggerRecord) -> JobStoreResult<()>;
    async fn update_fired_state(
        &mut self,
        fire_instance_id: &str,
        state: TriggerState,
    ) -> JobStoreResult<()>;
    async fn delete_fired(&mut self, fire_instance_id: &str) -> JobStoreResult<bool>;
    /// 有状态作业是否有正在执行的触发记录
    async fn is_job_executing(&mut self, job_key: &JobKey) -> JobStoreResult<bool>;
    async fn fired_records_for_instance(
        &mut self,
        instance_id: &str,
    ) -> JobStoreResult<Vec<FiredTriggerRecord>>;

    async fn clear_all(&mut self) -> JobStoreResult<()>;
}
