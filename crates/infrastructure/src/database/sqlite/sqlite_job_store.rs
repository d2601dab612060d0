use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, error, info, instrument, warn};

use jobstore_core::JobStoreConfig;
use jobstore_domain::{
    Calendar, CompletedExecutionInstruction, GroupMatcher, JobDetail, JobKey, JobStore,
    JobWithTriggers, SchedulerSignaler, SignalEvent, Trigger, TriggerFiredResult, TriggerKey,
    TriggerState,
};
use jobstore_errors::{JobStoreError, JobStoreResult};

use super::schema::create_schema;
use super::sqlite_operations::SqliteOperations;
use super::DatabaseManager;
use crate::job_store::{StoreContext, StoreEngine, StoreLifecycle, StoreOperations};
use crate::retry::RetryPolicy;

/// 在事务内执行 `$body`，可选先取得 TRIGGER_ACCESS 锁；
/// 瞬时错误按重试策略重新开始整个事务，提交成功后才派发通知
macro_rules! with_retry {
    ($store:expr, $lock:expr, |$ops:ident| $body:block) => {{
        let mut attempt: u32 = 1;
        loop {
            let outcome: JobStoreResult<(_, Vec<SignalEvent>)> = async {
                let mut $ops =
                    SqliteOperations::begin(&$store.pool, &$store.scheduler_name).await?;
                if $lock {
                    $ops.lock_trigger_access().await?;
                }
                let (value, signals) = $body;
                $ops.commit().await?;
                Ok((value, signals))
            }
            .await;

            match outcome {
                Ok((value, signals)) => {
                    $store.lifecycle.dispatch(signals);
                    break Ok(value);
                }
                Err(e) if $store.retry.should_retry(&e, attempt) => {
                    warn!(attempt, error = %e, "存储操作遇到瞬时错误，准备重试");
                    attempt += 1;
                    tokio::time::sleep($store.retry.interval).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(attempts = attempt, error = %e, "存储操作重试次数已用尽");
                    }
                    break Err(e);
                }
            }
        }
    }};
}

/// 持锁运行调度规则
macro_rules! with_engine {
    ($store:expr, $engine:ident => $call:expr) => {
        with_retry!($store, true, |ops| {
            let mut $engine = StoreEngine::new(&mut ops, &$store.context);
            let value = $call.await?;
            (value, $engine.into_signals())
        })
    };
}

/// 不加锁的只读事务
macro_rules! read_only {
    ($store:expr, $ops:ident => $call:expr) => {
        with_retry!($store, false, |$ops| { ($call.await?, Vec::new()) })
    };
}

/// SQLite 作业存储
///
/// 多个进程可以通过同一个数据库文件共享调度数据，所有修改操作
/// 通过 `locks` 表中的 TRIGGER_ACCESS 行串行执行。
pub struct SqliteJobStore {
    pool: SqlitePool,
    context: StoreContext,
    scheduler_name: String,
    retry: RetryPolicy,
    lifecycle: StoreLifecycle,
}

impl SqliteJobStore {
    pub fn new(
        pool: SqlitePool,
        scheduler_name: impl Into<String>,
        instance_id: impl Into<String>,
        misfire_threshold: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            context: StoreContext {
                instance_id: instance_id.into(),
                misfire_threshold,
            },
            scheduler_name: scheduler_name.into(),
            retry,
            lifecycle: StoreLifecycle::new(),
        }
    }

    /// 按配置建立连接池，尚未建表，需要再调用 `initialize`
    pub async fn connect(config: &JobStoreConfig) -> JobStoreResult<Self> {
        let manager = DatabaseManager::new(&config.database).await?;
        manager.health_check().await?;
        let misfire_threshold_ms = i64::try_from(config.misfire_threshold_ms)
            .map_err(|_| JobStoreError::config_error("错过触发阈值过大"))?;

        Ok(Self::new(
            manager.into_pool(),
            &config.scheduler_name,
            config.resolved_instance_id(),
            Duration::milliseconds(misfire_threshold_ms),
            RetryPolicy::from_config(&config.retry),
        ))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn initialize(&self, signaler: Arc<dyn SchedulerSignaler>) -> JobStoreResult<()> {
        if self.lifecycle.is_initialized() {
            return Err(JobStoreError::config_error("作业存储已经初始化"));
        }

        let schema_result: JobStoreResult<()> = async {
            let mut tx = self.pool.begin().await?;
            create_schema(&mut tx, &self.scheduler_name).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;
        schema_result
            .map_err(|e| JobStoreError::config_error(format!("创建数据库表结构失败: {e}")))?;

        self.lifecycle.initialize(signaler)?;
        info!(
            scheduler_name = %self.scheduler_name,
            instance_id = %self.context.instance_id,
            "SQLite作业存储已初始化"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.context.instance_id))]
    async fn scheduler_started(&self) -> JobStoreResult<()> {
        let recovered = with_engine!(self, engine => engine.recover_instance())?;
        if recovered > 0 {
            warn!(recovered, "已恢复上次运行遗留的触发记录");
        }
        info!(scheduler_name = %self.scheduler_name, "调度器已启动");
        Ok(())
    }

    async fn scheduler_paused(&self) {
        debug!(scheduler_name = %self.scheduler_name, "调度器已暂停");
    }

    async fn scheduler_resumed(&self) {
        debug!(scheduler_name = %self.scheduler_name, "调度器已恢复");
    }

    async fn shutdown(&self) {
        if self.lifecycle.shutdown() {
            self.pool.close().await;
            info!(scheduler_name = %self.scheduler_name, "SQLite作业存储已关闭");
        }
    }

    fn supports_persistence(&self) -> bool {
        true
    }

    fn is_clustered(&self) -> bool {
        true
    }

    fn estimated_time_to_release_acquired_trigger(&self) -> Duration {
        Duration::milliseconds(70)
    }

    fn set_thread_pool_size(&self, size: usize) {
        self.lifecycle.set_thread_pool_size(size);
    }

    fn instance_id(&self) -> &str {
        &self.context.instance_id
    }

    fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    #[instrument(skip_all, fields(job_key = %job.key, trigger_key = %trigger.key))]
    async fn store_job_and_trigger(
        &self,
        job: &JobDetail,
        trigger: &Trigger,
    ) -> JobStoreResult<()> {
        let batch = [(job.clone(), vec![trigger.clone()])];
        with_engine!(self, engine => engine.store_jobs_and_triggers(&batch, false))
    }

    #[instrument(skip(self, jobs), fields(job_count = jobs.len()))]
    async fn store_jobs_and_triggers(
        &self,
        jobs: &[JobWithTriggers],
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_jobs_and_triggers(jobs, replace_existing))
    }

    #[instrument(skip(self, job), fields(job_key = %job.key))]
    async fn store_job(&self, job: &JobDetail, replace_existing: bool) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_job(job, replace_existing))
    }

    #[instrument(skip(self))]
    async fn remove_job(&self, job_key: &JobKey) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_job(job_key))
    }

    async fn remove_jobs(&self, job_keys: &[JobKey]) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_jobs(job_keys))
    }

    async fn retrieve_job(&self, job_key: &JobKey) -> JobStoreResult<Option<JobDetail>> {
        read_only!(self, ops => ops.job(job_key))
    }

    #[instrument(skip(self, trigger), fields(trigger_key = %trigger.key))]
    async fn store_trigger(
        &self,
        trigger: &Trigger,
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_trigger(trigger, replace_existing))
    }

    #[instrument(skip(self))]
    async fn remove_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_trigger(trigger_key))
    }

    async fn remove_triggers(&self, trigger_keys: &[TriggerKey]) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_triggers(trigger_keys))
    }

    #[instrument(skip(self, new_trigger), fields(new_trigger_key = %new_trigger.key))]
    async fn replace_trigger(
        &self,
        trigger_key: &TriggerKey,
        new_trigger: &Trigger,
    ) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.replace_trigger(trigger_key, new_trigger))
    }

    async fn retrieve_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<Option<Trigger>> {
        read_only!(self, ops => ops.trigger(trigger_key))
    }

    async fn check_job_exists(&self, job_key: &JobKey) -> JobStoreResult<bool> {
        read_only!(self, ops => ops.job_exists(job_key))
    }

    async fn check_trigger_exists(&self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        read_only!(self, ops => ops.trigger_exists(trigger_key))
    }

    #[instrument(skip(self))]
    async fn clear_all_scheduling_data(&self) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.clear_all())
    }

    #[instrument(skip(self, calendar))]
    async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_calendar(name, calendar, replace_existing))
    }

    #[instrument(skip(self))]
    async fn remove_calendar(&self, name: &str) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_calendar(name))
    }

    async fn retrieve_calendar(&self, name: &str) -> JobStoreResult<Option<Calendar>> {
        read_only!(self, ops => ops.calendar(name))
    }

    async fn check_calendar_exists(&self, name: &str) -> JobStoreResult<bool> {
        read_only!(self, ops => ops.calendar_exists(name))
    }

    async fn get_number_of_jobs(&self) -> JobStoreResult<usize> {
        read_only!(self, ops => ops.count_jobs())
    }

    async fn get_number_of_triggers(&self) -> JobStoreResult<usize> {
        read_only!(self, ops => ops.count_triggers())
    }

    async fn get_number_of_calendars(&self) -> JobStoreResult<usize> {
        read_only!(self, ops => ops.count_calendars())
    }

    async fn get_job_keys(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<JobKey>> {
        read_only!(self, ops => ops.job_keys(matcher))
    }

    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<TriggerKey>> {
        read_only!(self, ops => ops.trigger_keys(matcher))
    }

    async fn get_job_group_names(&self) -> JobStoreResult<Vec<String>> {
        read_only!(self, ops => ops.job_group_names())
    }

    async fn get_trigger_group_names(&self) -> JobStoreResult<Vec<String>> {
        read_only!(self, ops => ops.trigger_group_names())
    }

    async fn get_calendar_names(&self) -> JobStoreResult<Vec<String>> {
        read_only!(self, ops => ops.calendar_names())
    }

    async fn get_triggers_for_job(&self, job_key: &JobKey) -> JobStoreResult<Vec<Trigger>> {
        read_only!(self, ops => ops.triggers_for_job(job_key))
    }

    async fn get_trigger_state(
        &self,
        trigger_key: &TriggerKey,
    ) -> JobStoreResult<Option<TriggerState>> {
        let trigger = read_only!(self, ops => ops.trigger(trigger_key))?;
        Ok(trigger.map(|trigger| trigger.state))
    }

    #[instrument(skip(self))]
    async fn pause_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.pause_trigger(trigger_key))
    }

    #[instrument(skip(self))]
    async fn pause_triggers(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.pause_triggers(matcher))
    }

    #[instrument(skip(self))]
    async fn pause_job(&self, job_key: &JobKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.pause_job(job_key))
    }

    #[instrument(skip(self))]
    async fn pause_jobs(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.pause_jobs(matcher))
    }

    #[instrument(skip(self))]
    async fn resume_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.resume_trigger(trigger_key))
    }

    #[instrument(skip(self))]
    async fn resume_triggers(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.resume_triggers(matcher))
    }

    #[instrument(skip(self))]
    async fn resume_job(&self, job_key: &JobKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.resume_job(job_key))
    }

    #[instrument(skip(self))]
    async fn resume_jobs(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.resume_jobs(matcher))
    }

    async fn get_paused_trigger_groups(&self) -> JobStoreResult<Vec<String>> {
        read_only!(self, ops => ops.paused_trigger_groups())
    }

    async fn is_job_group_paused(&self, group: &str) -> JobStoreResult<bool> {
        read_only!(self, ops => ops.is_job_group_paused(group))
    }

    async fn is_trigger_group_paused(&self, group: &str) -> JobStoreResult<bool> {
        read_only!(self, ops => ops.is_trigger_group_paused(group))
    }

    #[instrument(skip(self))]
    async fn pause_all(&self) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.pause_all())
    }

    #[instrument(skip(self))]
    async fn resume_all(&self) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.resume_all())
    }

    #[instrument(skip(self), fields(instance_id = %self.context.instance_id))]
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> JobStoreResult<Vec<Trigger>> {
        self.lifecycle.ensure_open()?;
        with_engine!(self, engine => engine.acquire_next_triggers(no_later_than, max_count, time_window))
    }

    #[instrument(skip_all, fields(trigger_key = %trigger.key))]
    async fn release_acquired_trigger(&self, trigger: &Trigger) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.release_acquired_trigger(trigger))
    }

    #[instrument(skip_all, fields(count = triggers.len()))]
    async fn triggers_fired(&self, triggers: &[Trigger]) -> JobStoreResult<Vec<TriggerFiredResult>> {
        with_engine!(self, engine => engine.triggers_fired(triggers))
    }

    #[instrument(skip_all, fields(trigger_key = %trigger.key, instruction = ?instruction))]
    async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.triggered_job_complete(trigger, job_detail, instruction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_core::{DatabaseConfig, StoreBackend};
    use jobstore_domain::{NoopSignaler, Schedule};

    fn memory_config() -> JobStoreConfig {
        JobStoreConfig {
            scheduler_name: "test".to_string(),
            instance_id: "node-1".to_string(),
            backend: StoreBackend::Sqlite,
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                ..DatabaseConfig::default()
            },
            ..JobStoreConfig::default()
        }
    }

    async fn store() -> SqliteJobStore {
        let store = SqliteJobStore::connect(&memory_config()).await.unwrap();
        store.initialize(Arc::new(NoopSignaler)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let store = store().await;
        let err = store.initialize(Arc::new(NoopSignaler)).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_round_trip_job_and_trigger() {
        let store = store().await;
        let job = JobDetail::new(JobKey::new("j1", "g"), "demo.Job")
            .with_description("报表")
            .with_data("count", serde_json::json!(3));
        let trigger = Trigger::start_now(
            TriggerKey::new("t1", "g"),
            job.key.clone(),
            Schedule::repeat(Duration::seconds(30), 4),
        )
        .with_priority(7);
        store.store_job_and_trigger(&job, &trigger).await.unwrap();

        assert_eq!(store.retrieve_job(&job.key).await.unwrap(), Some(job));
        let stored = store.retrieve_trigger(&trigger.key).await.unwrap().unwrap();
        assert_eq!(stored.priority, 7);
        assert_eq!(stored.schedule, trigger.schedule);
        assert_eq!(stored.next_fire_time, trigger.next_fire_time);
        assert_eq!(stored.state, TriggerState::Waiting);
    }

    #[tokio::test]
    async fn test_recovery_restores_acquired_triggers() {
        let store = store().await;
        let job = JobDetail::new(JobKey::new("j1", "g"), "demo.Job");
        let trigger = Trigger::new(
            TriggerKey::new("t1", "g"),
            job.key.clone(),
            Schedule::repeat_forever(Duration::seconds(10)),
            Utc::now() - Duration::seconds(1),
        );
        store.store_job_and_trigger(&job, &trigger).await.unwrap();

        let acquired = store
            .acquire_next_triggers(Utc::now(), 1, Duration::zero())
            .await
            .unwrap();
        assert_eq!(acquired.len(), 1);

        store.scheduler_started().await.unwrap();
        assert_eq!(
            store.get_trigger_state(&trigger.key).await.unwrap(),
            Some(TriggerState::Waiting)
        );
    }

    #[tokio::test]
    async fn test_failed_firing_rolls_back_whole_batch() {
        let store = store().await;
        let job = JobDetail::new(JobKey::new("j1", "g"), "demo.Job");
        let trigger = Trigger::new(
            TriggerKey::new("t1", "g"),
            job.key.clone(),
            Schedule::repeat_forever(Duration::seconds(10)),
            Utc::now() - Duration::seconds(1),
        );
        store.store_job_and_trigger(&job, &trigger).await.unwrap();
        let acquired = store
            .acquire_next_triggers(Utc::now(), 1, Duration::zero())
            .await
            .unwrap();
        assert_eq!(acquired.len(), 1);

        // 写入 EXECUTING 状态时模拟不可重试的存储故障
        sqlx::query(
            "CREATE TRIGGER fail_on_execute BEFORE UPDATE OF state ON triggers \
             WHEN NEW.state = 'EXECUTING' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.triggers_fired(&acquired).await.unwrap_err();
        assert!(!err.is_retryable());

        assert_eq!(
            store.get_trigger_state(&trigger.key).await.unwrap(),
            Some(TriggerState::Acquired)
        );
        let fired_state: String = sqlx::query_scalar("SELECT state FROM fired_triggers")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(fired_state, "ACQUIRED");
    }

    #[tokio::test]
    async fn test_shutdown_closes_store() {
        let store = store().await;
        store.shutdown().await;
        store.shutdown().await;
        assert!(store.pool().is_closed());
        let result = store
            .acquire_next_triggers(Utc::now(), 1, Duration::zero())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_store_properties() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect_lazy("sqlite::memory:");
        let store = SqliteJobStore::new(
            pool.unwrap(),
            "sched",
            "node-1",
            Duration::seconds(60),
            RetryPolicy::default(),
        );
        assert!(store.supports_persistence());
        assert!(store.is_clustered());
        assert_eq!(store.instance_id(), "node-1");
    }
}
