use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use jobstore_domain::{
    Calendar, CompletedExecutionInstruction, GroupMatcher, JobDetail, JobKey, JobStore,
    JobWithTriggers, SchedulerSignaler, Trigger, TriggerFiredResult, TriggerKey, TriggerState,
};
use jobstore_errors::JobStoreResult;

use super::ram_state::RamState;
use crate::job_store::{StoreContext, StoreEngine, StoreLifecycle};

/// 在写锁内运行调度规则，释放锁之后再派发通知
macro_rules! with_engine {
    ($store:expr, $engine:ident => $call:expr) => {{
        let mut state = $store.state.write().await;
        let mut $engine = StoreEngine::new(&mut *state, &$store.context);
        let result = $call.await;
        let signals = $engine.into_signals();
        drop(state);
        if result.is_ok() {
            $store.lifecycle.dispatch(signals);
        }
        result
    }};
}

/// 内存作业存储
///
/// 全部数据放在一把读写锁之后，每个修改操作在持有写锁期间完成，
/// 因此对其他调用方是原子的。进程退出后数据丢失。
pub struct RamJobStore {
    state: RwLock<RamState>,
    context: StoreContext,
    scheduler_name: String,
    lifecycle: StoreLifecycle,
}

impl RamJobStore {
    pub fn new(scheduler_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::with_misfire_threshold(scheduler_name, instance_id, Duration::seconds(60))
    }

    pub fn with_misfire_threshold(
        scheduler_name: impl Into<String>,
        instance_id: impl Into<String>,
        misfire_threshold: Duration,
    ) -> Self {
        Self {
            state: RwLock::new(RamState::default()),
            context: StoreContext {
                instance_id: instance_id.into(),
                misfire_threshold,
            },
            scheduler_name: scheduler_name.into(),
            lifecycle: StoreLifecycle::new(),
        }
    }

    pub fn misfire_threshold(&self) -> Duration {
        self.context.misfire_threshold
    }
}

impl Default for RamJobStore {
    fn default() -> Self {
        Self::new("DefaultScheduler", "NON_CLUSTERED")
    }
}

#[async_trait]
impl JobStore for RamJobStore {
    async fn initialize(&self, signaler: Arc<dyn SchedulerSignaler>) -> JobStoreResult<()> {
        self.lifecycle.initialize(signaler)?;
        info!(
            scheduler_name = %self.scheduler_name,
            misfire_threshold_ms = self.context.misfire_threshold.num_milliseconds(),
            "内存作业存储已初始化"
        );
        Ok(())
    }

    async fn scheduler_started(&self) -> JobStoreResult<()> {
        // 内存数据不会跨进程保留，没有需要恢复的记录
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
            info!(scheduler_name = %self.scheduler_name, "内存作业存储已关闭");
        }
    }

    fn supports_persistence(&self) -> bool {
        false
    }

    fn is_clustered(&self) -> bool {
        false
    }

    fn estimated_time_to_release_acquired_trigger(&self) -> Duration {
        Duration::milliseconds(5)
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

    async fn store_job_and_trigger(
        &self,
        job: &JobDetail,
        trigger: &Trigger,
    ) -> JobStoreResult<()> {
        let batch = [(job.clone(), vec![trigger.clone()])];
        with_engine!(self, engine => engine.store_jobs_and_triggers(&batch, false))
    }

    async fn store_jobs_and_triggers(
        &self,
        jobs: &[JobWithTriggers],
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_jobs_and_triggers(jobs, replace_existing))
    }

    async fn store_job(&self, job: &JobDetail, replace_existing: bool) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_job(job, replace_existing))
    }

    async fn remove_job(&self, job_key: &JobKey) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_job(job_key))
    }

    async fn remove_jobs(&self, job_keys: &[JobKey]) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_jobs(job_keys))
    }

    async fn retrieve_job(&self, job_key: &JobKey) -> JobStoreResult<Option<JobDetail>> {
        Ok(self.state.read().await.job(job_key))
    }

    async fn store_trigger(
        &self,
        trigger: &Trigger,
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_trigger(trigger, replace_existing))
    }

    async fn remove_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_trigger(trigger_key))
    }

    async fn remove_triggers(&self, trigger_keys: &[TriggerKey]) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_triggers(trigger_keys))
    }

    async fn replace_trigger(
        &self,
        trigger_key: &TriggerKey,
        new_trigger: &Trigger,
    ) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.replace_trigger(trigger_key, new_trigger))
    }

    async fn retrieve_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<Option<Trigger>> {
        Ok(self.state.read().await.trigger(trigger_key))
    }

    async fn check_job_exists(&self, job_key: &JobKey) -> JobStoreResult<bool> {
        Ok(self.state.read().await.job_exists(job_key))
    }

    async fn check_trigger_exists(&self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        Ok(self.state.read().await.trigger_exists(trigger_key))
    }

    async fn clear_all_scheduling_data(&self) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.clear_all())
    }

    async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.store_calendar(name, calendar, replace_existing))
    }

    async fn remove_calendar(&self, name: &str) -> JobStoreResult<bool> {
        with_engine!(self, engine => engine.remove_calendar(name))
    }

    async fn retrieve_calendar(&self, name: &str) -> JobStoreResult<Option<Calendar>> {
        Ok(self.state.read().await.calendar(name))
    }

    async fn check_calendar_exists(&self, name: &str) -> JobStoreResult<bool> {
        Ok(self.state.read().await.calendar_exists(name))
    }

    async fn get_number_of_jobs(&self) -> JobStoreResult<usize> {
        Ok(self.state.read().await.count_jobs())
    }

    async fn get_number_of_triggers(&self) -> JobStoreResult<usize> {
        Ok(self.state.read().await.count_triggers())
    }

    async fn get_number_of_calendars(&self) -> JobStoreResult<usize> {
        Ok(self.state.read().await.count_calendars())
    }

    async fn get_job_keys(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<JobKey>> {
        Ok(self.state.read().await.job_keys(matcher))
    }

    async fn get_trigger_keys(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<TriggerKey>> {
        Ok(self.state.read().await.trigger_keys(matcher))
    }

    async fn get_job_group_names(&self) -> JobStoreResult<Vec<String>> {
        Ok(self.state.read().await.job_group_names())
    }

    async fn get_trigger_group_names(&self) -> JobStoreResult<Vec<String>> {
        Ok(self.state.read().await.trigger_group_names())
    }

    async fn get_calendar_names(&self) -> JobStoreResult<Vec<String>> {
        Ok(self.state.read().await.calendar_names())
    }

    async fn get_triggers_for_job(&self, job_key: &JobKey) -> JobStoreResult<Vec<Trigger>> {
        Ok(self.state.read().await.triggers_for_job(job_key))
    }

    async fn get_trigger_state(
        &self,
        trigger_key: &TriggerKey,
    ) -> JobStoreResult<Option<TriggerState>> {
        Ok(self
            .state
            .read()
            .await
            .trigger(trigger_key)
            .map(|trigger| trigger.state))
    }

    async fn pause_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.pause_trigger(trigger_key))
    }

    async fn pause_triggers(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.pause_triggers(matcher))
    }

    async fn pause_job(&self, job_key: &JobKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.pause_job(job_key))
    }

    async fn pause_jobs(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.pause_jobs(matcher))
    }

    async fn resume_trigger(&self, trigger_key: &TriggerKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.resume_trigger(trigger_key))
    }

    async fn resume_triggers(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.resume_triggers(matcher))
    }

    async fn resume_job(&self, job_key: &JobKey) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.resume_job(job_key))
    }

    async fn resume_jobs(&self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        with_engine!(self, engine => engine.resume_jobs(matcher))
    }

    async fn get_paused_trigger_groups(&self) -> JobStoreResult<Vec<String>> {
        Ok(self.state.read().await.paused_trigger_groups())
    }

    async fn is_job_group_paused(&self, group: &str) -> JobStoreResult<bool> {
        Ok(self.state.read().await.is_job_group_paused(group))
    }

    async fn is_trigger_group_paused(&self, group: &str) -> JobStoreResult<bool> {
        Ok(self.state.read().await.is_trigger_group_paused(group))
    }

    async fn pause_all(&self) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.pause_all())
    }

    async fn resume_all(&self) -> JobStoreResult<()> {
        with_engine!(self, engine => engine.resume_all())
    }

    #[instrument(skip(self), fields(scheduler_name = %self.scheduler_name))]
    async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> JobStoreResult<Vec<Trigger>> {
        self.lifecycle.ensure_open()?;
        with_engine!(self, engine => engine.acquire_next_triggers(no_later_than, max_count, time_window))
    }

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
    use jobstore_domain::{NoopSignaler, Schedule};

    fn job(name: &str) -> JobDetail {
        JobDetail::new(JobKey::new(name, "g"), "demo.Job")
    }

    fn due_trigger(name: &str, job_name: &str) -> Trigger {
        Trigger::new(
            TriggerKey::new(name, "g"),
            JobKey::new(job_name, "g"),
            Schedule::once(),
            Utc::now() - Duration::seconds(1),
        )
    }

    #[tokio::test]
    async fn test_store_and_acquire() {
        let store = RamJobStore::default();
        store.initialize(Arc::new(NoopSignaler)).await.unwrap();
        store
            .store_job_and_trigger(&job("j1"), &due_trigger("t1", "j1"))
            .await
            .unwrap();

        let acquired = store
            .acquire_next_triggers(Utc::now(), 5, Duration::zero())
            .await
            .unwrap();
        assert_eq!(acquired.len(), 1);
        assert!(acquired[0].fire_instance_id.is_some());
        assert_eq!(
            store.get_trigger_state(&acquired[0].key).await.unwrap(),
            Some(TriggerState::Acquired)
        );
    }

    #[tokio::test]
    async fn test_scheduler_pause_does_not_block_store() {
        let store = RamJobStore::default();
        store.initialize(Arc::new(NoopSignaler)).await.unwrap();
        store.scheduler_paused().await;
        store
            .store_job_and_trigger(&job("j1"), &due_trigger("t1", "j1"))
            .await
            .unwrap();

        let acquired = store
            .acquire_next_triggers(Utc::now(), 5, Duration::zero())
            .await
            .unwrap();
        assert_eq!(acquired.len(), 1);
        store.scheduler_resumed().await;
        store.release_acquired_trigger(&acquired[0]).await.unwrap();
        assert_eq!(
            store.get_trigger_state(&acquired[0].key).await.unwrap(),
            Some(TriggerState::Waiting)
        );
    }

    #[tokio::test]
    async fn test_acquire_after_shutdown_fails() {
        let store = RamJobStore::default();
        store.shutdown().await;
        store.shutdown().await;
        let result = store
            .acquire_next_triggers(Utc::now(), 1, Duration::zero())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failed_store_leaves_state_untouched() {
        let store = RamJobStore::default();
        let orphan = due_trigger("t1", "missing");
        assert!(store.store_trigger(&orphan, false).await.is_err());
        assert_eq!(store.get_number_of_triggers().await.unwrap(), 0);
    }

    #[test]
    fn test_store_properties() {
        let store = RamJobStore::new("sched", "node-1");
        assert!(!store.supports_persistence());
        assert!(!store.is_clustered());
        assert_eq!(store.instance_id(), "node-1");
        assert_eq!(store.scheduler_name(), "sched");
        assert_eq!(store.misfire_threshold(), Duration::seconds(60));
    }
}
