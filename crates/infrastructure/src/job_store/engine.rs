//! 作业存储的调度规则
//!
//! 存储、级联删除、暂停恢复、获取、触发和完成的全部规则都在这里实现一次，
//! 通过 [`StoreOperations`] 作用在内存状态或数据库事务上。调用方负责提供
//! 互斥（写锁或 `TRIGGER_ACCESS` 行锁），并在提交后派发收集到的通知。

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobstore_domain::{
    apply_misfire, now_millis, Calendar, CompletedExecutionInstruction, FiredDisposition,
    FiredTriggerRecord, GroupMatcher, JobDetail, JobKey, JobWithTriggers, MisfireOutcome,
    SignalEvent, Trigger, TriggerFiredBundle, TriggerFiredResult, TriggerKey, TriggerState,
};
use jobstore_errors::{EntityKind, ErrorKind, JobStoreError, JobStoreResult};

use super::operations::StoreOperations;

/// 存储实例的运行参数
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub instance_id: String,
    pub misfire_threshold: Duration,
}

pub struct StoreEngine<'a, S> {
    ops: &'a mut S,
    context: &'a StoreContext,
    signals: Vec<SignalEvent>,
}

impl<'a, S: StoreOperations> StoreEngine<'a, S> {
    pub fn new(ops: &'a mut S, context: &'a StoreContext) -> Self {
        Self {
            ops,
            context,
            signals: Vec::new(),
        }
    }

    /// 操作过程中产生的通知，只在成功提交后派发
    pub fn into_signals(self) -> Vec<SignalEvent> {
        self.signals
    }

    // ---- 存储 ----

    pub async fn store_job(&mut self, job: &JobDetail, replace_existing: bool) -> JobStoreResult<()> {
        if !replace_existing && self.ops.job_exists(&job.key).await? {
            return Err(JobStoreError::already_exists(
                EntityKind::Job,
                job.key.to_string(),
            ));
        }
        self.ops.put_job(job).await?;
        debug!(job_key = %job.key, "作业已存储");
        Ok(())
    }

    pub async fn store_trigger(
        &mut self,
        trigger: &Trigger,
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        self.check_trigger_storable(trigger, replace_existing).await?;
        let job = self.ops.job(&trigger.job_key).await?.ok_or_else(|| {
            JobStoreError::conflict(format!("触发器引用的作业不存在: {}", trigger.job_key))
        })?;
        self.put_new_trigger(trigger, &job).await
    }

    pub async fn store_jobs_and_triggers(
        &mut self,
        jobs: &[JobWithTriggers],
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        // 先完成全部校验，失败时不写入任何数据
        for (job, triggers) in jobs {
            if !replace_existing && self.ops.job_exists(&job.key).await? {
                return Err(JobStoreError::already_exists(
                    EntityKind::Job,
                    job.key.to_string(),
                ));
            }
            for trigger in triggers {
                if trigger.job_key != job.key {
                    return Err(JobStoreError::conflict(format!(
                        "触发器 {} 引用的作业 {} 与 {} 不一致",
                        trigger.key, trigger.job_key, job.key
                    )));
                }
                self.check_trigger_storable(trigger, replace_existing)
                    .await?;
            }
        }

        for (job, triggers) in jobs {
            self.ops.put_job(job).await?;
            for trigger in triggers {
                self.put_new_trigger(trigger, job).await?;
            }
        }
        debug!(jobs = jobs.len(), "批量存储作业和触发器完成");
        Ok(())
    }

    async fn check_trigger_storable(
        &mut self,
        trigger: &Trigger,
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        trigger.validate()?;
        if !replace_existing && self.ops.trigger_exists(&trigger.key).await? {
            return Err(JobStoreError::already_exists(
                EntityKind::Trigger,
                trigger.key.to_string(),
            ));
        }
        if let Some(calendar_name) = &trigger.calendar_name {
            if !self.ops.calendar_exists(calendar_name).await? {
                return Err(JobStoreError::conflict(format!(
                    "触发器 {} 引用的日历不存在: {}",
                    trigger.key, calendar_name
                )));
            }
        }
        Ok(())
    }

    /// 按分组暂停情况和作业阻塞情况计算初始状态后写入
    async fn put_new_trigger(&mut self, trigger: &Trigger, job: &JobDetail) -> JobStoreResult<()> {
        let previous = self.ops.trigger(&trigger.key).await?;
        let group_paused = self.ops.is_trigger_group_paused(&trigger.key.group).await?
            || self.ops.is_job_group_paused(&trigger.job_key.group).await?;
        let job_blocked = job.stateful && self.ops.is_job_executing(&job.key).await?;

        let mut stored = trigger.clone().normalized();
        stored.state = TriggerState::initial(group_paused, job_blocked);
        stored.fire_instance_id = None;
        self.ops.put_trigger(&stored).await?;

        if let Some(previous) = previous {
            if previous.job_key != stored.job_key {
                self.remove_orphaned_job(&previous.job_key).await?;
            }
        }

        debug!(
            trigger_key = %stored.key,
            state = %stored.state,
            next_fire_time = ?stored.next_fire_time,
            "触发器已存储"
        );
        self.signals
            .push(SignalEvent::SchedulingChange(stored.next_fire_time));
        Ok(())
    }

    // ---- 删除 ----

    pub async fn remove_job(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        for trigger in self.ops.triggers_for_job(job_key).await? {
            self.ops.delete_trigger(&trigger.key).await?;
        }
        let removed = self.ops.delete_job(job_key).await?;
        if removed {
            debug!(job_key = %job_key, "作业及其触发器已删除");
        }
        Ok(removed)
    }

    pub async fn remove_jobs(&mut self, job_keys: &[JobKey]) -> JobStoreResult<bool> {
        let mut all_found = true;
        for job_key in job_keys {
            all_found &= self.remove_job(job_key).await?;
        }
        Ok(all_found)
    }

    /// 删除触发器；作业因此失去全部触发器且不是持久作业时一并删除
    pub async fn remove_trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        let Some(trigger) = self.ops.trigger(trigger_key).await? else {
            return Ok(false);
        };
        self.ops.delete_trigger(trigger_key).await?;
        debug!(trigger_key = %trigger_key, "触发器已删除");
        self.remove_orphaned_job(&trigger.job_key).await?;
        Ok(true)
    }

    pub async fn remove_triggers(&mut self, trigger_keys: &[TriggerKey]) -> JobStoreResult<bool> {
        let mut all_found = true;
        for trigger_key in trigger_keys {
            all_found &= self.remove_trigger(trigger_key).await?;
        }
        Ok(all_found)
    }

    async fn remove_orphaned_job(&mut self, job_key: &JobKey) -> JobStoreResult<()> {
        let Some(job) = self.ops.job(job_key).await? else {
            return Ok(());
        };
        if !job.durable && self.ops.triggers_for_job(job_key).await?.is_empty() {
            self.ops.delete_job(job_key).await?;
            debug!(job_key = %job_key, "非持久作业已没有触发器，随之删除");
            self.signals.push(SignalEvent::JobDeleted(job_key.clone()));
        }
        Ok(())
    }

    pub async fn replace_trigger(
        &mut self,
        trigger_key: &TriggerKey,
        new_trigger: &Trigger,
    ) -> JobStoreResult<bool> {
        let Some(old) = self.ops.trigger(trigger_key).await? else {
            return Ok(false);
        };
        if old.job_key != new_trigger.job_key {
            return Err(JobStoreError::conflict(format!(
                "新触发器 {} 必须引用原作业 {}",
                new_trigger.key, old.job_key
            )));
        }
        let replace_self = new_trigger.key == *trigger_key;
        self.check_trigger_storable(new_trigger, replace_self).await?;
        let job = self.ops.job(&old.job_key).await?.ok_or_else(|| {
            JobStoreError::conflict(format!("触发器引用的作业不存在: {}", old.job_key))
        })?;

        self.ops.delete_trigger(trigger_key).await?;
        self.put_new_trigger(new_trigger, &job).await?;
        debug!(old = %trigger_key, new = %new_trigger.key, "触发器已替换");
        Ok(true)
    }

    // ---- 日历 ----

    pub async fn store_calendar(
        &mut self,
        name: &str,
        calendar: &Calendar,
        replace_existing: bool,
    ) -> JobStoreResult<()> {
        if !replace_existing && self.ops.calendar_exists(name).await? {
            return Err(JobStoreError::already_exists(EntityKind::Calendar, name));
        }
        self.ops.put_calendar(name, calendar).await?;
        debug!(calendar = name, "日历已存储");
        Ok(())
    }

    pub async fn remove_calendar(&mut self, name: &str) -> JobStoreResult<bool> {
        if self.ops.calendar_in_use(name).await? {
            return Err(JobStoreError::conflict(format!(
                "日历仍被触发器引用，不能删除: {name}"
            )));
        }
        self.ops.delete_calendar(name).await
    }

    pub async fn clear_all(&mut self) -> JobStoreResult<()> {
        self.ops.clear_all().await?;
        info!("已清除全部调度数据");
        Ok(())
    }

    // ---- 暂停和恢复 ----

    async fn job_blocked(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        match self.ops.job(job_key).await? {
            Some(job) if job.stateful => self.ops.is_job_executing(job_key).await,
            _ => Ok(false),
        }
    }

    pub async fn pause_trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<()> {
        let Some(mut trigger) = self.ops.trigger(trigger_key).await? else {
            return Ok(());
        };
        let blocked = self.job_blocked(&trigger.job_key).await?;
        if let Some(state) = trigger.state.paused(blocked) {
            trigger.state = state;
            self.ops.put_trigger(&trigger).await?;
            debug!(trigger_key = %trigger_key, state = %state, "触发器已暂停");
        }
        Ok(())
    }

    pub async fn pause_triggers(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        let groups = match matcher.exact_group() {
            Some(group) => vec![group.to_string()],
            None => self
                .ops
                .trigger_group_names()
                .await?
                .into_iter()
                .filter(|group| matcher.is_match(group))
                .collect(),
        };

        for group in &groups {
            self.ops.set_trigger_group_paused(group, true).await?;
            let keys = self
                .ops
                .trigger_keys(&GroupMatcher::group_equals(group.clone()))
                .await?;
            for key in keys {
                self.pause_trigger(&key).await?;
            }
        }
        Ok(groups)
    }

    pub async fn pause_job(&mut self, job_key: &JobKey) -> JobStoreResult<()> {
        for trigger in self.ops.triggers_for_job(job_key).await? {
            self.pause_trigger(&trigger.key).await?;
        }
        Ok(())
    }

    pub async fn pause_jobs(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        let groups = match matcher.exact_group() {
            Some(group) => vec![group.to_string()],
            None => self
                .ops
                .job_group_names()
                .await?
                .into_iter()
                .filter(|group| matcher.is_match(group))
                .collect(),
        };

        for group in &groups {
            self.ops.set_job_group_paused(group, true).await?;
            let keys = self
                .ops
                .job_keys(&GroupMatcher::group_equals(group.clone()))
                .await?;
            for key in keys {
                self.pause_job(&key).await?;
            }
        }
        Ok(groups)
    }

    pub async fn resume_trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<()> {
        let Some(mut trigger) = self.ops.trigger(trigger_key).await? else {
            return Ok(());
        };
        let blocked = self.job_blocked(&trigger.job_key).await?;
        let Some(state) = trigger.state.resumed(blocked) else {
            return Ok(());
        };
        trigger.state = state;

        if state == TriggerState::Waiting
            && self.handle_misfire(&mut trigger, now_millis()).await? == MisfireOutcome::Exhausted
        {
            return Ok(());
        }

        self.ops.put_trigger(&trigger).await?;
        debug!(trigger_key = %trigger_key, state = %state, "触发器已恢复");
        self.signals
            .push(SignalEvent::SchedulingChange(trigger.next_fire_time));
        Ok(())
    }

    pub async fn resume_triggers(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        let mut groups: BTreeSet<String> = self
            .ops
            .paused_trigger_groups()
            .await?
            .into_iter()
            .filter(|group| matcher.is_match(group))
            .collect();
        groups.extend(
            self.ops
                .trigger_group_names()
                .await?
                .into_iter()
                .filter(|group| matcher.is_match(group)),
        );

        for group in &groups {
            self.ops.set_trigger_group_paused(group, false).await?;
            let keys = self
                .ops
                .trigger_keys(&GroupMatcher::group_equals(group.clone()))
                .await?;
            for key in keys {
                let Some(trigger) = self.ops.trigger(&key).await? else {
                    continue;
                };
                // 作业分组仍处于暂停时保持暂停
                if self.ops.is_job_group_paused(&trigger.job_key.group).await? {
                    continue;
                }
                self.resume_trigger(&key).await?;
            }
        }
        Ok(groups.into_iter().collect())
    }

    pub async fn resume_job(&mut self, job_key: &JobKey) -> JobStoreResult<()> {
        for trigger in self.ops.triggers_for_job(job_key).await? {
            self.resume_trigger(&trigger.key).await?;
        }
        Ok(())
    }

    pub async fn resume_jobs(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<String>> {
        let mut groups: BTreeSet<String> = self
            .ops
            .paused_job_groups()
            .await?
            .into_iter()
            .filter(|group| matcher.is_match(group))
            .collect();
        groups.extend(
            self.ops
                .job_group_names()
                .await?
                .into_iter()
                .filter(|group| matcher.is_match(group)),
        );

        for group in &groups {
            self.ops.set_job_group_paused(group, false).await?;
            let keys = self
                .ops
                .job_keys(&GroupMatcher::group_equals(group.clone()))
                .await?;
            for key in keys {
                self.resume_job(&key).await?;
            }
        }
        Ok(groups.into_iter().collect())
    }

    pub async fn pause_all(&mut self) -> JobStoreResult<()> {
        let groups = self.pause_triggers(&GroupMatcher::any_group()).await?;
        info!(groups = groups.len(), "已暂停全部触发器分组");
        Ok(())
    }

    pub async fn resume_all(&mut self) -> JobStoreResult<()> {
        for group in self.ops.paused_job_groups().await? {
            self.ops.set_job_group_paused(&group, false).await?;
        }
        let groups = self.resume_triggers(&GroupMatcher::any_group()).await?;
        info!(groups = groups.len(), "已恢复全部触发器分组");
        Ok(())
    }

    // ---- 错过触发 ----

    async fn handle_misfire(
        &mut self,
        trigger: &mut Trigger,
        now: DateTime<Utc>,
    ) -> JobStoreResult<MisfireOutcome> {
        let stale = trigger.next_fire_time;
        let outcome = apply_misfire(trigger, now, self.context.misfire_threshold);
        match outcome {
            MisfireOutcome::NotMisfired => {}
            MisfireOutcome::Rescheduled => {
                warn!(
                    trigger_key = %trigger.key,
                    stale = ?stale,
                    next_fire_time = ?trigger.next_fire_time,
                    "触发器错过触发，已重新计算触发时间"
                );
                self.signals.push(SignalEvent::Misfired(trigger.clone()));
                self.signals
                    .push(SignalEvent::SchedulingChange(trigger.next_fire_time));
            }
            MisfireOutcome::Exhausted => {
                warn!(trigger_key = %trigger.key, stale = ?stale, "触发器错过触发且不会再触发，已删除");
                self.signals.push(SignalEvent::Misfired(trigger.clone()));
                self.remove_trigger(&trigger.key).await?;
                self.signals.push(SignalEvent::Finalized(trigger.clone()));
            }
        }
        Ok(outcome)
    }

    async fn recover_misfires(&mut self, now: DateTime<Utc>) -> JobStoreResult<()> {
        let cutoff = now - self.context.misfire_threshold;
        let candidates = self.ops.waiting_triggers_due(cutoff, usize::MAX).await?;
        for mut trigger in candidates {
            if self.handle_misfire(&mut trigger, now).await? == MisfireOutcome::Rescheduled {
                self.ops.put_trigger(&trigger).await?;
            }
        }
        Ok(())
    }

    // ---- 获取、触发和完成 ----

    pub async fn acquire_next_triggers(
        &mut self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> JobStoreResult<Vec<Trigger>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        self.recover_misfires(now_millis()).await?;

        let horizon = no_later_than + time_window;
        let mut acquired: Vec<Trigger> = Vec::new();
        let mut skipped: HashSet<TriggerKey> = HashSet::new();
        let mut stateful_in_batch: HashSet<JobKey> = HashSet::new();

        loop {
            let limit = max_count - acquired.len() + skipped.len();
            let candidates = self.ops.waiting_triggers_due(horizon, limit).await?;
            let exhausted = candidates.len() < limit;
            let mut progressed = false;

            for mut trigger in candidates {
                if acquired.len() >= max_count {
                    break;
                }
                if skipped.contains(&trigger.key) {
                    continue;
                }
                progressed = true;

                let Some(job) = self.ops.job(&trigger.job_key).await? else {
                    warn!(trigger_key = %trigger.key, "触发器引用的作业不存在，标记为ERROR");
                    trigger.state = TriggerState::Error;
                    self.ops.put_trigger(&trigger).await?;
                    continue;
                };

                if job.stateful
                    && (stateful_in_batch.contains(&job.key)
                        || self.ops.is_job_executing(&job.key).await?)
                {
                    skipped.insert(trigger.key.clone());
                    continue;
                }

                if !self.ops.mark_acquired(&trigger.key).await? {
                    debug!(trigger_key = %trigger.key, "触发器已被其他实例获取");
                    skipped.insert(trigger.key.clone());
                    continue;
                }

                let fire_instance_id = Uuid::new_v4().to_string();
                let record = FiredTriggerRecord::acquired(
                    &trigger,
                    fire_instance_id.clone(),
                    self.context.instance_id.clone(),
                    job.stateful,
                );
                self.ops.insert_fired(&record).await?;

                if job.stateful {
                    stateful_in_batch.insert(job.key.clone());
                }
                trigger.state = TriggerState::Acquired;
                trigger.fire_instance_id = Some(fire_instance_id);
                acquired.push(trigger);
            }

            if exhausted || !progressed || acquired.len() >= max_count {
                break;
            }
        }

        if !acquired.is_empty() {
            debug!(count = acquired.len(), "已获取触发器");
        }
        Ok(acquired)
    }

    pub async fn release_acquired_trigger(&mut self, trigger: &Trigger) -> JobStoreResult<()> {
        if let Some(mut stored) = self.ops.trigger(&trigger.key).await? {
            if stored.state == TriggerState::Acquired {
                stored.state = TriggerState::Waiting;
                self.ops.put_trigger(&stored).await?;
                debug!(trigger_key = %stored.key, "已释放获取的触发器");
                self.signals
                    .push(SignalEvent::SchedulingChange(stored.next_fire_time));
            }
        }
        if let Some(fire_instance_id) = &trigger.fire_instance_id {
            self.ops.delete_fired(fire_instance_id).await?;
        }
        Ok(())
    }

    pub async fn triggers_fired(
        &mut self,
        triggers: &[Trigger],
    ) -> JobStoreResult<Vec<TriggerFiredResult>> {
        let mut results = Vec::with_capacity(triggers.len());
        let mut seen: HashSet<&TriggerKey> = HashSet::new();
        for trigger in triggers {
            if !seen.insert(&trigger.key) {
                debug!(trigger_key = %trigger.key, "同一批次中重复的触发器，忽略");
                continue;
            }
            match self.trigger_fired(trigger).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {
                    debug!(trigger_key = %trigger.key, "触发器已不可触发，忽略");
                }
                // 存储错误可能发生在部分写入之后，整批失败并回滚
                Err(e) if e.kind() == ErrorKind::PersistenceFailure => return Err(e),
                Err(e) => {
                    warn!(trigger_key = %trigger.key, error = %e, "触发失败");
                    results.push(TriggerFiredResult {
                        trigger: trigger.clone(),
                        disposition: FiredDisposition::Error(e.to_string()),
                    });
                }
            }
        }
        Ok(results)
    }

    async fn trigger_fired(&mut self, trigger: &Trigger) -> JobStoreResult<Option<TriggerFiredResult>> {
        let Some(mut stored) = self.ops.trigger(&trigger.key).await? else {
            return Ok(None);
        };

        match stored.state {
            TriggerState::Acquired => {}
            TriggerState::Blocked | TriggerState::PausedBlocked => {
                return self.veto(trigger, stored).await.map(Some);
            }
            _ => return self.discard_fired(trigger).await,
        }

        let Some(job) = self.ops.job(&stored.job_key).await? else {
            return self.discard_fired(trigger).await;
        };
        let calendar = match &stored.calendar_name {
            Some(name) => match self.ops.calendar(name).await? {
                Some(calendar) => Some(calendar),
                None => return self.discard_fired(trigger).await,
            },
            None => None,
        };

        if job.stateful && self.ops.is_job_executing(&job.key).await? {
            stored.state = TriggerState::Blocked;
            self.ops.put_trigger(&stored).await?;
            return self.veto(trigger, stored).await.map(Some);
        }

        let fire_time = now_millis();
        let scheduled_fire_time = stored.next_fire_time;
        let previous_fire_time = stored.previous_fire_time;

        let fire_instance_id = match &trigger.fire_instance_id {
            Some(id) => {
                self.ops
                    .update_fired_state(id, TriggerState::Executing)
                    .await?;
                id.clone()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let mut record = FiredTriggerRecord::acquired(
                    &stored,
                    id.clone(),
                    self.context.instance_id.clone(),
                    job.stateful,
                );
                record.state = TriggerState::Executing;
                self.ops.insert_fired(&record).await?;
                id
            }
        };

        stored.triggered();
        stored.state = TriggerState::Executing;
        self.ops.put_trigger(&stored).await?;
        stored.fire_instance_id = Some(fire_instance_id);

        if job.stateful {
            for mut other in self.ops.triggers_for_job(&job.key).await? {
                if other.key == stored.key {
                    continue;
                }
                if let Some(state) = other.state.blocked() {
                    other.state = state;
                    self.ops.put_trigger(&other).await?;
                }
            }
        }

        debug!(
            trigger_key = %stored.key,
            job_key = %job.key,
            scheduled_fire_time = ?scheduled_fire_time,
            next_fire_time = ?stored.next_fire_time,
            "触发器开始执行"
        );

        let bundle = TriggerFiredBundle {
            job_detail: job,
            trigger: stored.clone(),
            calendar,
            recovering: false,
            fire_time,
            scheduled_fire_time,
            previous_fire_time,
            next_fire_time: stored.next_fire_time,
        };
        Ok(Some(TriggerFiredResult {
            trigger: stored,
            disposition: FiredDisposition::Success(Box::new(bundle)),
        }))
    }

    /// 触发器已不可触发，丢弃获取时留下的记录
    async fn discard_fired(
        &mut self,
        trigger: &Trigger,
    ) -> JobStoreResult<Option<TriggerFiredResult>> {
        if let Some(fire_instance_id) = &trigger.fire_instance_id {
            self.ops.delete_fired(fire_instance_id).await?;
        }
        Ok(None)
    }

    async fn veto(&mut self, trigger: &Trigger, stored: Trigger) -> JobStoreResult<TriggerFiredResult> {
        if let Some(fire_instance_id) = &trigger.fire_instance_id {
            self.ops.delete_fired(fire_instance_id).await?;
        }
        debug!(trigger_key = %stored.key, "有状态作业正在执行，触发被否决");
        Ok(TriggerFiredResult {
            trigger: stored,
            disposition: FiredDisposition::Vetoed,
        })
    }

    pub async fn triggered_job_complete(
        &mut self,
        trigger: &Trigger,
        job_detail: &JobDetail,
        instruction: CompletedExecutionInstruction,
    ) -> JobStoreResult<()> {
        let job = self.ops.job(&trigger.job_key).await?;
        if let Some(stored_job) = job.as_ref().filter(|job| job.stateful) {
            let mut updated = stored_job.clone();
            updated.job_data = job_detail.job_data.clone();
            self.ops.put_job(&updated).await?;
        }

        if let Some(fire_instance_id) = &trigger.fire_instance_id {
            self.ops.delete_fired(fire_instance_id).await?;
        }

        self.apply_instruction(trigger, instruction).await?;

        if let Some(job) = job.filter(|job| job.stateful) {
            if !self.ops.is_job_executing(&job.key).await? {
                for mut other in self.ops.triggers_for_job(&job.key).await? {
                    if let Some(state) = other.state.unblocked() {
                        other.state = state;
                        self.ops.put_trigger(&other).await?;
                    }
                }
                self.signals.push(SignalEvent::SchedulingChange(None));
            }
        }

        debug!(
            trigger_key = %trigger.key,
            instruction = ?instruction,
            "作业执行完成"
        );
        Ok(())
    }

    async fn apply_instruction(
        &mut self,
        trigger: &Trigger,
        instruction: CompletedExecutionInstruction,
    ) -> JobStoreResult<()> {
        match instruction {
            CompletedExecutionInstruction::Noop => {
                let Some(mut stored) = self.ops.trigger(&trigger.key).await? else {
                    return Ok(());
                };
                if stored.next_fire_time.is_none() {
                    self.remove_trigger(&stored.key).await?;
                    self.signals.push(SignalEvent::Finalized(stored));
                } else {
                    stored.state = stored.state.after_execution();
                    self.ops.put_trigger(&stored).await?;
                    self.signals
                        .push(SignalEvent::SchedulingChange(stored.next_fire_time));
                }
            }
            CompletedExecutionInstruction::ReExecuteJob => {
                let Some(mut stored) = self.ops.trigger(&trigger.key).await? else {
                    return Ok(());
                };
                let now = now_millis();
                stored.next_fire_time = Some(now);
                stored.state = stored.state.after_execution();
                self.ops.put_trigger(&stored).await?;
                if stored.state == TriggerState::Waiting {
                    self.signals.push(SignalEvent::SchedulingChange(Some(now)));
                }
            }
            CompletedExecutionInstruction::SetTriggerComplete
            | CompletedExecutionInstruction::DeleteTrigger => {
                if let Some(stored) = self.ops.trigger(&trigger.key).await? {
                    self.remove_trigger(&stored.key).await?;
                    self.signals.push(SignalEvent::Finalized(stored));
                }
            }
            CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                for stored in self.ops.triggers_for_job(&trigger.job_key).await? {
                    self.ops.delete_trigger(&stored.key).await?;
                    self.signals.push(SignalEvent::Finalized(stored));
                }
                self.remove_orphaned_job(&trigger.job_key).await?;
            }
            CompletedExecutionInstruction::SetTriggerError => {
                if let Some(mut stored) = self.ops.trigger(&trigger.key).await? {
                    stored.state = TriggerState::Error;
                    self.ops.put_trigger(&stored).await?;
                    warn!(trigger_key = %stored.key, "触发器被置为ERROR");
                }
            }
            CompletedExecutionInstruction::SetAllJobTriggersError => {
                for mut stored in self.ops.triggers_for_job(&trigger.job_key).await? {
                    stored.state = TriggerState::Error;
                    self.ops.put_trigger(&stored).await?;
                }
                warn!(job_key = %trigger.job_key, "作业的全部触发器被置为ERROR");
            }
        }
        Ok(())
    }

    // ---- 恢复 ----

    /// 恢复本实例遗留的获取和执行记录，其他实例的记录不受影响
    pub async fn recover_instance(&mut self) -> JobStoreResult<usize> {
        let records = self
            .ops
            .fired_records_for_instance(&self.context.instance_id)
            .await?;
        for record in &records {
            self.ops.delete_fired(&record.fire_instance_id).await?;
        }

        for record in &records {
            let Some(mut trigger) = self.ops.trigger(&record.trigger_key).await? else {
                continue;
            };
            if trigger.state == TriggerState::Executing && trigger.next_fire_time.is_none() {
                self.remove_trigger(&trigger.key).await?;
                self.signals.push(SignalEvent::Finalized(trigger));
                continue;
            }
            if let Some(state) = trigger.state.recovered() {
                trigger.state = state;
                self.ops.put_trigger(&trigger).await?;
            }
        }

        let stateful_jobs: BTreeSet<JobKey> = records
            .iter()
            .filter(|record| record.stateful)
            .map(|record| record.job_key.clone())
            .collect();
        for job_key in stateful_jobs {
            if self.ops.is_job_executing(&job_key).await? {
                continue;
            }
            for mut other in self.ops.triggers_for_job(&job_key).await? {
                if let Some(state) = other.state.unblocked() {
                    other.state = state;
                    self.ops.put_trigger(&other).await?;
                }
            }
        }

        if !records.is_empty() {
            info!(
                instance_id = %self.context.instance_id,
                records = records.len(),
                "已恢复本实例遗留的触发记录"
            );
            self.signals.push(SignalEvent::SchedulingChange(None));
        }
        Ok(records.len())
    }
}
