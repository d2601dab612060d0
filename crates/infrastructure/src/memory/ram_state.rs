use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobstore_domain::{
    Calendar, FiredTriggerRecord, GroupMatcher, JobDetail, JobKey, Trigger, TriggerKey,
    TriggerState,
};
use jobstore_errors::JobStoreResult;

use crate::job_store::StoreOperations;

/// 时间索引的排序键：触发时间升序、优先级降序、键升序
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct TimeIndexKey {
    next_fire_time: DateTime<Utc>,
    priority: Reverse<i32>,
    key: TriggerKey,
}

impl TimeIndexKey {
    /// 只有 WAITING 且还会触发的触发器进入索引
    fn for_trigger(trigger: &Trigger) -> Option<Self> {
        if trigger.state != TriggerState::Waiting {
            return None;
        }
        trigger.next_fire_time.map(|next_fire_time| Self {
            next_fire_time,
            priority: Reverse(trigger.priority),
            key: trigger.key.clone(),
        })
    }
}

/// 内存存储的全部数据，由外层读写锁保护
#[derive(Debug, Default)]
pub struct RamState {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, Trigger>,
    triggers_by_job: HashMap<JobKey, BTreeSet<TriggerKey>>,
    calendars: BTreeMap<String, Calendar>,
    time_index: BTreeSet<TimeIndexKey>,
    paused_trigger_groups: BTreeSet<String>,
    paused_job_groups: BTreeSet<String>,
    fired: HashMap<String, FiredTriggerRecord>,
}

impl RamState {
    pub fn job(&self, job_key: &JobKey) -> Option<JobDetail> {
        self.jobs.get(job_key).cloned()
    }

    pub fn job_exists(&self, job_key: &JobKey) -> bool {
        self.jobs.contains_key(job_key)
    }

    pub fn job_keys(&self, matcher: &GroupMatcher) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self
            .jobs
            .keys()
            .filter(|key| matcher.is_match(&key.group))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn job_group_names(&self) -> Vec<String> {
        self.jobs
            .keys()
            .map(|key| key.group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn count_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn trigger(&self, trigger_key: &TriggerKey) -> Option<Trigger> {
        self.triggers.get(trigger_key).cloned()
    }

    pub fn trigger_exists(&self, trigger_key: &TriggerKey) -> bool {
        self.triggers.contains_key(trigger_key)
    }

    pub fn triggers_for_job(&self, job_key: &JobKey) -> Vec<Trigger> {
        self.triggers_by_job
            .get(job_key)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| self.triggers.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn trigger_keys(&self, matcher: &GroupMatcher) -> Vec<TriggerKey> {
        let mut keys: Vec<TriggerKey> = self
            .triggers
            .keys()
            .filter(|key| matcher.is_match(&key.group))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn trigger_group_names(&self) -> Vec<String> {
        self.triggers
            .keys()
            .map(|key| key.group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn count_triggers(&self) -> usize {
        self.triggers.len()
    }

    pub fn calendar(&self, name: &str) -> Option<Calendar> {
        self.calendars.get(name).cloned()
    }

    pub fn calendar_exists(&self, name: &str) -> bool {
        self.calendars.contains_key(name)
    }

    pub fn calendar_names(&self) -> Vec<String> {
        self.calendars.keys().cloned().collect()
    }

    pub fn count_calendars(&self) -> usize {
        self.calendars.len()
    }

    pub fn paused_trigger_groups(&self) -> Vec<String> {
        self.paused_trigger_groups.iter().cloned().collect()
    }

    pub fn is_trigger_group_paused(&self, group: &str) -> bool {
        self.paused_trigger_groups.contains(group)
    }

    pub fn is_job_group_paused(&self, group: &str) -> bool {
        self.paused_job_groups.contains(group)
    }

    fn put_trigger(&mut self, trigger: &Trigger) {
        self.unindex(&trigger.key);
        if let Some(index_key) = TimeIndexKey::for_trigger(trigger) {
            self.time_index.insert(index_key);
        }
        if let Some(previous) = self.triggers.get(&trigger.key) {
            if previous.job_key != trigger.job_key {
                let previous_job = previous.job_key.clone();
                self.detach_from_job(&previous_job, &trigger.key);
            }
        }
        self.triggers_by_job
            .entry(trigger.job_key.clone())
            .or_default()
            .insert(trigger.key.clone());
        self.triggers.insert(trigger.key.clone(), trigger.clone());
    }

    fn delete_trigger(&mut self, trigger_key: &TriggerKey) -> bool {
        self.unindex(trigger_key);
        match self.triggers.remove(trigger_key) {
            Some(trigger) => {
                self.detach_from_job(&trigger.job_key, trigger_key);
                true
            }
            None => false,
        }
    }

    fn unindex(&mut self, trigger_key: &TriggerKey) {
        if let Some(index_key) = self.triggers.get(trigger_key).and_then(TimeIndexKey::for_trigger)
        {
            self.time_index.remove(&index_key);
        }
    }

    fn detach_from_job(&mut self, job_key: &JobKey, trigger_key: &TriggerKey) {
        if let Some(keys) = self.triggers_by_job.get_mut(job_key) {
            keys.remove(trigger_key);
            if keys.is_empty() {
                self.triggers_by_job.remove(job_key);
            }
        }
    }

    fn waiting_triggers_due(&self, no_later_than: DateTime<Utc>, limit: usize) -> Vec<Trigger> {
        self.time_index
            .iter()
            .take_while(|index_key| index_key.next_fire_time <= no_later_than)
            .filter_map(|index_key| self.triggers.get(&index_key.key))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StoreOperations for RamState {
    async fn job(&mut self, job_key: &JobKey) -> JobStoreResult<Option<JobDetail>> {
        Ok(RamState::job(self, job_key))
    }

    async fn job_exists(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        Ok(RamState::job_exists(self, job_key))
    }

    async fn put_job(&mut self, job: &JobDetail) -> JobStoreResult<()> {
        self.jobs.insert(job.key.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        Ok(self.jobs.remove(job_key).is_some())
    }

    async fn job_keys(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<JobKey>> {
        Ok(RamState::job_keys(self, matcher))
    }

    async fn job_group_names(&mut self) -> JobStoreResult<Vec<String>> {
        Ok(RamState::job_group_names(self))
    }

    async fn count_jobs(&mut self) -> JobStoreResult<usize> {
        Ok(RamState::count_jobs(self))
    }

    async fn trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<Option<Trigger>> {
        Ok(RamState::trigger(self, trigger_key))
    }

    async fn trigger_exists(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        Ok(RamState::trigger_exists(self, trigger_key))
    }

    async fn put_trigger(&mut self, trigger: &Trigger) -> JobStoreResult<()> {
        RamState::put_trigger(self, trigger);
        Ok(())
    }

    async fn delete_trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        Ok(RamState::delete_trigger(self, trigger_key))
    }

    async fn triggers_for_job(&mut self, job_key: &JobKey) -> JobStoreResult<Vec<Trigger>> {
        Ok(RamState::triggers_for_job(self, job_key))
    }

    async fn trigger_keys(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<TriggerKey>> {
        Ok(RamState::trigger_keys(self, matcher))
    }

    async fn trigger_group_names(&mut self) -> JobStoreResult<Vec<String>> {
        Ok(RamState::trigger_group_names(self))
    }

    async fn count_triggers(&mut self) -> JobStoreResult<usize> {
        Ok(RamState::count_triggers(self))
    }

    async fn calendar_in_use(&mut self, calendar_name: &str) -> JobStoreResult<bool> {
        Ok(self
            .triggers
            .values()
            .any(|trigger| trigger.calendar_name.as_deref() == Some(calendar_name)))
    }

    async fn waiting_triggers_due(
        &mut self,
        no_later_than: DateTime<Utc>,
        limit: usize,
    ) -> JobStoreResult<Vec<Trigger>> {
        Ok(RamState::waiting_triggers_due(self, no_later_than, limit))
    }

    async fn mark_acquired(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        let Some(mut trigger) = RamState::trigger(self, trigger_key) else {
            return Ok(false);
        };
        if trigger.state != TriggerState::Waiting {
            return Ok(false);
        }
        trigger.state = TriggerState::Acquired;
        RamState::put_trigger(self, &trigger);
        Ok(true)
    }

    async fn calendar(&mut self, name: &str) -> JobStoreResult<Option<Calendar>> {
        Ok(RamState::calendar(self, name))
    }

    async fn calendar_exists(&mut self, name: &str) -> JobStoreResult<bool> {
        Ok(RamState::calendar_exists(self, name))
    }

    async fn put_calendar(&mut self, name: &str, calendar: &Calendar) -> JobStoreResult<()> {
        self.calendars.insert(name.to_string(), calendar.clone());
        Ok(())
    }

    async fn delete_calendar(&mut self, name: &str) -> JobStoreResult<bool> {
        Ok(self.calendars.remove(name).is_some())
    }

    async fn calendar_names(&mut self) -> JobStoreResult<Vec<String>> {
        Ok(RamState::calendar_names(self))
    }

    async fn count_calendars(&mut self) -> JobStoreResult<usize> {
        Ok(RamState::count_calendars(self))
    }

    async fn paused_trigger_groups(&mut self) -> JobStoreResult<Vec<String>> {
        Ok(RamState::paused_trigger_groups(self))
    }

    async fn is_trigger_group_paused(&mut self, group: &str) -> JobStoreResult<bool> {
        Ok(RamState::is_trigger_group_paused(self, group))
    }

    async fn set_trigger_group_paused(
        &mut self,
        group: &str,
        paused: bool,
    ) -> JobStoreResult<()> {
        if paused {
            self.paused_trigger_groups.insert(group.to_string());
        } else {
            self.paused_trigger_groups.remove(group);
        }
        Ok(())
    }

    async fn paused_job_groups(&mut self) -> JobStoreResult<Vec<String>> {
        Ok(self.paused_job_groups.iter().cloned().collect())
    }

    async fn is_job_group_paused(&mut self, group: &str) -> JobStoreResult<bool> {
        Ok(RamState::is_job_group_paused(self, group))
    }

    async fn set_job_group_paused(&mut self, group: &str, paused: bool) -> JobStoreResult<()> {
        if paused {
            self.paused_job_groups.insert(group.to_string());
        } else {
            self.paused_job_groups.remove(group);
        }
        Ok(())
    }

    async fn insert_fired(&mut self, record: &FiredTriggerRecord) -> JobStoreResult<()> {
        self.fired
            .insert(record.fire_instance_id.clone(), record.clone());
        Ok(())
    }

    async fn update_fired_state(
        &mut self,
        fire_instance_id: &str,
        state: TriggerState,
    ) -> JobStoreResult<()> {
        if let Some(record) = self.fired.get_mut(fire_instance_id) {
            record.state = state;
        }
        Ok(())
    }

    async fn delete_fired(&mut self, fire_instance_id: &str) -> JobStoreResult<bool> {
        Ok(self.fired.remove(fire_instance_id).is_some())
    }

    async fn is_job_executing(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        Ok(self
            .fired
            .values()
            .any(|record| record.job_key == *job_key && record.blocks_job()))
    }

    async fn fired_records_for_instance(
        &mut self,
        instance_id: &str,
    ) -> JobStoreResult<Vec<FiredTriggerRecord>> {
        Ok(self
            .fired
            .values()
            .filter(|record| record.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn clear_all(&mut self) -> JobStoreResult<()> {
        *self = RamState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use jobstore_domain::Schedule;

    fn trigger(name: &str, offset_secs: i64, priority: i32) -> Trigger {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trigger::new(
            TriggerKey::new(name, "g"),
            JobKey::new("job", "g"),
            Schedule::once(),
            base + Duration::seconds(offset_secs),
        )
        .with_priority(priority)
    }

    #[test]
    fn test_time_index_ordering() {
        let mut state = RamState::default();
        state.put_trigger(&trigger("a", 10, 5));
        state.put_trigger(&trigger("b", 10, 9));
        state.put_trigger(&trigger("c", 5, 1));

        let horizon = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let names: Vec<String> = state
            .waiting_triggers_due(horizon, 10)
            .into_iter()
            .map(|t| t.key.name)
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_index_tracks_state_changes() {
        let mut state = RamState::default();
        let mut t = trigger("a", 0, 5);
        state.put_trigger(&t);
        let horizon = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(state.waiting_triggers_due(horizon, 10).len(), 1);

        t.state = TriggerState::Paused;
        state.put_trigger(&t);
        assert!(state.waiting_triggers_due(horizon, 10).is_empty());

        t.state = TriggerState::Waiting;
        state.put_trigger(&t);
        assert!(state.delete_trigger(&t.key));
        assert!(state.waiting_triggers_due(horizon, 10).is_empty());
        assert!(state.triggers_for_job(&t.job_key).is_empty());
    }

    #[test]
    fn test_group_names_are_sorted_and_unique() {
        let mut state = RamState::default();
        for (name, group) in [("a", "beta"), ("b", "alpha"), ("c", "beta")] {
            let t = Trigger::new(
                TriggerKey::new(name, group),
                JobKey::new("job", "g"),
                Schedule::once(),
                Utc::now(),
            );
            state.put_trigger(&t);
        }
        assert_eq!(state.trigger_group_names(), vec!["alpha", "beta"]);
        assert_eq!(
            state.trigger_keys(&GroupMatcher::group_equals("beta")).len(),
            2
        );
    }
}
