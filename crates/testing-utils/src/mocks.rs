//! Mock implementations for the scheduler callbacks
//!
//! 存储层的测试通过 `RecordingSignaler` 检查派发了哪些通知。

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use jobstore_domain::{JobKey, SchedulerSignaler, SignalEvent, Trigger, TriggerKey};

/// 按顺序记录所有通知的信号器
#[derive(Debug, Clone, Default)]
pub struct RecordingSignaler {
    events: Arc<Mutex<Vec<SignalEvent>>>,
}

impl RecordingSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: SignalEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<SignalEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn misfired(&self) -> Vec<TriggerKey> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SignalEvent::Misfired(trigger) => Some(trigger.key),
                _ => None,
            })
            .collect()
    }

    pub fn finalized(&self) -> Vec<TriggerKey> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SignalEvent::Finalized(trigger) => Some(trigger.key),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_jobs(&self) -> Vec<JobKey> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SignalEvent::JobDeleted(job_key) => Some(job_key),
                _ => None,
            })
            .collect()
    }

    pub fn scheduling_changes(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, SignalEvent::SchedulingChange(_)))
            .count()
    }
}

impl SchedulerSignaler for RecordingSignaler {
    fn notify_trigger_listeners_misfired(&self, trigger: &Trigger) {
        self.record(SignalEvent::Misfired(trigger.clone()));
    }

    fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger) {
        self.record(SignalEvent::Finalized(trigger.clone()));
    }

    fn notify_scheduler_listeners_job_deleted(&self, job_key: &JobKey) {
        self.record(SignalEvent::JobDeleted(job_key.clone()));
    }

    fn signal_scheduling_change(&self, candidate_new_next_fire_time: Option<DateTime<Utc>>) {
        self.record(SignalEvent::SchedulingChange(candidate_new_next_fire_time));
    }

    fn notify_scheduler_listeners_error(&self, message: &str) {
        self.record(SignalEvent::Error(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_signaler() {
        let signaler = RecordingSignaler::new();
        let job_key = JobKey::new("j1", "g");
        signaler.notify_scheduler_listeners_job_deleted(&job_key);
        signaler.signal_scheduling_change(None);

        assert_eq!(signaler.deleted_jobs(), vec![job_key]);
        assert_eq!(signaler.scheduling_changes(), 1);
        signaler.clear();
        assert!(signaler.events().is_empty());
    }
}
