//! 存储层向调度器发出的通知

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entities::Trigger;
use crate::value_objects::JobKey;

/// 调度器提供的回调接口
///
/// 存储层在事务提交（或释放锁）之后才调用这些方法，
/// 实现中不应再回调存储。
pub trait SchedulerSignaler: Send + Sync {
    fn notify_trigger_listeners_misfired(&self, trigger: &Trigger);

    fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger);

    fn notify_scheduler_listeners_job_deleted(&self, job_key: &JobKey);

    fn signal_scheduling_change(&self, candidate_new_next_fire_time: Option<DateTime<Utc>>);

    fn notify_scheduler_listeners_error(&self, message: &str);
}

/// 不做任何事的信号器，初始化之前使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSignaler;

impl SchedulerSignaler for NoopSignaler {
    fn notify_trigger_listeners_misfired(&self, _trigger: &Trigger) {}

    fn notify_scheduler_listeners_finalized(&self, _trigger: &Trigger) {}

    fn notify_scheduler_listeners_job_deleted(&self, _job_key: &JobKey) {}

    fn signal_scheduling_change(&self, _candidate_new_next_fire_time: Option<DateTime<Utc>>) {}

    fn notify_scheduler_listeners_error(&self, _message: &str) {}
}

/// 操作过程中收集的通知，提交后统一派发
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Misfired(Trigger),
    Finalized(Trigger),
    JobDeleted(JobKey),
    SchedulingChange(Option<DateTime<Utc>>),
    Error(String),
}

impl SignalEvent {
    pub fn dispatch(&self, signaler: &dyn SchedulerSignaler) {
        match self {
            SignalEvent::Misfired(trigger) => signaler.notify_trigger_listeners_misfired(trigger),
            SignalEvent::Finalized(trigger) => {
                signaler.notify_scheduler_listeners_finalized(trigger)
            }
            SignalEvent::JobDeleted(job_key) => {
                signaler.notify_scheduler_listeners_job_deleted(job_key)
            }
            SignalEvent::SchedulingChange(candidate) => signaler.signal_scheduling_change(*candidate),
            SignalEvent::Error(message) => signaler.notify_scheduler_listeners_error(message),
        }
    }
}

pub fn dispatch_all(signaler: &Arc<dyn SchedulerSignaler>, events: Vec<SignalEvent>) {
    for event in events {
        event.dispatch(signaler.as_ref());
    }
}
