use chrono::{Duration, Utc};
use jobstore_domain::{
    CompletedExecutionInstruction, FiredDisposition, GroupMatcher, MisfireInstruction, Schedule,
    SignalEvent, Trigger, TriggerState,
};
use jobstore_testing_utils::{JobBuilder, TriggerBuilder};

use super::{StoreContext, StoreEngine};
use crate::memory::RamState;

fn context() -> StoreContext {
    StoreContext {
        instance_id: "node-1".to_string(),
        misfire_threshold: Duration::seconds(60),
    }
}

async fn acquire(state: &mut RamState, ctx: &StoreContext, max_count: usize) -> Vec<Trigger> {
    let mut engine = StoreEngine::new(state, ctx);
    engine
        .acquire_next_triggers(Utc::now(), max_count, Duration::seconds(1))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_stateful_job_fires_one_trigger_at_a_time() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("report").stateful().build();
    let t1 = TriggerBuilder::new("t1", &job).with_priority(9).build();
    let t2 = TriggerBuilder::new("t2", &job)
        .with_schedule(Schedule::repeat_forever(Duration::seconds(30)))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job.clone(), vec![t1.clone(), t2.clone()])], false)
        .await
        .unwrap();

    let acquired = acquire(&mut state, &ctx, 5).await;
    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].key, t1.key);

    let mut engine = StoreEngine::new(&mut state, &ctx);
    let results = engine.triggers_fired(&acquired).await.unwrap();
    assert!(results[0].bundle().is_some());
    assert_eq!(state.trigger(&t2.key).unwrap().state, TriggerState::Blocked);
    assert!(acquire(&mut state, &ctx, 5).await.is_empty());

    let fired = results[0].trigger.clone();
    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .triggered_job_complete(&fired, &job, CompletedExecutionInstruction::Noop)
        .await
        .unwrap();
    let signals = engine.into_signals();

    assert!(state.trigger(&t1.key).is_none());
    assert_eq!(state.trigger(&t2.key).unwrap().state, TriggerState::Waiting);
    assert!(signals
        .iter()
        .any(|signal| matches!(signal, SignalEvent::Finalized(t) if t.key == t1.key)));
    assert!(state.job_exists(&job.key));
}

#[tokio::test]
async fn test_stateful_job_data_is_persisted_on_completion() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("counter")
        .stateful()
        .with_data("count", serde_json::json!(1))
        .build();
    let trigger = TriggerBuilder::new("t1", &job)
        .with_schedule(Schedule::repeat_forever(Duration::seconds(10)))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job.clone(), vec![trigger])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 1).await;
    let mut engine = StoreEngine::new(&mut state, &ctx);
    let fired = engine.triggers_fired(&acquired).await.unwrap();

    let mut updated = job.clone();
    updated
        .job_data
        .insert("count".to_string(), serde_json::json!(2));
    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .triggered_job_complete(
            &fired[0].trigger,
            &updated,
            CompletedExecutionInstruction::Noop,
        )
        .await
        .unwrap();

    let stored = state.job(&job.key).unwrap();
    assert_eq!(stored.job_data["count"], serde_json::json!(2));
    assert_eq!(
        state.trigger(&fired[0].trigger.key).unwrap().state,
        TriggerState::Waiting
    );
}

#[tokio::test]
async fn test_misfire_reschedules_before_acquisition() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("sync").build();
    let trigger = TriggerBuilder::new("t1", &job)
        .with_schedule(Schedule::repeat_forever(Duration::minutes(1)))
        .starting_in(Duration::minutes(-10))
        .with_misfire_instruction(MisfireInstruction::RescheduleNextValid)
        .build();
    let stale = trigger.next_fire_time;

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job, vec![trigger.clone()])], false)
        .await
        .unwrap();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .acquire_next_triggers(Utc::now(), 5, Duration::zero())
        .await
        .unwrap();
    let signals = engine.into_signals();

    let stored = state.trigger(&trigger.key).unwrap();
    assert_ne!(stored.next_fire_time, stale);
    assert!(stored.next_fire_time.unwrap() > Utc::now() - ctx.misfire_threshold);
    assert!(signals
        .iter()
        .any(|signal| matches!(signal, SignalEvent::Misfired(t) if t.key == trigger.key)));
}

#[tokio::test]
async fn test_misfired_trigger_without_future_fires_is_removed() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("once").build();
    let trigger = TriggerBuilder::new("t1", &job)
        .starting_in(Duration::minutes(-10))
        .with_misfire_instruction(MisfireInstruction::DoNothing)
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job.clone(), vec![trigger.clone()])], false)
        .await
        .unwrap();

    assert!(acquire(&mut state, &ctx, 5).await.is_empty());
    assert!(state.trigger(&trigger.key).is_none());
    assert!(!state.job_exists(&job.key));
}

#[tokio::test]
async fn test_paused_group_applies_to_new_triggers() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").with_group("reports").durable().build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine.store_job(&job, false).await.unwrap();
    let paused = engine
        .pause_triggers(&GroupMatcher::group_equals("reports"))
        .await
        .unwrap();
    assert_eq!(paused, vec!["reports"]);

    let trigger = TriggerBuilder::new("t1", &job).build();
    engine.store_trigger(&trigger, false).await.unwrap();
    assert_eq!(state.trigger(&trigger.key).unwrap().state, TriggerState::Paused);
    assert!(acquire(&mut state, &ctx, 5).await.is_empty());

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine.resume_all().await.unwrap();
    assert_eq!(state.trigger(&trigger.key).unwrap().state, TriggerState::Waiting);
    assert!(state.paused_trigger_groups().is_empty());
}

#[tokio::test]
async fn test_paused_job_group_keeps_triggers_paused_on_trigger_resume() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").with_group("batch").build();
    let trigger = TriggerBuilder::new("t1", &job).with_group("nightly").build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job, vec![trigger.clone()])], false)
        .await
        .unwrap();
    engine
        .pause_jobs(&GroupMatcher::group_equals("batch"))
        .await
        .unwrap();
    engine
        .resume_triggers(&GroupMatcher::group_equals("nightly"))
        .await
        .unwrap();
    assert_eq!(state.trigger(&trigger.key).unwrap().state, TriggerState::Paused);
    assert!(state.is_job_group_paused("batch"));
}

#[tokio::test]
async fn test_fire_after_pause_is_ignored_and_record_dropped() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").stateful().build();
    let trigger = TriggerBuilder::new("t1", &job)
        .with_schedule(Schedule::repeat_forever(Duration::seconds(5)))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job.clone(), vec![trigger.clone()])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 1).await;

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine.pause_trigger(&trigger.key).await.unwrap();
    let results = engine.triggers_fired(&acquired).await.unwrap();
    assert!(results.is_empty());

    let mut engine = StoreEngine::new(&mut state, &ctx);
    assert_eq!(engine.recover_instance().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fire_without_acquisition_is_vetoed_while_job_executes() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").stateful().build();
    let t1 = TriggerBuilder::new("t1", &job).build();
    let t2 = TriggerBuilder::new("t2", &job).build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job, vec![t1.clone(), t2.clone()])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 1).await;
    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine.triggers_fired(&acquired).await.unwrap();

    let other = if acquired[0].key == t1.key { &t2 } else { &t1 };
    let results = engine.triggers_fired(&[other.clone()]).await.unwrap();
    assert!(results.is_empty() || results[0].is_vetoed());
    assert!(!matches!(
        results.first().map(|r| &r.disposition),
        Some(FiredDisposition::Success(_))
    ));
}

#[tokio::test]
async fn test_recover_instance_restores_states() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").stateful().build();
    let t1 = TriggerBuilder::new("t1", &job)
        .with_schedule(Schedule::repeat_forever(Duration::seconds(10)))
        .build();
    let t2 = TriggerBuilder::new("t2", &job)
        .starting_in(Duration::hours(1))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job, vec![t1.clone(), t2.clone()])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 1).await;
    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine.triggers_fired(&acquired).await.unwrap();
    assert_eq!(state.trigger(&t1.key).unwrap().state, TriggerState::Executing);
    assert_eq!(state.trigger(&t2.key).unwrap().state, TriggerState::Blocked);

    let mut engine = StoreEngine::new(&mut state, &ctx);
    assert_eq!(engine.recover_instance().await.unwrap(), 1);
    assert_eq!(state.trigger(&t1.key).unwrap().state, TriggerState::Waiting);
    assert_eq!(state.trigger(&t2.key).unwrap().state, TriggerState::Waiting);
}

#[tokio::test]
async fn test_recover_ignores_other_instances() {
    let ctx = context();
    let other_ctx = StoreContext {
        instance_id: "node-2".to_string(),
        ..context()
    };
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").build();
    let trigger = TriggerBuilder::new("t1", &job).build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job, vec![trigger.clone()])], false)
        .await
        .unwrap();
    assert_eq!(acquire(&mut state, &other_ctx, 1).await.len(), 1);

    let mut engine = StoreEngine::new(&mut state, &ctx);
    assert_eq!(engine.recover_instance().await.unwrap(), 0);
    assert_eq!(state.trigger(&trigger.key).unwrap().state, TriggerState::Acquired);
}

#[tokio::test]
async fn test_calendar_in_use_cannot_be_removed() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").build();
    let trigger = TriggerBuilder::new("t1", &job).with_calendar("holidays").build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    let missing = engine
        .store_jobs_and_triggers(&[(job.clone(), vec![trigger.clone()])], false)
        .await;
    assert!(missing.is_err());
    assert!(!state.job_exists(&job.key));

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_calendar(
            "holidays",
            &jobstore_domain::Calendar::new(serde_json::json!({"dates": ["2024-12-25"]})),
            false,
        )
        .await
        .unwrap();
    engine
        .store_jobs_and_triggers(&[(job, vec![trigger.clone()])], false)
        .await
        .unwrap();
    assert!(engine.remove_calendar("holidays").await.is_err());
    assert!(engine.remove_trigger(&trigger.key).await.unwrap());
    assert!(engine.remove_calendar("holidays").await.unwrap());
}

#[tokio::test]
async fn test_set_all_job_triggers_error() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("j1").build();
    let t1 = TriggerBuilder::new("t1", &job).build();
    let t2 = TriggerBuilder::new("t2", &job)
        .starting_in(Duration::hours(1))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job.clone(), vec![t1.clone(), t2.clone()])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 1).await;
    let mut engine = StoreEngine::new(&mut state, &ctx);
    let fired = engine.triggers_fired(&acquired).await.unwrap();
    engine
        .triggered_job_complete(
            &fired[0].trigger,
            &job,
            CompletedExecutionInstruction::SetAllJobTriggersError,
        )
        .await
        .unwrap();

    assert_eq!(state.trigger(&t1.key).unwrap().state, TriggerState::Error);
    assert_eq!(state.trigger(&t2.key).unwrap().state, TriggerState::Error);
}

#[tokio::test]
async fn test_re_execute_keeps_pause_set_during_execution() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("retry").build();
    let trigger = TriggerBuilder::new("t1", &job)
        .with_schedule(Schedule::repeat_forever(Duration::minutes(5)))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job.clone(), vec![trigger.clone()])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 1).await;
    let mut engine = StoreEngine::new(&mut state, &ctx);
    let fired = engine.triggers_fired(&acquired).await.unwrap();
    engine.pause_trigger(&trigger.key).await.unwrap();
    assert_eq!(state.trigger(&trigger.key).unwrap().state, TriggerState::Paused);

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .triggered_job_complete(
            &fired[0].trigger,
            &job,
            CompletedExecutionInstruction::ReExecuteJob,
        )
        .await
        .unwrap();

    let stored = state.trigger(&trigger.key).unwrap();
    assert_eq!(stored.state, TriggerState::Paused);
    assert!(stored.next_fire_time.unwrap() <= Utc::now());
    assert!(acquire(&mut state, &ctx, 5).await.is_empty());

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine.resume_trigger(&trigger.key).await.unwrap();
    assert_eq!(acquire(&mut state, &ctx, 5).await.len(), 1);
}

#[tokio::test]
async fn test_duplicate_trigger_in_one_batch_fires_once() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("exclusive").stateful().build();
    let t1 = TriggerBuilder::new("t1", &job)
        .with_schedule(Schedule::repeat_forever(Duration::seconds(30)))
        .with_priority(9)
        .build();
    let t2 = TriggerBuilder::new("t2", &job)
        .with_schedule(Schedule::repeat_forever(Duration::seconds(30)))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job, vec![t1.clone(), t2.clone()])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 5).await;
    assert_eq!(acquired.len(), 1);

    let batch = vec![acquired[0].clone(), acquired[0].clone()];
    let mut engine = StoreEngine::new(&mut state, &ctx);
    let results = engine.triggers_fired(&batch).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].bundle().is_some());

    // 执行记录仍在，有状态作业继续阻塞其他触发器
    assert_eq!(state.trigger(&t1.key).unwrap().state, TriggerState::Executing);
    assert_eq!(state.trigger(&t2.key).unwrap().state, TriggerState::Blocked);
    assert!(acquire(&mut state, &ctx, 5).await.is_empty());
}

#[tokio::test]
async fn test_unrepresentable_next_fire_time_ends_schedule() {
    let ctx = context();
    let mut state = RamState::default();
    let job = JobBuilder::new("far-future").build();
    let trigger = TriggerBuilder::new("t1", &job)
        .with_schedule(Schedule::repeat_forever(Duration::milliseconds(i64::MAX / 2)))
        .build();

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .store_jobs_and_triggers(&[(job.clone(), vec![trigger.clone()])], false)
        .await
        .unwrap();
    let acquired = acquire(&mut state, &ctx, 1).await;
    let mut engine = StoreEngine::new(&mut state, &ctx);
    let fired = engine.triggers_fired(&acquired).await.unwrap();
    assert_eq!(fired[0].bundle().unwrap().next_fire_time, None);

    let mut engine = StoreEngine::new(&mut state, &ctx);
    engine
        .triggered_job_complete(&fired[0].trigger, &job, CompletedExecutionInstruction::Noop)
        .await
        .unwrap();
    assert!(state.trigger(&trigger.key).is_none());
    assert!(!state.job_exists(&job.key));
}
