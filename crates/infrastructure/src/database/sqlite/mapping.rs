//! 数据库行与领域对象之间的转换

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use jobstore_domain::{
    Calendar, FiredTriggerRecord, JobDataMap, JobDetail, JobKey, MisfireInstruction, Schedule,
    Trigger, TriggerKey, TriggerState,
};
use jobstore_errors::{JobStoreError, JobStoreResult};

pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> JobStoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| JobStoreError::Serialization(format!("无效的时间戳: {millis}")))
}

fn optional_from_millis(millis: Option<i64>) -> JobStoreResult<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

pub fn row_to_job(row: &SqliteRow) -> JobStoreResult<JobDetail> {
    let job_data: String = row.try_get("job_data")?;
    let job_data: JobDataMap = serde_json::from_str(&job_data)
        .map_err(|e| JobStoreError::Serialization(format!("解析作业数据失败: {e}")))?;

    Ok(JobDetail {
        key: JobKey::new(
            row.try_get::<String, _>("job_name")?,
            row.try_get::<String, _>("job_group")?,
        ),
        description: row.try_get("description")?,
        job_type: row.try_get("job_type")?,
        durable: row.try_get("is_durable")?,
        stateful: row.try_get("is_stateful")?,
        job_data,
    })
}

/// 返回触发器及其行版本号
pub fn row_to_trigger(row: &SqliteRow) -> JobStoreResult<(Trigger, i64)> {
    let misfire: String = row.try_get("misfire_instruction")?;
    let misfire_instruction = MisfireInstruction::parse(&misfire)
        .ok_or_else(|| JobStoreError::Serialization(format!("未知的错过触发策略: {misfire}")))?;
    let schedule: String = row.try_get("schedule")?;
    let schedule: Schedule = serde_json::from_str(&schedule)
        .map_err(|e| JobStoreError::Serialization(format!("解析调度策略失败: {e}")))?;

    let trigger = Trigger {
        key: TriggerKey::new(
            row.try_get::<String, _>("trigger_name")?,
            row.try_get::<String, _>("trigger_group")?,
        ),
        job_key: JobKey::new(
            row.try_get::<String, _>("job_name")?,
            row.try_get::<String, _>("job_group")?,
        ),
        description: row.try_get("description")?,
        priority: row.try_get("priority")?,
        start_time: from_millis(row.try_get("start_time")?)?,
        end_time: optional_from_millis(row.try_get("end_time")?)?,
        next_fire_time: optional_from_millis(row.try_get("next_fire_time")?)?,
        previous_fire_time: optional_from_millis(row.try_get("prev_fire_time")?)?,
        misfire_instruction,
        calendar_name: row.try_get("calendar_name")?,
        schedule,
        state: row.try_get::<TriggerState, _>("state")?,
        fire_instance_id: None,
    };
    Ok((trigger, row.try_get("version")?))
}

pub fn row_to_calendar(row: &SqliteRow) -> JobStoreResult<Calendar> {
    let data: String = row.try_get("data")?;
    Ok(Calendar {
        description: row.try_get("description")?,
        data: serde_json::from_str(&data)
            .map_err(|e| JobStoreError::Serialization(format!("解析日历失败: {e}")))?,
    })
}

pub fn row_to_fired(row: &SqliteRow) -> JobStoreResult<FiredTriggerRecord> {
    Ok(FiredTriggerRecord {
        fire_instance_id: row.try_get("entry_id")?,
        instance_id: row.try_get("instance_id")?,
        trigger_key: TriggerKey::new(
            row.try_get::<String, _>("trigger_name")?,
            row.try_get::<String, _>("trigger_group")?,
        ),
        job_key: JobKey::new(
            row.try_get::<String, _>("job_name")?,
            row.try_get::<String, _>("job_group")?,
        ),
        stateful: row.try_get("is_stateful")?,
        state: row.try_get::<TriggerState, _>("state")?,
        priority: row.try_get("priority")?,
        fired_time: from_millis(row.try_get("fired_time")?)?,
        scheduled_time: optional_from_millis(row.try_get("sched_time")?)?,
    })
}
