use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use jobstore_domain::{
    Calendar, FiredTriggerRecord, GroupMatcher, JobDetail, JobKey, Trigger, TriggerKey,
    TriggerState,
};
use jobstore_errors::{JobStoreError, JobStoreResult};

use super::mapping::{row_to_calendar, row_to_fired, row_to_job, row_to_trigger, to_millis};
use super::schema::TRIGGER_ACCESS_LOCK;
use crate::job_store::StoreOperations;

const TRIGGER_COLUMNS: &str = "trigger_name, trigger_group, job_name, job_group, description, \
     priority, start_time, end_time, next_fire_time, prev_fire_time, misfire_instruction, \
     calendar_name, schedule, state, version";

const FIRED_COLUMNS: &str = "entry_id, instance_id, trigger_name, trigger_group, job_name, \
     job_group, is_stateful, state, priority, fired_time, sched_time";

/// 单个事务内的存储原语
///
/// 读取到的触发器版本号会被记住，获取时用来做比较交换。
pub struct SqliteOperations {
    tx: Transaction<'static, Sqlite>,
    sched_name: String,
    versions: HashMap<TriggerKey, i64>,
}

impl SqliteOperations {
    pub async fn begin(pool: &SqlitePool, sched_name: &str) -> JobStoreResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            tx,
            sched_name: sched_name.to_string(),
            versions: HashMap::new(),
        })
    }

    /// 更新锁行，取得数据库写锁，直到提交或回滚才释放
    pub async fn lock_trigger_access(&mut self) -> JobStoreResult<()> {
        let result = sqlx::query(
            "UPDATE locks SET lock_name = lock_name WHERE sched_name = ? AND lock_name = ?",
        )
        .bind(&self.sched_name)
        .bind(TRIGGER_ACCESS_LOCK)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::persistence(format!(
                "锁行不存在: {}/{}",
                self.sched_name, TRIGGER_ACCESS_LOCK
            )));
        }
        Ok(())
    }

    pub async fn commit(self) -> JobStoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    fn remember_version(&mut self, trigger: &Trigger, version: i64) {
        self.versions.insert(trigger.key.clone(), version);
    }

    async fn fetch_triggers(&mut self, sql: &str, binds: &[&str]) -> JobStoreResult<Vec<Trigger>> {
        let mut query = sqlx::query(sql).bind(&self.sched_name);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&mut *self.tx).await?;
        let mut triggers = Vec::with_capacity(rows.len());
        for row in &rows {
            let (trigger, version) = row_to_trigger(row)?;
            self.remember_version(&trigger, version);
            triggers.push(trigger);
        }
        Ok(triggers)
    }

    async fn fetch_strings(&mut self, sql: &str) -> JobStoreResult<Vec<String>> {
        let values: Vec<String> = sqlx::query_scalar(sql)
            .bind(&self.sched_name)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(values)
    }

    async fn count(&mut self, sql: &str) -> JobStoreResult<usize> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(&self.sched_name)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count.max(0) as usize)
    }

    /// 精确分组在数据库中过滤，其余匹配方式取出后在内存中过滤，
    /// 避免 LIKE 的大小写不敏感
    async fn fetch_keys(
        &mut self,
        table: &str,
        name_column: &str,
        group_column: &str,
        matcher: &GroupMatcher,
    ) -> JobStoreResult<Vec<(String, String)>> {
        let mut sql = format!(
            "SELECT {name_column}, {group_column} FROM {table} WHERE sched_name = ?"
        );
        if matcher.exact_group().is_some() {
            sql.push_str(&format!(" AND {group_column} = ?"));
        }
        sql.push_str(&format!(" ORDER BY {group_column}, {name_column}"));

        let mut query = sqlx::query_as::<_, (String, String)>(&sql).bind(&self.sched_name);
        if let Some(group) = matcher.exact_group() {
            query = query.bind(group);
        }
        let keys = query.fetch_all(&mut *self.tx).await?;
        Ok(keys
            .into_iter()
            .filter(|(_, group)| matcher.is_match(group))
            .collect())
    }
}

#[async_trait]
impl StoreOperations for SqliteOperations {
    async fn job(&mut self, job_key: &JobKey) -> JobStoreResult<Option<JobDetail>> {
        let row = sqlx::query(
            "SELECT job_name, job_group, description, job_type, is_durable, is_stateful, job_data \
             FROM job_details WHERE sched_name = ? AND job_name = ? AND job_group = ?",
        )
        .bind(&self.sched_name)
        .bind(&job_key.name)
        .bind(&job_key.group)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn job_exists(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM job_details WHERE sched_name = ? AND job_name = ? AND job_group = ?",
        )
        .bind(&self.sched_name)
        .bind(&job_key.name)
        .bind(&job_key.group)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    async fn put_job(&mut self, job: &JobDetail) -> JobStoreResult<()> {
        let job_data = serde_json::to_string(&job.job_data)
            .map_err(|e| JobStoreError::Serialization(format!("序列化作业数据失败: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO job_details (sched_name, job_name, job_group, description, job_type, is_durable, is_stateful, job_data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(sched_name, job_name, job_group) DO UPDATE SET
                description = excluded.description,
                job_type = excluded.job_type,
                is_durable = excluded.is_durable,
                is_stateful = excluded.is_stateful,
                job_data = excluded.job_data
            "#,
        )
        .bind(&self.sched_name)
        .bind(&job.key.name)
        .bind(&job.key.group)
        .bind(&job.description)
        .bind(&job.job_type)
        .bind(job.durable)
        .bind(job.stateful)
        .bind(job_data)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_job(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM job_details WHERE sched_name = ? AND job_name = ? AND job_group = ?",
        )
        .bind(&self.sched_name)
        .bind(&job_key.name)
        .bind(&job_key.group)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn job_keys(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<JobKey>> {
        let keys = self
            .fetch_keys("job_details", "job_name", "job_group", matcher)
            .await?;
        Ok(keys
            .into_iter()
            .map(|(name, group)| JobKey::new(name, group))
            .collect())
    }

    async fn job_group_names(&mut self) -> JobStoreResult<Vec<String>> {
        self.fetch_strings(
            "SELECT DISTINCT job_group FROM job_details WHERE sched_name = ? ORDER BY job_group",
        )
        .await
    }

    async fn count_jobs(&mut self) -> JobStoreResult<usize> {
        self.count("SELECT COUNT(*) FROM job_details WHERE sched_name = ?")
            .await
    }

    async fn trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<Option<Trigger>> {
        let sql = format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers \
             WHERE sched_name = ? AND trigger_name = ? AND trigger_group = ?"
        );
        let triggers = self
            .fetch_triggers(&sql, &[&trigger_key.name, &trigger_key.group])
            .await?;
        Ok(triggers.into_iter().next())
    }

    async fn trigger_exists(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM triggers WHERE sched_name = ? AND trigger_name = ? AND trigger_group = ?",
        )
        .bind(&self.sched_name)
        .bind(&trigger_key.name)
        .bind(&trigger_key.group)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    async fn put_trigger(&mut self, trigger: &Trigger) -> JobStoreResult<()> {
        let schedule = serde_json::to_string(&trigger.schedule)
            .map_err(|e| JobStoreError::Serialization(format!("序列化调度策略失败: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO triggers (sched_name, trigger_name, trigger_group, job_name, job_group, description,
                priority, start_time, end_time, next_fire_time, prev_fire_time, misfire_instruction,
                calendar_name, schedule, state, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(sched_name, trigger_name, trigger_group) DO UPDATE SET
                job_name = excluded.job_name,
                job_group = excluded.job_group,
                description = excluded.description,
                priority = excluded.priority,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                next_fire_time = excluded.next_fire_time,
                prev_fire_time = excluded.prev_fire_time,
                misfire_instruction = excluded.misfire_instruction,
                calendar_name = excluded.calendar_name,
                schedule = excluded.schedule,
                state = excluded.state,
                version = triggers.version + 1
            "#,
        )
        .bind(&self.sched_name)
        .bind(&trigger.key.name)
        .bind(&trigger.key.group)
        .bind(&trigger.job_key.name)
        .bind(&trigger.job_key.group)
        .bind(&trigger.description)
        .bind(trigger.priority)
        .bind(to_millis(trigger.start_time))
        .bind(trigger.end_time.map(to_millis))
        .bind(trigger.next_fire_time.map(to_millis))
        .bind(trigger.previous_fire_time.map(to_millis))
        .bind(trigger.misfire_instruction.as_str())
        .bind(&trigger.calendar_name)
        .bind(schedule)
        .bind(trigger.state)
        .execute(&mut *self.tx)
        .await?;
        self.versions.remove(&trigger.key);
        Ok(())
    }

    async fn delete_trigger(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM triggers WHERE sched_name = ? AND trigger_name = ? AND trigger_group = ?",
        )
        .bind(&self.sched_name)
        .bind(&trigger_key.name)
        .bind(&trigger_key.group)
        .execute(&mut *self.tx)
        .await?;
        self.versions.remove(trigger_key);
        Ok(result.rows_affected() > 0)
    }

    async fn triggers_for_job(&mut self, job_key: &JobKey) -> JobStoreResult<Vec<Trigger>> {
        let sql = format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers \
             WHERE sched_name = ? AND job_name = ? AND job_group = ? \
             ORDER BY trigger_group, trigger_name"
        );
        self.fetch_triggers(&sql, &[&job_key.name, &job_key.group])
            .await
    }

    async fn trigger_keys(&mut self, matcher: &GroupMatcher) -> JobStoreResult<Vec<TriggerKey>> {
        let keys = self
            .fetch_keys("triggers", "trigger_name", "trigger_group", matcher)
            .await?;
        Ok(keys
            .into_iter()
            .map(|(name, group)| TriggerKey::new(name, group))
            .collect())
    }

    async fn trigger_group_names(&mut self) -> JobStoreResult<Vec<String>> {
        self.fetch_strings(
            "SELECT DISTINCT trigger_group FROM triggers WHERE sched_name = ? ORDER BY trigger_group",
        )
        .await
    }

    async fn count_triggers(&mut self) -> JobStoreResult<usize> {
        self.count("SELECT COUNT(*) FROM triggers WHERE sched_name = ?")
            .await
    }

    async fn calendar_in_use(&mut self, calendar_name: &str) -> JobStoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM triggers WHERE sched_name = ? AND calendar_name = ? LIMIT 1",
        )
        .bind(&self.sched_name)
        .bind(calendar_name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    async fn waiting_triggers_due(
        &mut self,
        no_later_than: DateTime<Utc>,
        limit: usize,
    ) -> JobStoreResult<Vec<Trigger>> {
        let sql = format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers \
             WHERE sched_name = ? AND state = ? AND next_fire_time IS NOT NULL AND next_fire_time <= ? \
             ORDER BY next_fire_time ASC, priority DESC, trigger_group ASC, trigger_name ASC \
             LIMIT ?"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&sql)
            .bind(&self.sched_name)
            .bind(TriggerState::Waiting)
            .bind(to_millis(no_later_than))
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;
        let mut triggers = Vec::with_capacity(rows.len());
        for row in &rows {
            let (trigger, version) = row_to_trigger(row)?;
            self.remember_version(&trigger, version);
            triggers.push(trigger);
        }
        Ok(triggers)
    }

    async fn mark_acquired(&mut self, trigger_key: &TriggerKey) -> JobStoreResult<bool> {
        let expected_version = self.versions.get(trigger_key).copied();
        let result = sqlx::query(
            "UPDATE triggers SET state = ?, version = version + 1 \
             WHERE sched_name = ? AND trigger_name = ? AND trigger_group = ? \
             AND state = ? AND (? IS NULL OR version = ?)",
        )
        .bind(TriggerState::Acquired)
        .bind(&self.sched_name)
        .bind(&trigger_key.name)
        .bind(&trigger_key.group)
        .bind(TriggerState::Waiting)
        .bind(expected_version)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await?;
        self.versions.remove(trigger_key);
        let acquired = result.rows_affected() == 1;
        if !acquired {
            debug!(trigger_key = %trigger_key, "触发器已被修改，放弃获取");
        }
        Ok(acquired)
    }

    async fn calendar(&mut self, name: &str) -> JobStoreResult<Option<Calendar>> {
        let row = sqlx::query(
            "SELECT description, data FROM calendars WHERE sched_name = ? AND calendar_name = ?",
        )
        .bind(&self.sched_name)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_calendar).transpose()
    }

    async fn calendar_exists(&mut self, name: &str) -> JobStoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM calendars WHERE sched_name = ? AND calendar_name = ?",
        )
        .bind(&self.sched_name)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    async fn put_calendar(&mut self, name: &str, calendar: &Calendar) -> JobStoreResult<()> {
        let data = serde_json::to_string(&calendar.data)
            .map_err(|e| JobStoreError::Serialization(format!("序列化日历失败: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO calendars (sched_name, calendar_name, description, data)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(sched_name, calendar_name) DO UPDATE SET
                description = excluded.description,
                data = excluded.data
            "#,
        )
        .bind(&self.sched_name)
        .bind(name)
        .bind(&calendar.description)
        .bind(data)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_calendar(&mut self, name: &str) -> JobStoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM calendars WHERE sched_name = ? AND calendar_name = ?")
                .bind(&self.sched_name)
                .bind(name)
                .execute(&mut *self.tx)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn calendar_names(&mut self) -> JobStoreResult<Vec<String>> {
        self.fetch_strings(
            "SELECT calendar_name FROM calendars WHERE sched_name = ? ORDER BY calendar_name",
        )
        .await
    }

    async fn count_calendars(&mut self) -> JobStoreResult<usize> {
        self.count("SELECT COUNT(*) FROM calendars WHERE sched_name = ?")
            .await
    }

    async fn paused_trigger_groups(&mut self) -> JobStoreResult<Vec<String>> {
        self.fetch_strings(
            "SELECT trigger_group FROM paused_trigger_groups WHERE sched_name = ? ORDER BY trigger_group",
        )
        .await
    }

    async fn is_trigger_group_paused(&mut self, group: &str) -> JobStoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM paused_trigger_groups WHERE sched_name = ? AND trigger_group = ?",
        )
        .bind(&self.sched_name)
        .bind(group)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    async fn set_trigger_group_paused(
        &mut self,
        group: &str,
        paused: bool,
    ) -> JobStoreResult<()> {
        let sql = if paused {
            "INSERT OR IGNORE INTO paused_trigger_groups (sched_name, trigger_group) VALUES (?, ?)"
        } else {
            "DELETE FROM paused_trigger_groups WHERE sched_name = ? AND trigger_group = ?"
        };
        sqlx::query(sql)
            .bind(&self.sched_name)
            .bind(group)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn paused_job_groups(&mut self) -> JobStoreResult<Vec<String>> {
        self.fetch_strings(
            "SELECT job_group FROM paused_job_groups WHERE sched_name = ? ORDER BY job_group",
        )
        .await
    }

    async fn is_job_group_paused(&mut self, group: &str) -> JobStoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM paused_job_groups WHERE sched_name = ? AND job_group = ?",
        )
        .bind(&self.sched_name)
        .bind(group)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    async fn set_job_group_paused(&mut self, group: &str, paused: bool) -> JobStoreResult<()> {
        let sql = if paused {
            "INSERT OR IGNORE INTO paused_job_groups (sched_name, job_group) VALUES (?, ?)"
        } else {
            "DELETE FROM paused_job_groups WHERE sched_name = ? AND job_group = ?"
        };
        sqlx::query(sql)
            .bind(&self.sched_name)
            .bind(group)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_fired(&mut self, record: &FiredTriggerRecord) -> JobStoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO fired_triggers (sched_name, {FIRED_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&self.sched_name)
        .bind(&record.fire_instance_id)
        .bind(&record.instance_id)
        .bind(&record.trigger_key.name)
        .bind(&record.trigger_key.group)
        .bind(&record.job_key.name)
        .bind(&record.job_key.group)
        .bind(record.stateful)
        .bind(record.state)
        .bind(record.priority)
        .bind(to_millis(record.fired_time))
        .bind(record.scheduled_time.map(to_millis))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_fired_state(
        &mut self,
        fire_instance_id: &str,
        state: TriggerState,
    ) -> JobStoreResult<()> {
        sqlx::query("UPDATE fired_triggers SET state = ? WHERE sched_name = ? AND entry_id = ?")
            .bind(state)
            .bind(&self.sched_name)
            .bind(fire_instance_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_fired(&mut self, fire_instance_id: &str) -> JobStoreResult<bool> {
        let result = sqlx::query("DELETE FROM fired_triggers WHERE sched_name = ? AND entry_id = ?")
            .bind(&self.sched_name)
            .bind(fire_instance_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_job_executing(&mut self, job_key: &JobKey) -> JobStoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM fired_triggers \
             WHERE sched_name = ? AND job_name = ? AND job_group = ? AND is_stateful = 1 AND state = ? \
             LIMIT 1",
        )
        .bind(&self.sched_name)
        .bind(&job_key.name)
        .bind(&job_key.group)
        .bind(TriggerState::Executing)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    async fn fired_records_for_instance(
        &mut self,
        instance_id: &str,
    ) -> JobStoreResult<Vec<FiredTriggerRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {FIRED_COLUMNS} FROM fired_triggers \
             WHERE sched_name = ? AND instance_id = ? ORDER BY fired_time, entry_id"
        ))
        .bind(&self.sched_name)
        .bind(instance_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(row_to_fired).collect()
    }

    async fn clear_all(&mut self) -> JobStoreResult<()> {
        for table in [
            "fired_triggers",
            "triggers",
            "job_details",
            "calendars",
            "paused_trigger_groups",
            "paused_job_groups",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE sched_name = ?"))
                .bind(&self.sched_name)
                .execute(&mut *self.tx)
                .await?;
        }
        self.versions.clear();
        Ok(())
    }
}
