//! 数据库表结构
//!
//! 所有表以 `sched_name` 开头，多个调度器可以共享同一个数据库文件。
//! 时间统一保存为 UTC 毫秒时间戳。

use sqlx::SqliteConnection;

use jobstore_errors::JobStoreResult;

/// 串行化所有修改操作的行锁名称
pub const TRIGGER_ACCESS_LOCK: &str = "TRIGGER_ACCESS";

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_details (
        sched_name   TEXT    NOT NULL,
        job_name     TEXT    NOT NULL,
        job_group    TEXT    NOT NULL,
        description  TEXT,
        job_type     TEXT    NOT NULL,
        is_durable   INTEGER NOT NULL,
        is_stateful  INTEGER NOT NULL,
        job_data     TEXT    NOT NULL,
        PRIMARY KEY (sched_name, job_name, job_group)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS triggers (
        sched_name          TEXT    NOT NULL,
        trigger_name        TEXT    NOT NULL,
        trigger_group       TEXT    NOT NULL,
        job_name            TEXT    NOT NULL,
        job_group           TEXT    NOT NULL,
        description         TEXT,
        priority            INTEGER NOT NULL,
        start_time          INTEGER NOT NULL,
        end_time            INTEGER,
        next_fire_time      INTEGER,
        prev_fire_time      INTEGER,
        misfire_instruction TEXT    NOT NULL,
        calendar_name       TEXT,
        schedule            TEXT    NOT NULL,
        state               TEXT    NOT NULL,
        version             INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (sched_name, trigger_name, trigger_group)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_triggers_state_next_fire ON triggers (sched_name, state, next_fire_time)",
    "CREATE INDEX IF NOT EXISTS idx_triggers_job ON triggers (sched_name, job_name, job_group)",
    r#"
    CREATE TABLE IF NOT EXISTS calendars (
        sched_name    TEXT NOT NULL,
        calendar_name TEXT NOT NULL,
        description   TEXT,
        data          TEXT NOT NULL,
        PRIMARY KEY (sched_name, calendar_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS paused_trigger_groups (
        sched_name    TEXT NOT NULL,
        trigger_group TEXT NOT NULL,
        PRIMARY KEY (sched_name, trigger_group)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS paused_job_groups (
        sched_name TEXT NOT NULL,
        job_group  TEXT NOT NULL,
        PRIMARY KEY (sched_name, job_group)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fired_triggers (
        sched_name    TEXT    NOT NULL,
        entry_id      TEXT    NOT NULL,
        instance_id   TEXT    NOT NULL,
        trigger_name  TEXT    NOT NULL,
        trigger_group TEXT    NOT NULL,
        job_name      TEXT    NOT NULL,
        job_group     TEXT    NOT NULL,
        is_stateful   INTEGER NOT NULL,
        state         TEXT    NOT NULL,
        priority      INTEGER NOT NULL,
        fired_time    INTEGER NOT NULL,
        sched_time    INTEGER,
        PRIMARY KEY (sched_name, entry_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_fired_triggers_instance ON fired_triggers (sched_name, instance_id)",
    "CREATE INDEX IF NOT EXISTS idx_fired_triggers_job ON fired_triggers (sched_name, job_name, job_group)",
    r#"
    CREATE TABLE IF NOT EXISTS locks (
        sched_name TEXT NOT NULL,
        lock_name  TEXT NOT NULL,
        PRIMARY KEY (sched_name, lock_name)
    )
    "#,
];

/// 建表并写入本调度器的锁行，可重复执行
pub async fn create_schema(conn: &mut SqliteConnection, sched_name: &str) -> JobStoreResult<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    sqlx::query("INSERT OR IGNORE INTO locks (sched_name, lock_name) VALUES (?, ?)")
        .bind(sched_name)
        .bind(TRIGGER_ACCESS_LOCK)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
