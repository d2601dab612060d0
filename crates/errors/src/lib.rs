use thiserror::Error;

/// 持久化实体类别，用于描述冲突或缺失的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Job,
    Trigger,
    Calendar,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Job => "作业",
            EntityKind::Trigger => "触发器",
            EntityKind::Calendar => "日历",
        };
        f.write_str(s)
    }
}

/// 错误分类，调度器据此决定是否暂停触发
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    PersistenceFailure,
    ConfigurationFailure,
    LogicalConflict,
}

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("{entity}已存在: {key}")]
    AlreadyExists { entity: EntityKind, key: String },
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("持久化失败: {0}")]
    Persistence(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("逻辑冲突: {0}")]
    LogicalConflict(String),
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
}

pub type JobStoreResult<T> = Result<T, JobStoreError>;

impl JobStoreError {
    pub fn already_exists<S: Into<String>>(entity: EntityKind, key: S) -> Self {
        Self::AlreadyExists {
            entity,
            key: key.into(),
        }
    }
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::LogicalConflict(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobStoreError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            JobStoreError::Database(_)
            | JobStoreError::Persistence(_)
            | JobStoreError::Serialization(_) => ErrorKind::PersistenceFailure,
            JobStoreError::Configuration(_) => ErrorKind::ConfigurationFailure,
            JobStoreError::LogicalConflict(_) | JobStoreError::InvalidCron { .. } => {
                ErrorKind::LogicalConflict
            }
        }
    }

    /// 启动期间的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobStoreError::Configuration(_))
    }

    /// 仅瞬时的存储错误允许重试（锁忙、连接池超时、IO）
    pub fn is_retryable(&self) -> bool {
        match self {
            JobStoreError::Database(err) => is_transient_sqlx_error(err),
            _ => false,
        }
    }
}

fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            // SQLite 扩展错误码的低8位是主错误码: 5 = BUSY, 6 = LOCKED
            let busy = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false);
            busy || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}

impl From<serde_json::Error> for JobStoreError {
    fn from(err: serde_json::Error) -> Self {
        JobStoreError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for JobStoreError {
    fn from(err: anyhow::Error) -> Self {
        JobStoreError::Persistence(format!("{err:#}"))
    }
}
