use thiserror::Error;

/// 统计聚合错误类型定义
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("源数据格式错误: 坐席 {agent_id} - {message}")]
    MalformedEvent { agent_id: String, message: String },

    #[error("聚合失败: {0}")]
    Aggregation(String),

    #[error("已有聚合任务正在运行")]
    AlreadyRunning,

    #[error("无效的日期格式: {value}，期望 YYYY-MM-DD")]
    InvalidDateFormat { value: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type StatsResult<T> = std::result::Result<T, StatsError>;

impl StatsError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }
    pub fn malformed_event<A: Into<String>, S: Into<String>>(agent_id: A, msg: S) -> Self {
        Self::MalformedEvent {
            agent_id: agent_id.into(),
            message: msg.into(),
        }
    }
    pub fn invalid_date<S: Into<String>>(value: S) -> Self {
        Self::InvalidDateFormat {
            value: value.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 会阻止整个运行继续的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StatsError::StoreUnavailable(_)
                | StatsError::Configuration(_)
                | StatsError::Internal(_)
        )
    }

    /// 下一轮可能自行恢复的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatsError::Database(_)
                | StatsError::DatabaseOperation(_)
                | StatsError::StoreUnavailable(_)
                | StatsError::Aggregation(_)
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            StatsError::AlreadyRunning => "聚合任务正在运行，请稍后重试",
            StatsError::InvalidDateFormat { .. } => "日期格式有误",
            StatsError::Configuration(_) => "调度配置有误",
            StatsError::StoreUnavailable(_) => "存储暂不可用，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for StatsError {
    fn from(err: serde_json::Error) -> Self {
        StatsError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for StatsError {
    fn from(err: anyhow::Error) -> Self {
        StatsError::Internal(err.to_string())
    }
}
