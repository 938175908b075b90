use thiserror::Error;

/// 调度代理错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务 {id} 当前状态为 {status}，无法执行操作: {operation}")]
    InvalidState {
        id: String,
        status: String,
        operation: String,
    },

    #[error("调度代理未运行")]
    NotRunning,

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),
}

/// 统一的Result类型
pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found<S: ToString>(id: S) -> Self {
        Self::TaskNotFound { id: id.to_string() }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn invalid_state<I: ToString, S: ToString, O: Into<String>>(
        id: I,
        status: S,
        operation: O,
    ) -> Self {
        Self::InvalidState {
            id: id.to_string(),
            status: status.to_string(),
            operation: operation.into(),
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = SchedulerError::invalid_state("t-1", "COMPLETED", "retry");
        let msg = err.to_string();
        assert!(msg.contains("t-1"));
        assert!(msg.contains("COMPLETED"));
        assert!(msg.contains("retry"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: SchedulerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
