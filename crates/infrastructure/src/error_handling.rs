//! 仓储操作的错误上下文
//!
//! 把 sqlx 错误转换成带实体描述的 `SchedulerError`，并统一记录日志。

use std::fmt;

use billing_core::SchedulerError;
use billing_domain::TaskType;
use chrono::{DateTime, Utc};
use sqlx::Error as SqlxError;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Upsert,
    Recover,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "检索"),
            RepositoryOperation::Upsert => write!(f, "累加"),
            RepositoryOperation::Recover => write!(f, "恢复"),
        }
    }
}

/// 能描述自身所操作实体的上下文
pub trait OperationContext {
    fn operation(&self) -> RepositoryOperation;
    fn entity_description(&self) -> String;
}

/// 任务仓储操作上下文
#[derive(Debug, Clone)]
pub struct TaskOperationContext {
    pub operation: RepositoryOperation,
    pub task_id: Option<Uuid>,
    pub task_type: Option<TaskType>,
    pub timestamp: DateTime<Utc>,
    pub additional_info: Option<String>,
}

impl TaskOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            task_id: None,
            task_type: None,
            timestamp: Utc::now(),
            additional_info: None,
        }
    }

    pub fn with_task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_additional_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }
}

impl OperationContext for TaskOperationContext {
    fn operation(&self) -> RepositoryOperation {
        self.operation
    }

    fn entity_description(&self) -> String {
        match (&self.task_id, &self.task_type) {
            (Some(id), Some(task_type)) => format!("{task_type} 任务 (ID: {id})"),
            (Some(id), None) => format!("任务 (ID: {id})"),
            (None, Some(task_type)) => format!("{task_type} 任务"),
            (None, None) => "任务".to_string(),
        }
    }
}

/// 知识仓储操作上下文
#[derive(Debug, Clone)]
pub struct KnowledgeOperationContext {
    pub operation: RepositoryOperation,
    pub category: Option<String>,
    pub counterpart_id: Option<String>,
}

impl KnowledgeOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            category: None,
            counterpart_id: None,
        }
    }

    pub fn with_key(mut self, category: &str, counterpart_id: &str) -> Self {
        self.category = Some(category.to_string());
        self.counterpart_id = Some(counterpart_id.to_string());
        self
    }
}

impl OperationContext for KnowledgeOperationContext {
    fn operation(&self) -> RepositoryOperation {
        self.operation
    }

    fn entity_description(&self) -> String {
        match (&self.category, &self.counterpart_id) {
            (Some(category), Some(counterpart)) => {
                format!("知识记录 ({category}/{counterpart})")
            }
            _ => "知识记录".to_string(),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// 带上下文的数据库错误
    pub fn database_error<C: OperationContext>(context: &C, error: SqlxError) -> SchedulerError {
        let entity_desc = context.entity_description();
        let operation_desc = context.operation().to_string();

        let error_msg = match &error {
            SqlxError::Database(db_error) => match db_error.constraint() {
                Some(constraint) => format!(
                    "{operation_desc}{entity_desc}时发生数据库约束冲突: {constraint}"
                ),
                None => format!("{operation_desc}{entity_desc}时发生数据库错误: {db_error}"),
            },
            SqlxError::PoolClosed => format!("{operation_desc}{entity_desc}时数据库连接池已关闭"),
            SqlxError::PoolTimedOut => format!("{operation_desc}{entity_desc}时数据库连接池超时"),
            SqlxError::Io(io_error) => {
                format!("{operation_desc}{entity_desc}时发生I/O错误: {io_error}")
            }
            _ => format!("{operation_desc}{entity_desc}时发生未知数据库错误: {error}"),
        };

        error!(error = %error, "{}", error_msg);
        SchedulerError::database_error(error_msg)
    }

    pub fn serialization_error<C: OperationContext>(
        context: &C,
        error: serde_json::Error,
    ) -> SchedulerError {
        let msg = format!(
            "{}{}时序列化失败: {}",
            context.operation(),
            context.entity_description(),
            error
        );
        error!(error = %error, "{}", msg);
        SchedulerError::Serialization(msg)
    }

    pub fn log_operation_success<C: OperationContext>(context: &C, additional_info: Option<&str>) {
        let base_msg = format!("{}{}成功", context.operation(), context.entity_description());
        match additional_info {
            Some(info) => debug!("{}: {}", base_msg, info),
            None => debug!("{}", base_msg),
        }
    }
}

/// 快速构造任务操作上下文
#[macro_export]
macro_rules! task_context {
    ($operation:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation)
    };
    ($operation:expr, task_id = $task_id:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation).with_task_id($task_id)
    };
    ($operation:expr, task_id = $task_id:expr, task_type = $task_type:expr) => {
        $crate::error_handling::TaskOperationContext::new($operation)
            .with_task_id($task_id)
            .with_task_type($task_type)
    };
}

#[macro_export]
macro_rules! knowledge_context {
    ($operation:expr) => {
        $crate::error_handling::KnowledgeOperationContext::new($operation)
    };
    ($operation:expr, $category:expr, $counterpart:expr) => {
        $crate::error_handling::KnowledgeOperationContext::new($operation)
            .with_key($category, $counterpart)
    };
}
