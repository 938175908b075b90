//! 任务处理器端口
//!
//! 每个任务类型对应一个外部提供的处理器。处理器可以做任意外部 I/O，
//! 失败必须以错误返回，不能悄悄给出降级结果。处理器需要自行控制超时，
//! 并且应当是幂等的：持久化失败时同一任务可能被再次执行。

use async_trait::async_trait;
use thiserror::Error;

use crate::entities::{Task, TaskType};
use crate::value_objects::TaskOutput;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessorError {
    #[error("{0}")]
    Failed(String),

    #[error("处理超时: {0}")]
    Timeout(String),

    #[error("HTTP请求失败: {0}")]
    Http(String),

    #[error("未注册的任务类型处理器: {0}")]
    UnknownTaskType(TaskType),

    #[error("处理器发生panic: {0}")]
    Panicked(String),
}

impl ProcessorError {
    pub fn failed<S: Into<String>>(msg: S) -> Self {
        ProcessorError::Failed(msg.into())
    }
}

#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: &Task) -> Result<TaskOutput, ProcessorError>;

    fn name(&self) -> &str;
}
