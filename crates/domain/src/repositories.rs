//! 领域仓储抽象
//!
//! 任务表是任务存在与终态的唯一事实来源，知识表只做成败计数。

use async_trait::async_trait;
use billing_core::SchedulerResult;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{
    KnowledgeRecord, KnowledgeStats, Task, TaskFilter, TaskSpec, TaskStats, TaskUpdate,
};

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 以 PENDING、attempts=0 插入新任务
    async fn create(&self, spec: &TaskSpec) -> SchedulerResult<Task>;
    async fn get_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>>;
    /// 按 priority 降序、scheduled_for 升序返回
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;
    async fn count(&self, filter: &TaskFilter) -> SchedulerResult<i64>;
    /// 合并字段，任务不存在时返回 `TaskNotFound`
    async fn update(&self, id: Uuid, update: &TaskUpdate) -> SchedulerResult<Task>;
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;
    async fn count_by_status(&self) -> SchedulerResult<TaskStats>;
    /// PENDING/RETRYING 且已到期的任务
    async fn find_eligible(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>>;
    /// 把进程中断时遗留的 RUNNING 任务改回 RETRYING，返回受影响行数
    async fn recover_interrupted(&self, now: DateTime<Utc>) -> SchedulerResult<u64>;
}

/// 知识仓储抽象
#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn record_success(
        &self,
        category: &str,
        counterpart_id: &str,
    ) -> SchedulerResult<KnowledgeRecord>;
    /// 失败计数加一，并把 `pattern` 合并进已有的模式
    async fn record_failure(
        &self,
        category: &str,
        counterpart_id: &str,
        pattern: &serde_json::Value,
    ) -> SchedulerResult<KnowledgeRecord>;
    async fn get(
        &self,
        category: &str,
        counterpart_id: &str,
    ) -> SchedulerResult<Option<KnowledgeRecord>>;
    async fn list(&self) -> SchedulerResult<Vec<KnowledgeRecord>>;
    async fn stats(&self) -> SchedulerResult<KnowledgeStats>;
}
