//! 供 API 层、命令行等外部调用方使用的控制面

use billing_core::{SchedulerError, SchedulerResult};
use billing_domain::{
    KnowledgeRecord, KnowledgeStats, Task, TaskFilter, TaskSpec, TaskStats, TaskStatus,
    TaskUpdate, UpdateValue,
};
use billing_infrastructure::StructuredLogger;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::agent::BillingAgent;

/// 调度代理运行状态快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub is_running: bool,
    pub queue_length: usize,
    pub current_task: Option<Uuid>,
    pub task_stats: TaskStats,
    pub knowledge_stats: KnowledgeStats,
}

impl BillingAgent {
    /// 校验并持久化新任务，运行中时立即入队并唤醒处理循环
    #[instrument(skip(self, spec), fields(task_type = %spec.task_type, entity_id = %spec.entity_id))]
    pub async fn create_task(&self, mut spec: TaskSpec) -> SchedulerResult<Task> {
        if spec.max_attempts.is_none() {
            spec.max_attempts = Some(self.core.config.default_max_attempts);
        }
        spec.validate()?;

        let task = self.core.tasks.create(&spec).await?;
        StructuredLogger::log_task_created(&task);

        if self.is_running() {
            self.core.enqueue(&task).await;
        }
        Ok(task)
    }

    /// 人工重试，仅允许 FAILED 状态的任务
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn retry_task(&self, id: Uuid) -> SchedulerResult<Task> {
        let task = self
            .core
            .tasks
            .get_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(id))?;

        if task.status != TaskStatus::Failed {
            return Err(SchedulerError::invalid_state(id, task.status, "retry"));
        }

        let reset = TaskUpdate {
            attempts: Some(0),
            scheduled_for: Some(Utc::now()),
            result: UpdateValue::Unset,
            error: UpdateValue::Unset,
            started_at: UpdateValue::Unset,
            completed_at: UpdateValue::Unset,
            ..TaskUpdate::status(TaskStatus::Pending)
        };
        let task = self.core.tasks.update(id, &reset).await?;
        info!(task_id = %id, "任务已重置为PENDING");

        if self.is_running() {
            self.core.enqueue(&task).await;
        }
        Ok(task)
    }

    /// 同时从内存队列和存储中删除，返回存储中是否存在该任务
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn delete_task(&self, id: Uuid) -> SchedulerResult<bool> {
        self.core.queue.write().await.remove(&id);
        let deleted = self.core.tasks.delete(id).await?;
        if deleted {
            info!(task_id = %id, "任务已删除");
        }
        Ok(deleted)
    }

    /// 重新从存储加载到期任务并唤醒处理循环，返回加载数量
    pub async fn trigger_process_queue(&self) -> SchedulerResult<usize> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        let loaded = self.core.reload_queue().await?;
        self.core.nudge();
        Ok(loaded)
    }

    pub async fn get_status(&self) -> SchedulerResult<AgentStatus> {
        let task_stats = self.core.tasks.count_by_status().await?;
        let knowledge_stats = self.core.knowledge.stats().await?;

        Ok(AgentStatus {
            is_running: self.is_running(),
            queue_length: self.queue_size().await,
            current_task: self.current_task().await,
            task_stats,
            knowledge_stats,
        })
    }

    pub async fn get_task_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        self.core.tasks.get_by_id(id).await
    }

    pub async fn get_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> SchedulerResult<Vec<Task>> {
        let filter = TaskFilter {
            status,
            ..Default::default()
        }
        .paginate(limit, offset);
        self.core.tasks.list(&filter).await
    }

    pub async fn list_knowledge(&self) -> SchedulerResult<Vec<KnowledgeRecord>> {
        self.core.knowledge.list().await
    }
}
