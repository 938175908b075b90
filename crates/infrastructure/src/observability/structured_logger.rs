//! 结构化事件日志
//!
//! 调度循环和控制面在关键状态迁移处输出带固定字段的事件，便于按 `event` 字段检索。

use billing_domain::Task;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_created(task: &Task) {
        info!(
            event = "task_created",
            task.id = %task.id,
            task.type = task.task_type.as_str(),
            task.entity_id = %task.entity_id,
            task.entity_type = %task.entity_type,
            task.priority = task.priority,
            task.scheduled_for = %task.scheduled_for,
            "Task created"
        );
    }

    pub fn log_task_started(task: &Task) {
        info!(
            event = "task_started",
            task.id = %task.id,
            task.type = task.task_type.as_str(),
            task.attempt = task.attempts + 1,
            task.max_attempts = task.max_attempts,
            "Task execution started"
        );
    }

    pub fn log_task_completed(task: &Task, duration_ms: u64) {
        info!(
            event = "task_completed",
            task.id = %task.id,
            task.type = task.task_type.as_str(),
            task.duration_ms = duration_ms,
            "Task execution completed successfully"
        );
    }

    pub fn log_task_retry_scheduled(
        task: &Task,
        attempts: i32,
        next_run: DateTime<Utc>,
        reason: &str,
    ) {
        warn!(
            event = "task_retry_scheduled",
            task.id = %task.id,
            task.type = task.task_type.as_str(),
            task.attempts = attempts,
            task.max_attempts = task.max_attempts,
            task.next_run = %next_run,
            task.retry_reason = reason,
            "Task retry scheduled"
        );
    }

    pub fn log_task_failed(task: &Task, attempts: i32, reason: &str) {
        error!(
            event = "task_failed",
            task.id = %task.id,
            task.type = task.task_type.as_str(),
            task.attempts = attempts,
            task.error = reason,
            "Task failed permanently"
        );
    }

    pub fn log_task_skipped(task_id: &uuid::Uuid, reason: &str) {
        debug!(
            event = "task_skipped",
            task.id = %task_id,
            reason = reason,
            "Queued task skipped at dispatch"
        );
    }

    pub fn log_agent_started(queue_length: usize, recovered: u64) {
        info!(
            event = "agent_started",
            agent.queue_length = queue_length,
            agent.recovered = recovered,
            "Billing agent started"
        );
    }

    pub fn log_agent_stopped(queue_length: usize) {
        info!(
            event = "agent_stopped",
            agent.queue_length = queue_length,
            "Billing agent stopped"
        );
    }

    pub fn log_queue_reloaded(loaded: usize, queue_length: usize) {
        debug!(
            event = "queue_reloaded",
            queue.loaded = loaded,
            queue.length = queue_length,
            "Eligible tasks reloaded from store"
        );
    }

    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}
