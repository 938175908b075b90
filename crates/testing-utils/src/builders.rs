//! 测试数据构造器

use billing_domain::{Task, TaskSpec, TaskStatus, TaskType};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 直接构造 `Task`，用于预置仓储数据
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::from_spec(
                &TaskSpec::new(TaskType::CheckEligibility, "claim-test", "CLAIM"),
                Utc::now(),
            ),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn with_entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.task.entity_type = entity_type.to_string();
        self.task.entity_id = entity_id.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_attempts(mut self, attempts: i32, max_attempts: i32) -> Self {
        self.task.attempts = attempts;
        self.task.max_attempts = max_attempts;
        self
    }

    pub fn with_scheduled_for(mut self, scheduled_for: DateTime<Utc>) -> Self {
        self.task.scheduled_for = scheduled_for;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.task.error = Some(error.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.task.metadata = metadata;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构造创建请求
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            spec: TaskSpec::new(task_type, format!("claim-{}", Uuid::new_v4()), "CLAIM"),
        }
    }

    pub fn eligibility() -> Self {
        Self::new(TaskType::CheckEligibility)
    }

    pub fn with_entity_id(mut self, entity_id: &str) -> Self {
        self.spec.entity_id = entity_id.to_string();
        self
    }

    pub fn with_entity_type(mut self, entity_type: &str) -> Self {
        self.spec.entity_type = entity_type.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.spec.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.spec.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_scheduled_for(mut self, scheduled_for: DateTime<Utc>) -> Self {
        self.spec.scheduled_for = Some(scheduled_for);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.spec.metadata = metadata;
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}
