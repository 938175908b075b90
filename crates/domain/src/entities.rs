use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use billing_core::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::UpdateValue;

/// 未指定时的最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// 没有具体对手方时知识记录使用的通用桶
pub const GENERIC_COUNTERPART: &str = "GENERIC";

/// 计费任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub entity_id: String,
    pub entity_type: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_for: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// 按创建请求构造新任务
    pub fn from_spec(spec: &TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: spec.task_type,
            entity_id: spec.entity_id.clone(),
            entity_type: spec.entity_type.clone(),
            status: TaskStatus::Pending,
            priority: spec.priority,
            attempts: 0,
            max_attempts: spec.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            scheduled_for: spec.scheduled_for.unwrap_or(now),
            metadata: spec.metadata.clone(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// 是否可以进入内存队列
    pub fn is_queueable(&self) -> bool {
        self.status.is_queueable()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 任务类型，固定的闭合集合
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    CreateClaim,
    CheckEligibility,
    GenerateEdi,
    SubmitClaim,
    CheckStatus,
    FileAppeal,
}

impl TaskType {
    pub const COUNT: usize = 6;

    pub const ALL: [TaskType; Self::COUNT] = [
        TaskType::CreateClaim,
        TaskType::CheckEligibility,
        TaskType::GenerateEdi,
        TaskType::SubmitClaim,
        TaskType::CheckStatus,
        TaskType::FileAppeal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CreateClaim => "CREATE_CLAIM",
            TaskType::CheckEligibility => "CHECK_ELIGIBILITY",
            TaskType::GenerateEdi => "GENERATE_EDI",
            TaskType::SubmitClaim => "SUBMIT_CLAIM",
            TaskType::CheckStatus => "CHECK_STATUS",
            TaskType::FileAppeal => "FILE_APPEAL",
        }
    }

    /// URL 路径片段，例如 `check-eligibility`
    pub fn slug(&self) -> String {
        self.as_str().to_lowercase().replace('_', "-")
    }

    /// 在 `ALL` 中的下标，供定长处理器表使用
    pub fn index(&self) -> usize {
        match self {
            TaskType::CreateClaim => 0,
            TaskType::CheckEligibility => 1,
            TaskType::GenerateEdi => 2,
            TaskType::SubmitClaim => 3,
            TaskType::CheckStatus => 4,
            TaskType::FileAppeal => 5,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        TaskType::ALL
            .iter()
            .copied()
            .find(|task_type| task_type.as_str() == normalized)
            .ok_or_else(|| SchedulerError::validation_error(format!("未知的任务类型: {s}")))
    }
}

/// 任务状态
///
/// PENDING → RUNNING → {COMPLETED | RETRYING | FAILED}，RETRYING 到期后再次进入 RUNNING。
/// FAILED 只能经由人工重试回到 PENDING。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Scheduled,
        TaskStatus::Running,
        TaskStatus::Retrying,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn is_queueable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }

    /// 状态机允许的迁移
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Pending, Running)
                | (Scheduled, Pending)
                | (Scheduled, Running)
                | (Retrying, Running)
                | (Running, Completed)
                | (Running, Retrying)
                | (Running, Failed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        TaskStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| SchedulerError::validation_error(format!("未知的任务状态: {s}")))
    }
}

/// 创建任务的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub task_type: TaskType,
    pub entity_id: String,
    pub entity_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TaskSpec {
    pub fn new<E: Into<String>, T: Into<String>>(
        task_type: TaskType,
        entity_id: E,
        entity_type: T,
    ) -> Self {
        Self {
            task_type,
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            priority: 0,
            max_attempts: None,
            scheduled_for: None,
            metadata: empty_metadata(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_scheduled_for(mut self, scheduled_for: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(scheduled_for);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// 必填字段检查
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.entity_id.trim().is_empty() {
            return Err(SchedulerError::validation_error("entityId 不能为空"));
        }
        if self.entity_type.trim().is_empty() {
            return Err(SchedulerError::validation_error("entityType 不能为空"));
        }
        if let Some(max_attempts) = self.max_attempts {
            if max_attempts < 1 {
                return Err(SchedulerError::validation_error(format!(
                    "maxAttempts 必须至少为1，当前为 {max_attempts}"
                )));
            }
        }
        if !self.metadata.is_object() && !self.metadata.is_null() {
            return Err(SchedulerError::validation_error("metadata 必须是JSON对象"));
        }
        Ok(())
    }
}

/// 任务的部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub priority: Option<i32>,
    pub attempts: Option<i32>,
    pub max_attempts: Option<i32>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub result: UpdateValue<serde_json::Value>,
    pub error: UpdateValue<String>,
    pub started_at: UpdateValue<DateTime<Utc>>,
    pub completed_at: UpdateValue<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskUpdate::default()
    }

    /// 状态只能沿状态机前进，状态不变的更新总是允许
    pub fn check_transition(&self, task: &Task) -> SchedulerResult<()> {
        match self.status {
            Some(next) if next != task.status && !task.status.can_transition_to(next) => Err(
                SchedulerError::invalid_state(task.id, task.status, format!("迁移到 {next}")),
            ),
            _ => Ok(()),
        }
    }

    /// 把更新合并到任务上，`attempts` 始终不超过 `max_attempts`
    pub fn apply_to(&self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(max_attempts) = self.max_attempts {
            task.max_attempts = max_attempts.max(1);
        }
        if let Some(attempts) = self.attempts {
            task.attempts = attempts.max(0);
        }
        task.attempts = task.attempts.min(task.max_attempts);
        if let Some(scheduled_for) = self.scheduled_for {
            task.scheduled_for = scheduled_for;
        }
        if let Some(metadata) = &self.metadata {
            task.metadata = metadata.clone();
        }
        task.result = self.result.clone().apply_to(task.result.take());
        task.error = self.error.clone().apply_to(task.error.take());
        task.started_at = self.started_at.clone().apply_to(task.started_at);
        task.completed_at = self.completed_at.clone().apply_to(task.completed_at);
        task.updated_at = now;
    }
}

/// 任务查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub entity_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn paginate(mut self, limit: Option<i64>, offset: Option<i64>) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
            && self.task_type.map_or(true, |task_type| task.task_type == task_type)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |entity_id| task.entity_id == entity_id)
    }
}

/// 按状态统计的任务数量
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub pending: i64,
    pub scheduled: i64,
    pub running: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
}

impl TaskStats {
    pub fn from_counts(counts: &HashMap<TaskStatus, i64>) -> Self {
        let mut stats = TaskStats::default();
        for (status, count) in counts {
            stats.add(*status, *count);
        }
        stats
    }

    pub fn add(&mut self, status: TaskStatus, count: i64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Scheduled => self.scheduled += count,
            TaskStatus::Running => self.running += count,
            TaskStatus::Retrying => self.retrying += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.scheduled + self.running + self.retrying + self.completed + self.failed
    }
}

/// 按 (类别, 对手方) 聚合的成败计数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeRecord {
    pub id: i64,
    pub category: String,
    pub counterpart_id: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub pattern: serde_json::Value,
    pub last_updated: DateTime<Utc>,
}

impl KnowledgeRecord {
    pub fn success_rate(&self) -> Option<f64> {
        success_rate(self.success_count, self.failure_count)
    }
}

/// 知识库汇总
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeStats {
    pub total_patterns: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub success_rate: Option<f64>,
}

impl KnowledgeStats {
    pub fn from_totals(total_patterns: i64, success_count: i64, failure_count: i64) -> Self {
        Self {
            total_patterns,
            success_count,
            failure_count,
            success_rate: success_rate(success_count, failure_count),
        }
    }
}

fn success_rate(success: i64, failure: i64) -> Option<f64> {
    let total = success + failure;
    if total <= 0 {
        None
    } else {
        Some(success as f64 / total as f64)
    }
}
