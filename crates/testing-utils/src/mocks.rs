//! 仓储 trait 的内存实现，供不需要真实数据库的测试使用

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use billing_core::{SchedulerError, SchedulerResult};
use billing_domain::{
    KnowledgeRecord, KnowledgeRepository, KnowledgeStats, Task, TaskFilter, TaskRepository,
    TaskSpec, TaskStats, TaskStatus, TaskUpdate,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 内存任务仓储
///
/// 可以注入写失败，并记录任意时刻观察到的 RUNNING 任务数的最大值。
#[derive(Debug, Clone, Default)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<Uuid, Task>>>,
    fail_updates: Arc<AtomicBool>,
    max_running: Arc<AtomicUsize>,
    update_count: Arc<AtomicUsize>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.tasks.lock().unwrap();
            for task in tasks {
                map.insert(task.id, task);
            }
        }
        repo
    }

    /// 之后的 `update` 调用返回数据库错误
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn max_running_observed(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }

    /// 绕过调度代理直接写入，模拟外部写入方
    pub fn insert_raw(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_for.cmp(&b.scheduled_for))
                .then(a.created_at.cmp(&b.created_at))
        });
        tasks
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, spec: &TaskSpec) -> SchedulerResult<Task> {
        spec.validate()?;
        let task = Task::from_spec(spec, Utc::now());
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let tasks: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(Self::sorted(tasks)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count(&self, filter: &TaskFilter) -> SchedulerResult<i64> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| filter.matches(task))
            .count() as i64)
    }

    async fn update(&self, id: Uuid, update: &TaskUpdate) -> SchedulerResult<Task> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SchedulerError::database_error("模拟的数据库写入失败"));
        }

        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        update.check_transition(task)?;
        update.apply_to(task, Utc::now());
        let updated = task.clone();

        let running = tasks
            .values()
            .filter(|task| task.status == TaskStatus::Running)
            .count();
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.update_count.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        Ok(self.tasks.lock().unwrap().remove(&id).is_some())
    }

    async fn count_by_status(&self) -> SchedulerResult<TaskStats> {
        let mut stats = TaskStats::default();
        for task in self.tasks.lock().unwrap().values() {
            stats.add(task.status, 1);
        }
        Ok(stats)
    }

    async fn find_eligible(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let tasks: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| task.is_queueable() && task.is_due(now))
            .cloned()
            .collect();
        Ok(Self::sorted(tasks))
    }

    async fn recover_interrupted(&self, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let mut recovered = 0;
        for task in self.tasks.lock().unwrap().values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Retrying;
                task.scheduled_for = now;
                task.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

/// 内存知识仓储
#[derive(Debug, Clone, Default)]
pub struct MockKnowledgeRepository {
    records: Arc<Mutex<HashMap<(String, String), KnowledgeRecord>>>,
}

impl MockKnowledgeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert<F>(&self, category: &str, counterpart_id: &str, apply: F) -> KnowledgeRecord
    where
        F: FnOnce(&mut KnowledgeRecord),
    {
        let mut records = self.records.lock().unwrap();
        let next_id = records.len() as i64 + 1;
        let record = records
            .entry((category.to_string(), counterpart_id.to_string()))
            .or_insert_with(|| KnowledgeRecord {
                id: next_id,
                category: category.to_string(),
                counterpart_id: counterpart_id.to_string(),
                success_count: 0,
                failure_count: 0,
                pattern: serde_json::json!({}),
                last_updated: Utc::now(),
            });
        apply(record);
        record.last_updated = Utc::now();
        record.clone()
    }
}

#[async_trait]
impl KnowledgeRepository for MockKnowledgeRepository {
    async fn record_success(
        &self,
        category: &str,
        counterpart_id: &str,
    ) -> SchedulerResult<KnowledgeRecord> {
        Ok(self.upsert(category, counterpart_id, |record| {
            record.success_count += 1;
        }))
    }

    async fn record_failure(
        &self,
        category: &str,
        counterpart_id: &str,
        pattern: &serde_json::Value,
    ) -> SchedulerResult<KnowledgeRecord> {
        Ok(self.upsert(category, counterpart_id, |record| {
            record.failure_count += 1;
            if let (Some(existing), Some(patch)) =
                (record.pattern.as_object_mut(), pattern.as_object())
            {
                for (key, value) in patch {
                    existing.insert(key.clone(), value.clone());
                }
            } else {
                record.pattern = pattern.clone();
            }
        }))
    }

    async fn get(
        &self,
        category: &str,
        counterpart_id: &str,
    ) -> SchedulerResult<Option<KnowledgeRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(category.to_string(), counterpart_id.to_string()))
            .cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<KnowledgeRecord>> {
        let mut records: Vec<KnowledgeRecord> =
            self.records.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| {
            (a.category.as_str(), a.counterpart_id.as_str())
                .cmp(&(b.category.as_str(), b.counterpart_id.as_str()))
        });
        Ok(records)
    }

    async fn stats(&self) -> SchedulerResult<KnowledgeStats> {
        let records = self.records.lock().unwrap();
        let successes = records.values().map(|r| r.success_count).sum();
        let failures = records.values().map(|r| r.failure_count).sum();
        Ok(KnowledgeStats::from_totals(
            records.len() as i64,
            successes,
            failures,
        ))
    }
}
