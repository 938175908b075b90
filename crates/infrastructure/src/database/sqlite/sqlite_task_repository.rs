use std::collections::HashMap;

use async_trait::async_trait;
use billing_core::{SchedulerError, SchedulerResult};
use billing_domain::{
    entities::{Task, TaskFilter, TaskSpec, TaskStats, TaskStatus, TaskUpdate},
    repositories::TaskRepository,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation, TaskOperationContext},
    task_context,
};

const TASK_COLUMNS: &str = "id, task_type, entity_id, entity_type, status, priority, attempts, \
     max_attempts, scheduled_for, metadata, result, error, created_at, updated_at, started_at, \
     completed_at";

const TASK_ORDER: &str = " ORDER BY priority DESC, scheduled_for ASC, created_at ASC";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let id: String = row.try_get("id")?;
        let metadata: String = row.try_get("metadata")?;
        let result: Option<String> = row.try_get("result")?;

        Ok(Task {
            id: Uuid::parse_str(&id)
                .map_err(|e| SchedulerError::database_error(format!("无效的任务ID {id}: {e}")))?,
            task_type: row.try_get("task_type")?,
            entity_id: row.try_get("entity_id")?,
            entity_type: row.try_get("entity_type")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            scheduled_for: row.try_get("scheduled_for")?,
            metadata: serde_json::from_str(&metadata)?,
            result: result.as_deref().map(serde_json::from_str).transpose()?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(task_type) = filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type);
        }
        if let Some(entity_id) = &filter.entity_id {
            builder.push(" AND entity_id = ").push_bind(entity_id.clone());
        }
    }

    async fn fetch_task(
        &self,
        id: Uuid,
        context: &TaskOperationContext,
    ) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM billing_tasks WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(context, e))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, spec), fields(
        task_type = %spec.task_type,
        entity_id = %spec.entity_id,
    ))]
    async fn create(&self, spec: &TaskSpec) -> SchedulerResult<Task> {
        spec.validate()?;

        let task = Task::from_spec(spec, Utc::now());
        let context = task_context!(
            RepositoryOperation::Create,
            task_id = task.id,
            task_type = task.task_type
        );

        let metadata_json = serde_json::to_string(&task.metadata)
            .map_err(|e| RepositoryErrorHelpers::serialization_error(&context, e))?;

        sqlx::query(
            r#"
            INSERT INTO billing_tasks (id, task_type, entity_id, entity_type, status, priority,
                attempts, max_attempts, scheduled_for, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.task_type)
        .bind(&task.entity_id)
        .bind(&task.entity_type)
        .bind(task.status)
        .bind(task.priority)
        .bind(task.attempts)
        .bind(task.max_attempts)
        .bind(task.scheduled_for)
        .bind(metadata_json)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        RepositoryErrorHelpers::log_operation_success(
            &context,
            Some(&format!("实体: {}/{}", task.entity_type, task.entity_id)),
        );
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        let context = task_context!(RepositoryOperation::Read, task_id = id);
        let task = self.fetch_task(id, &context).await?;
        if task.is_none() {
            debug!("查询任务不存在: ID {}", id);
        }
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let context = task_context!(RepositoryOperation::Query);

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM billing_tasks"));
        Self::push_filter(&mut builder, filter);
        builder.push(TASK_ORDER);

        // SQLite 的 OFFSET 必须跟在 LIMIT 后面
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                builder.push(" LIMIT ").push_bind(limit);
                builder.push(" OFFSET ").push_bind(offset.unwrap_or(0));
            }
            (None, Some(offset)) => {
                builder.push(" LIMIT -1 OFFSET ").push_bind(offset);
            }
            (None, None) => {}
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn count(&self, filter: &TaskFilter) -> SchedulerResult<i64> {
        let context = task_context!(RepositoryOperation::Query);

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM billing_tasks");
        Self::push_filter(&mut builder, filter);

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        Ok(row.try_get("count")?)
    }

    #[instrument(skip(self, update), fields(task_id = %id, status = ?update.status))]
    async fn update(&self, id: Uuid, update: &TaskUpdate) -> SchedulerResult<Task> {
        let context = task_context!(RepositoryOperation::Update, task_id = id);

        let mut task = self
            .fetch_task(id, &context)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        update.check_transition(&task)?;
        update.apply_to(&mut task, Utc::now());

        let metadata_json = serde_json::to_string(&task.metadata)
            .map_err(|e| RepositoryErrorHelpers::serialization_error(&context, e))?;
        let result_json = task
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryErrorHelpers::serialization_error(&context, e))?;

        let outcome = sqlx::query(
            r#"
            UPDATE billing_tasks
            SET status = ?, priority = ?, attempts = ?, max_attempts = ?, scheduled_for = ?,
                metadata = ?, result = ?, error = ?, updated_at = ?, started_at = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.status)
        .bind(task.priority)
        .bind(task.attempts)
        .bind(task.max_attempts)
        .bind(task.scheduled_for)
        .bind(metadata_json)
        .bind(result_json)
        .bind(&task.error)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        // 读取与写入之间被删除
        if outcome.rows_affected() == 0 {
            return Err(SchedulerError::task_not_found(id));
        }

        RepositoryErrorHelpers::log_operation_success(
            &context.with_task_type(task.task_type),
            Some(&format!("状态: {}", task.status)),
        );
        Ok(task)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let context = task_context!(RepositoryOperation::Delete, task_id = id);

        let outcome = sqlx::query("DELETE FROM billing_tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let deleted = outcome.rows_affected() > 0;
        if deleted {
            RepositoryErrorHelpers::log_operation_success(&context, None);
        }
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn count_by_status(&self) -> SchedulerResult<TaskStats> {
        let context = task_context!(RepositoryOperation::Query)
            .with_additional_info("按状态统计".to_string());

        let rows =
            sqlx::query("SELECT status, COUNT(*) AS count FROM billing_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let mut counts: HashMap<TaskStatus, i64> = HashMap::new();
        for row in rows {
            counts.insert(row.try_get("status")?, row.try_get("count")?);
        }
        Ok(TaskStats::from_counts(&counts))
    }

    #[instrument(skip(self))]
    async fn find_eligible(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let context = task_context!(RepositoryOperation::Query);

        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM billing_tasks \
             WHERE status IN (?, ?) AND scheduled_for <= ?{TASK_ORDER}"
        ))
        .bind(TaskStatus::Pending)
        .bind(TaskStatus::Retrying)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;
        debug!("找到 {} 个可执行任务", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn recover_interrupted(&self, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let context = task_context!(RepositoryOperation::Recover);

        let outcome = sqlx::query(
            "UPDATE billing_tasks SET status = ?, scheduled_for = ?, updated_at = ? WHERE status = ?",
        )
        .bind(TaskStatus::Retrying)
        .bind(now)
        .bind(now)
        .bind(TaskStatus::Running)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let recovered = outcome.rows_affected();
        if recovered > 0 {
            info!("恢复了 {} 个中断时处于RUNNING状态的任务", recovered);
        }
        Ok(recovered)
    }
}
