use async_trait::async_trait;
use billing_core::SchedulerResult;
use billing_domain::{
    entities::{KnowledgeRecord, KnowledgeStats},
    repositories::KnowledgeRepository,
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::instrument;

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    knowledge_context,
};

const KNOWLEDGE_COLUMNS: &str =
    "id, category, counterpart_id, success_count, failure_count, pattern, last_updated";

pub struct SqliteKnowledgeRepository {
    pool: SqlitePool,
}

impl SqliteKnowledgeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> SchedulerResult<KnowledgeRecord> {
        let pattern: String = row.try_get("pattern")?;
        Ok(KnowledgeRecord {
            id: row.try_get("id")?,
            category: row.try_get("category")?,
            counterpart_id: row.try_get("counterpart_id")?,
            success_count: row.try_get("success_count")?,
            failure_count: row.try_get("failure_count")?,
            pattern: serde_json::from_str(&pattern)?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

#[async_trait]
impl KnowledgeRepository for SqliteKnowledgeRepository {
    #[instrument(skip(self))]
    async fn record_success(
        &self,
        category: &str,
        counterpart_id: &str,
    ) -> SchedulerResult<KnowledgeRecord> {
        let context = knowledge_context!(RepositoryOperation::Upsert, category, counterpart_id);

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO billing_knowledge (category, counterpart_id, success_count, failure_count, pattern, last_updated)
            VALUES (?, ?, 1, 0, '{{}}', ?)
            ON CONFLICT (category, counterpart_id) DO UPDATE SET
                success_count = success_count + 1,
                last_updated = excluded.last_updated
            RETURNING {KNOWLEDGE_COLUMNS}
            "#
        ))
        .bind(category)
        .bind(counterpart_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        Self::row_to_record(&row)
    }

    #[instrument(skip(self, pattern))]
    async fn record_failure(
        &self,
        category: &str,
        counterpart_id: &str,
        pattern: &serde_json::Value,
    ) -> SchedulerResult<KnowledgeRecord> {
        let context = knowledge_context!(RepositoryOperation::Upsert, category, counterpart_id);

        let pattern_json = serde_json::to_string(pattern)
            .map_err(|e| RepositoryErrorHelpers::serialization_error(&context, e))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO billing_knowledge (category, counterpart_id, success_count, failure_count, pattern, last_updated)
            VALUES (?, ?, 0, 1, ?, ?)
            ON CONFLICT (category, counterpart_id) DO UPDATE SET
                failure_count = failure_count + 1,
                pattern = json_patch(pattern, excluded.pattern),
                last_updated = excluded.last_updated
            RETURNING {KNOWLEDGE_COLUMNS}
            "#
        ))
        .bind(category)
        .bind(counterpart_id)
        .bind(pattern_json)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        Self::row_to_record(&row)
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        category: &str,
        counterpart_id: &str,
    ) -> SchedulerResult<Option<KnowledgeRecord>> {
        let context = knowledge_context!(RepositoryOperation::Read, category, counterpart_id);

        let row = sqlx::query(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM billing_knowledge WHERE category = ? AND counterpart_id = ?"
        ))
        .bind(category)
        .bind(counterpart_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> SchedulerResult<Vec<KnowledgeRecord>> {
        let context = knowledge_context!(RepositoryOperation::Query);

        let rows = sqlx::query(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM billing_knowledge ORDER BY category, counterpart_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn stats(&self) -> SchedulerResult<KnowledgeStats> {
        let context = knowledge_context!(RepositoryOperation::Query);

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(success_count), 0) AS successes,
                   COALESCE(SUM(failure_count), 0) AS failures
            FROM billing_knowledge
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        Ok(KnowledgeStats::from_totals(
            row.try_get("total")?,
            row.try_get("successes")?,
            row.try_get("failures")?,
        ))
    }
}
