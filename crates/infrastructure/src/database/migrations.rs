use sqlx::SqlitePool;
use tracing::debug;

const CREATE_TASKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS billing_tasks (
    id TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 5,
    scheduled_for DATETIME NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    result TEXT,
    error TEXT,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    started_at DATETIME,
    completed_at DATETIME,
    CHECK (attempts >= 0 AND attempts <= max_attempts)
)
"#;

const CREATE_KNOWLEDGE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS billing_knowledge (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    counterpart_id TEXT NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    pattern TEXT NOT NULL DEFAULT '{}',
    last_updated DATETIME NOT NULL,
    UNIQUE (category, counterpart_id)
)
"#;

const INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_billing_tasks_status_scheduled ON billing_tasks(status, scheduled_for)",
    "CREATE INDEX IF NOT EXISTS idx_billing_tasks_priority_scheduled ON billing_tasks(priority DESC, scheduled_for ASC)",
    "CREATE INDEX IF NOT EXISTS idx_billing_tasks_entity ON billing_tasks(entity_type, entity_id)",
];

/// 建表与索引，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    debug!("运行SQLite数据库迁移");

    sqlx::query(CREATE_TASKS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_KNOWLEDGE_TABLE).execute(pool).await?;

    for index_sql in INDEXES {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("SQLite数据库迁移完成");
    Ok(())
}
