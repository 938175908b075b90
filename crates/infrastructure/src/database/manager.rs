use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use billing_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::migrations::run_migrations;

/// SQLite 连接池与迁移
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true);

        // 内存库每个连接都是独立的数据库，连接一旦回收数据即丢失
        let memory = is_memory_url(&config.url);
        if !memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let max_connections = if memory { 1 } else { config.max_connections };
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        pool_options = if memory {
            pool_options.idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("连接SQLite数据库失败")?;

        info!(url = %config.url, max_connections, "数据库连接池已创建");
        Ok(Self { pool })
    }

    /// 单连接的内存数据库，已完成迁移
    pub async fn in_memory() -> Result<Self> {
        let manager = Self::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connection_timeout_seconds: 5,
            idle_timeout_seconds: 600,
        })
        .await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        run_migrations(&self.pool)
            .await
            .context("执行数据库迁移失败")
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
