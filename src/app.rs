use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use billing_core::AppConfig;
use billing_domain::TaskProcessor;
use billing_infrastructure::{DatabaseManager, SqliteKnowledgeRepository, SqliteTaskRepository};
use billing_scheduler::{BillingAgent, ProcessorRegistry, RetryPolicy};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::processors::HttpStageProcessor;

/// 主应用程序
///
/// 进程内唯一的调度代理在这里构造，之后以 `Arc` 交给需要它的调用方。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    agent: Arc<BillingAgent>,
}

impl Application {
    /// 使用 HTTP 阶段处理器覆盖全部任务类型
    pub async fn new(config: AppConfig) -> Result<Self> {
        let processor: Arc<dyn TaskProcessor> = Arc::new(
            HttpStageProcessor::new(&config.processors).context("创建阶段处理器失败")?,
        );
        let registry = ProcessorRegistry::exhaustive(|_| Arc::clone(&processor));
        Self::with_processors(config, registry).await
    }

    pub async fn with_processors(config: AppConfig, processors: ProcessorRegistry) -> Result<Self> {
        info!("初始化应用程序，数据库: {}", config.database.url);

        let database = DatabaseManager::new(&config.database).await?;
        database.migrate().await?;

        let tasks = Arc::new(SqliteTaskRepository::new(database.pool().clone()));
        let knowledge = Arc::new(SqliteKnowledgeRepository::new(database.pool().clone()));

        let agent = Arc::new(BillingAgent::new(
            tasks,
            knowledge,
            processors,
            config.agent.clone(),
            RetryPolicy::from_config(&config.retry),
        ));

        Ok(Self {
            config,
            database,
            agent,
        })
    }

    pub fn agent(&self) -> Arc<BillingAgent> {
        Arc::clone(&self.agent)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 启动调度代理并阻塞到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.agent.start().await.context("启动调度代理失败")?;
        info!("计费调度代理已启动");

        let _ = shutdown_rx.recv().await;
        self.shutdown().await
    }

    /// 等待当前任务结束后停止代理，超时则放弃等待
    pub async fn shutdown(&self) -> Result<()> {
        let grace = Duration::from_secs(self.config.agent.shutdown_timeout_seconds);
        match tokio::time::timeout(grace, self.agent.stop()).await {
            Ok(result) => result.context("停止调度代理失败")?,
            Err(_) => warn!(
                "等待当前任务完成超时（{}秒），RUNNING状态的任务将在下次启动时恢复",
                grace.as_secs()
            ),
        }

        self.database.close().await;
        info!("应用已关闭");
        Ok(())
    }
}
