use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{AgentConfig, DatabaseConfig, ProcessorsConfig, RetryConfig};
use crate::logging::LogConfig;

/// 计费代理完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub processors: ProcessorsConfig,
    pub logging: LogConfig,
}

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/billing.toml",
    "billing.toml",
    "/etc/billing-agent/config.toml",
];

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 内置默认值
    /// 2. 配置文件 (TOML)，未指定时依次尝试默认路径
    /// 3. 环境变量覆盖 (前缀 BILLING_，层级分隔符 __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Self::with_defaults(Config::builder())?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("BILLING")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    fn with_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>> {
        let defaults = AppConfig::default();
        let builder = builder
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default("database.min_connections", defaults.database.min_connections)?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds,
            )?
            .set_default(
                "database.idle_timeout_seconds",
                defaults.database.idle_timeout_seconds,
            )?
            .set_default("agent.poll_interval_ms", defaults.agent.poll_interval_ms)?
            .set_default(
                "agent.rescan_interval_seconds",
                defaults.agent.rescan_interval_seconds,
            )?
            .set_default(
                "agent.default_max_attempts",
                defaults.agent.default_max_attempts,
            )?
            .set_default(
                "agent.max_error_length",
                defaults.agent.max_error_length as u64,
            )?
            .set_default(
                "agent.shutdown_timeout_seconds",
                defaults.agent.shutdown_timeout_seconds,
            )?
            .set_default("retry.base_delay_ms", defaults.retry.base_delay_ms)?
            .set_default("retry.max_delay_ms", defaults.retry.max_delay_ms)?
            .set_default("retry.backoff_multiplier", defaults.retry.backoff_multiplier)?
            .set_default("retry.jitter_factor", defaults.retry.jitter_factor)?
            .set_default("processors.base_url", defaults.processors.base_url)?
            .set_default(
                "processors.request_timeout_seconds",
                defaults.processors.request_timeout_seconds,
            )?
            .set_default("logging.level", defaults.logging.level.as_str().to_lowercase())?
            .set_default("logging.format", defaults.logging.format.as_str())?;
        Ok(builder)
    }

    /// 从TOML字符串加载配置，缺省字段使用默认值
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = Self::with_defaults(Config::builder())?
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .build()
            .context("解析TOML配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.agent.validate().context("调度代理配置验证失败")?;
        self.retry.validate().context("重试配置验证失败")?;
        self.processors.validate().context("处理服务配置验证失败")?;
        Ok(())
    }
}
