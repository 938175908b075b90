use serde::{Deserialize, Serialize};

/// 调度代理运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 队列空闲时的轮询间隔
    pub poll_interval_ms: u64,
    /// 从存储重新加载待执行任务的周期，0 表示关闭
    pub rescan_interval_seconds: u64,
    pub default_max_attempts: i32,
    /// 持久化错误信息的最大长度
    pub max_error_length: usize,
    /// 关闭时等待当前任务结束的最长时间
    pub shutdown_timeout_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            rescan_interval_seconds: 30,
            default_max_attempts: 5,
            max_error_length: 1000,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.default_max_attempts < 1 {
            return Err(anyhow::anyhow!("默认最大尝试次数必须至少为1"));
        }

        if self.max_error_length == 0 {
            return Err(anyhow::anyhow!("错误信息最大长度必须大于0"));
        }

        Ok(())
    }
}
