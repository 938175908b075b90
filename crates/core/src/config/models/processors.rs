use serde::{Deserialize, Serialize};

/// 外部处理服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorsConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/billing".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ProcessorsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!("处理服务地址必须以http://或https://开头"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        Ok(())
    }
}
