//! 通过 HTTP 把任务转交给外部计费服务的处理器

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use billing_core::config::ProcessorsConfig;
use billing_domain::{ProcessorError, Task, TaskOutput, TaskProcessor, TaskType};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// 响应体写入错误信息时保留的最大字符数
const MAX_BODY_IN_ERROR: usize = 200;

/// 把任务 POST 到 `{base_url}/{task-type-slug}`
///
/// 请求体携带任务标识和元数据，响应体按 `TaskOutput` 解析，
/// 解析不成时保留原始 JSON。
#[derive(Debug, Clone)]
pub struct HttpStageProcessor {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StageRequest<'a> {
    task_id: String,
    task_type: TaskType,
    entity_id: &'a str,
    entity_type: &'a str,
    attempts: i32,
    metadata: &'a serde_json::Value,
}

impl<'a> From<&'a Task> for StageRequest<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            task_id: task.id.to_string(),
            task_type: task.task_type,
            entity_id: &task.entity_id,
            entity_type: &task.entity_type,
            attempts: task.attempts,
            metadata: &task.metadata,
        }
    }
}

impl HttpStageProcessor {
    pub fn new(config: &ProcessorsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("创建HTTP客户端失败")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, task_type: TaskType) -> String {
        format!("{}/{}", self.base_url, task_type.slug())
    }
}

#[async_trait]
impl TaskProcessor for HttpStageProcessor {
    async fn process(&self, task: &Task) -> Result<TaskOutput, ProcessorError> {
        let url = self.endpoint(task.task_type);
        debug!(task_id = %task.id, url = %url, "转发任务到计费服务");

        let response = self
            .client
            .post(&url)
            .json(&StageRequest::from(task))
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(classify_send_error)?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let snippet: String = text.chars().take(MAX_BODY_IN_ERROR).collect();
            return Err(ProcessorError::Http(format!("{status}: {snippet}")));
        }

        parse_output(&body)
    }

    fn name(&self) -> &str {
        "http-stage"
    }
}

fn classify_send_error(err: reqwest::Error) -> ProcessorError {
    if err.is_timeout() {
        ProcessorError::Timeout(err.to_string())
    } else {
        ProcessorError::Http(err.to_string())
    }
}

/// 空响应视为无结果；非 JSON 响应按失败处理
pub(crate) fn parse_output(body: &[u8]) -> Result<TaskOutput, ProcessorError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TaskOutput::raw(serde_json::Value::Null));
    }

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProcessorError::failed(format!("计费服务返回了无效的JSON: {e}")))?;

    Ok(serde_json::from_value::<TaskOutput>(value.clone()).unwrap_or(TaskOutput::Raw(value)))
}
