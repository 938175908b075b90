//! 测试用任务处理器

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use billing_domain::{ProcessorError, Task, TaskOutput, TaskProcessor};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

/// 总是成功并返回固定输出
#[derive(Debug, Clone)]
pub struct SucceedingProcessor {
    output: TaskOutput,
    calls: Arc<AtomicUsize>,
}

impl SucceedingProcessor {
    pub fn new() -> Self {
        Self::with_output(TaskOutput::raw(serde_json::json!({"ok": true})))
    }

    pub fn with_output(output: TaskOutput) -> Self {
        Self {
            output,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for SucceedingProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskProcessor for SucceedingProcessor {
    async fn process(&self, _task: &Task) -> Result<TaskOutput, ProcessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }

    fn name(&self) -> &str {
        "succeeding"
    }
}

/// 总是以给定消息失败
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FailingProcessor {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProcessor for FailingProcessor {
    async fn process(&self, _task: &Task) -> Result<TaskOutput, ProcessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProcessorError::failed(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// 前 N 次调用失败，之后成功
#[derive(Debug, Clone)]
pub struct FlakyProcessor {
    failures: usize,
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FlakyProcessor {
    pub fn new<S: Into<String>>(failures: usize, message: S) -> Self {
        Self {
            failures,
            message: message.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProcessor for FlakyProcessor {
    async fn process(&self, _task: &Task) -> Result<TaskOutput, ProcessorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ProcessorError::failed(self.message.clone()))
        } else {
            Ok(TaskOutput::raw(serde_json::json!({"attempt": call + 1})))
        }
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// 记录执行顺序并统计并发度
#[derive(Debug, Clone, Default)]
pub struct RecordingProcessor {
    delay: Option<Duration>,
    order: Arc<Mutex<Vec<Uuid>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn order(&self) -> Vec<Uuid> {
        self.order.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProcessor for RecordingProcessor {
    async fn process(&self, task: &Task) -> Result<TaskOutput, ProcessorError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.order.lock().unwrap().push(task.id);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TaskOutput::raw(serde_json::json!({"entityId": task.entity_id})))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// 处理时直接 panic
#[derive(Debug, Clone, Default)]
pub struct PanickingProcessor;

#[async_trait]
impl TaskProcessor for PanickingProcessor {
    async fn process(&self, task: &Task) -> Result<TaskOutput, ProcessorError> {
        panic!("处理器崩溃: {}", task.entity_id);
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// 放行前所有调用都阻塞，放行后直接成功；同时统计并发度
#[derive(Debug, Clone)]
pub struct GatedProcessor {
    started: Arc<Notify>,
    gate: Arc<watch::Sender<bool>>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl GatedProcessor {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            started: Arc::new(Notify::new()),
            gate: Arc::new(gate),
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 等待处理器开始执行某个任务
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for GatedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskProcessor for GatedProcessor {
    async fn process(&self, _task: &Task) -> Result<TaskOutput, ProcessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.started.notify_one();

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TaskOutput::raw(serde_json::json!({"gated": true})))
    }

    fn name(&self) -> &str {
        "gated"
    }
}
