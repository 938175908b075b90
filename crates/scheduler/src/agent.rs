use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use billing_core::config::AgentConfig;
use billing_core::{SchedulerError, SchedulerResult};
use billing_domain::{
    KnowledgeRepository, ProcessorError, Task, TaskOutput, TaskRepository, TaskStatus, TaskUpdate,
    UpdateValue, GENERIC_COUNTERPART,
};
use billing_infrastructure::StructuredLogger;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::queue::{QueueEntry, TaskQueue};
use crate::registry::ProcessorRegistry;
use crate::retry_policy::RetryPolicy;

/// 计费任务调度代理
///
/// 同一时刻最多执行一个任务。数据库是事实来源，内存队列只是在 `start()` 时重建、
/// 之后由控制面与处理循环增量维护的工作集。
pub struct BillingAgent {
    pub(crate) core: Arc<AgentCore>,
    lifecycle: Mutex<Option<LoopHandle>>,
}

struct LoopHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

pub(crate) struct AgentCore {
    pub(crate) tasks: Arc<dyn TaskRepository>,
    pub(crate) knowledge: Arc<dyn KnowledgeRepository>,
    processors: ProcessorRegistry,
    retry_policy: RetryPolicy,
    pub(crate) config: AgentConfig,
    pub(crate) queue: RwLock<TaskQueue>,
    pub(crate) current_task: RwLock<Option<Uuid>>,
    pub(crate) running: AtomicBool,
    wakeup: Notify,
}

impl BillingAgent {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        knowledge: Arc<dyn KnowledgeRepository>,
        processors: ProcessorRegistry,
        config: AgentConfig,
        retry_policy: RetryPolicy,
    ) -> Self {
        if !processors.is_complete() {
            warn!(
                registered = ?processors.registered_types(),
                "处理器未覆盖全部任务类型，缺失类型的任务将按失败处理"
            );
        }

        Self {
            core: Arc::new(AgentCore {
                tasks,
                knowledge,
                processors,
                retry_policy,
                config,
                queue: RwLock::new(TaskQueue::new()),
                current_task: RwLock::new(None),
                running: AtomicBool::new(false),
                wakeup: Notify::new(),
            }),
            lifecycle: Mutex::new(None),
        }
    }

    /// 启动处理循环，已在运行时不做任何事
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(handle) = lifecycle.as_mut() {
            if self.core.running.load(Ordering::SeqCst) {
                debug!("调度代理已在运行，忽略重复启动");
                return Ok(());
            }
            // 上一次 stop() 被取消，旧循环可能仍在执行任务，必须等它退出
            info!("等待上一个调度循环退出");
            if let Err(e) = (&mut handle.join).await {
                error!("调度循环异常退出: {}", e);
            }
            lifecycle.take();
        }

        let recovered = self.core.tasks.recover_interrupted(Utc::now()).await?;
        self.core.queue.write().await.clear();
        self.core.reload_queue().await?;
        self.core.running.store(true, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let core = Arc::clone(&self.core);
        let join = tokio::spawn(async move { core.run_loop(shutdown_rx).await });
        *lifecycle = Some(LoopHandle { shutdown_tx, join });

        StructuredLogger::log_agent_started(self.core.queue.read().await.len(), recovered);
        Ok(())
    }

    /// 停止处理循环并等待当前任务结束，未运行时不做任何事
    ///
    /// 可以被取消：循环句柄在循环真正退出前一直留在 `lifecycle` 中，
    /// 之后的 `start()` 会先等待旧循环结束。
    pub async fn stop(&self) -> SchedulerResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(handle) = lifecycle.as_mut() else {
            return Ok(());
        };

        info!("正在停止调度代理，等待当前任务完成");
        self.core.running.store(false, Ordering::SeqCst);
        let _ = handle.shutdown_tx.send(());
        self.core.wakeup.notify_one();

        let joined = (&mut handle.join).await;
        lifecycle.take();
        if let Err(e) = joined {
            error!("调度循环异常退出: {}", e);
        }

        let mut queue = self.core.queue.write().await;
        StructuredLogger::log_agent_stopped(queue.len());
        queue.clear();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    pub async fn queue_size(&self) -> usize {
        self.core.queue.read().await.len()
    }

    pub async fn current_task(&self) -> Option<Uuid> {
        *self.core.current_task.read().await
    }
}

impl AgentCore {
    async fn run_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let rescan_interval = match self.config.rescan_interval_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        };
        let mut last_rescan = Instant::now();

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            "调度循环已启动"
        );

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if let Some(interval) = rescan_interval {
                if last_rescan.elapsed() >= interval {
                    if let Err(e) = self.reload_queue().await {
                        StructuredLogger::log_system_error("agent", "rescan", &e);
                    }
                    last_rescan = Instant::now();
                }
            }

            // 任务执行不放进 select!，停止信号不会打断正在执行的任务
            let idle = match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => self.idle_wait(poll_interval).await,
                Err(e) => {
                    StructuredLogger::log_system_error("agent", "process_next", &e);
                    poll_interval
                }
            };
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }

        info!("调度循环已退出");
    }

    /// 队列为空时等待一个轮询间隔，否则最多等到最早的任务到期
    async fn idle_wait(&self, poll_interval: Duration) -> Duration {
        let next_due = self.queue.read().await.next_due_at();
        match next_due {
            Some(due) => (due - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(poll_interval),
            None => poll_interval,
        }
    }

    /// 处理一个到期任务，返回是否消费了队列中的句柄
    async fn process_next(&self) -> SchedulerResult<bool> {
        let now = Utc::now();
        let entry = {
            let mut queue = self.queue.write().await;
            let Some(entry) = queue.pop_due(now) else {
                return Ok(false);
            };
            // 持有队列锁时登记当前任务，reload_queue 不会把它重新放回队列
            *self.current_task.write().await = Some(entry.id);
            entry
        };

        let outcome = self.dispatch(entry, now).await;
        *self.current_task.write().await = None;
        outcome
    }

    async fn dispatch(&self, entry: QueueEntry, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let task = match self.tasks.get_by_id(entry.id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                StructuredLogger::log_task_skipped(&entry.id, "任务已被删除");
                return Ok(true);
            }
            Err(e) => {
                self.queue.write().await.restore(entry);
                return Err(e);
            }
        };

        if !task.is_queueable() {
            StructuredLogger::log_task_skipped(&task.id, task.status.as_str());
            return Ok(true);
        }
        if !task.is_due(now) {
            // 存储中的计划时间被改到了以后
            self.queue.write().await.upsert(&task);
            return Ok(true);
        }

        self.execute(task).await;
        Ok(true)
    }

    async fn execute(&self, task: Task) {
        let started_at = Utc::now();
        let running_update = TaskUpdate {
            started_at: UpdateValue::Set(started_at),
            ..TaskUpdate::status(TaskStatus::Running)
        };

        let task = match self.tasks.update(task.id, &running_update).await {
            Ok(updated) => updated,
            Err(SchedulerError::TaskNotFound { .. }) => {
                StructuredLogger::log_task_skipped(&task.id, "任务已被删除");
                return;
            }
            Err(SchedulerError::InvalidState { status, .. }) => {
                StructuredLogger::log_task_skipped(&task.id, &status);
                return;
            }
            Err(e) => {
                StructuredLogger::log_system_error("agent", "mark_running", &e);
                task
            }
        };

        StructuredLogger::log_task_started(&task);
        let timer = Instant::now();

        match self.invoke(&task).await {
            Ok(output) => self.handle_success(&task, output, timer.elapsed()).await,
            Err(err) => self.handle_failure(&task, err).await,
        }
    }

    async fn invoke(&self, task: &Task) -> Result<TaskOutput, ProcessorError> {
        let Some(processor) = self.processors.get(task.task_type) else {
            return Err(ProcessorError::UnknownTaskType(task.task_type));
        };

        debug!(task_id = %task.id, processor = processor.name(), "调用任务处理器");
        match AssertUnwindSafe(processor.process(task)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(ProcessorError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    async fn handle_success(&self, task: &Task, output: TaskOutput, elapsed: Duration) {
        let completed = TaskUpdate {
            result: UpdateValue::Set(output.to_json_or_fallback()),
            error: UpdateValue::Unset,
            completed_at: UpdateValue::Set(Utc::now()),
            ..TaskUpdate::status(TaskStatus::Completed)
        };

        if let Err(e) = self.tasks.update(task.id, &completed).await {
            StructuredLogger::log_system_error("agent", "mark_completed", &e);
        }
        StructuredLogger::log_task_completed(task, elapsed.as_millis() as u64);

        if let Err(e) = self
            .knowledge
            .record_success(task.task_type.as_str(), GENERIC_COUNTERPART)
            .await
        {
            StructuredLogger::log_system_error("agent", "record_success", &e);
        }
    }

    async fn handle_failure(&self, task: &Task, err: ProcessorError) {
        let message = truncate_error(&err.to_string(), self.config.max_error_length);
        let attempts = (task.attempts + 1).min(task.max_attempts);

        if attempts < task.max_attempts {
            let next_run = self.retry_policy.next_retry_time(attempts, Utc::now());
            let retry = TaskUpdate {
                attempts: Some(attempts),
                scheduled_for: Some(next_run),
                error: UpdateValue::Set(message.clone()),
                ..TaskUpdate::status(TaskStatus::Retrying)
            };

            match self.tasks.update(task.id, &retry).await {
                Ok(updated) => {
                    self.queue.write().await.upsert(&updated);
                }
                Err(SchedulerError::TaskNotFound { .. }) => {
                    debug!(task_id = %task.id, "任务在执行期间被删除，不再重试");
                }
                Err(e) => {
                    StructuredLogger::log_system_error("agent", "mark_retrying", &e);
                    self.queue
                        .write()
                        .await
                        .push(task.id, task.priority, next_run);
                }
            }
            StructuredLogger::log_task_retry_scheduled(task, attempts, next_run, &message);
        } else {
            let failed = TaskUpdate {
                attempts: Some(attempts),
                error: UpdateValue::Set(message.clone()),
                completed_at: UpdateValue::Set(Utc::now()),
                ..TaskUpdate::status(TaskStatus::Failed)
            };

            if let Err(e) = self.tasks.update(task.id, &failed).await {
                StructuredLogger::log_system_error("agent", "mark_failed", &e);
            }
            StructuredLogger::log_task_failed(task, attempts, &message);
        }

        let pattern = serde_json::json!({ "lastError": message });
        if let Err(e) = self
            .knowledge
            .record_failure(task.task_type.as_str(), GENERIC_COUNTERPART, &pattern)
            .await
        {
            StructuredLogger::log_system_error("agent", "record_failure", &e);
        }
    }

    /// 从存储加载已到期的 PENDING/RETRYING 任务，返回加载数量
    pub(crate) async fn reload_queue(&self) -> SchedulerResult<usize> {
        let eligible = self.tasks.find_eligible(Utc::now()).await?;

        // 与 process_next 相同的加锁顺序：先队列再当前任务
        let mut queue = self.queue.write().await;
        let current = *self.current_task.read().await;
        for task in eligible.iter().filter(|task| Some(task.id) != current) {
            queue.upsert(task);
        }

        StructuredLogger::log_queue_reloaded(eligible.len(), queue.len());
        Ok(eligible.len())
    }

    /// 加入内存队列并唤醒处理循环
    pub(crate) async fn enqueue(&self, task: &Task) {
        self.queue.write().await.upsert(task);
        self.wakeup.notify_one();
    }

    pub(crate) fn nudge(&self) {
        self.wakeup.notify_one();
    }
}

/// 按字符截断错误信息
pub(crate) fn truncate_error(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _)) => message[..byte_index].to_string(),
        None => message.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
