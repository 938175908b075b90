mod common;

use std::sync::Arc;
use std::time::Duration;

use billing_domain::{KnowledgeRepository, TaskStatus, TaskType, GENERIC_COUNTERPART};
use billing_scheduler::{ProcessorRegistry, RetryPolicy};
use billing_testing_utils::{
    FailingProcessor, FlakyProcessor, MockTaskRepository, PanickingProcessor, RecordingProcessor,
    SucceedingProcessor, TaskBuilder, TaskSpecBuilder,
};
use chrono::Utc;
use common::{eventually, Harness};

fn registry_for(
    task_type: TaskType,
    processor: Arc<dyn billing_domain::TaskProcessor>,
) -> ProcessorRegistry {
    ProcessorRegistry::builder().register(task_type, processor).build()
}

#[tokio::test]
async fn test_happy_path_completes_and_records_success() {
    let processor = SucceedingProcessor::new();
    let harness = Harness::new(registry_for(
        TaskType::CheckEligibility,
        Arc::new(processor.clone()),
    ));
    harness.agent.start().await.unwrap();

    let task = harness
        .agent
        .create_task(TaskSpecBuilder::eligibility().build())
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.max_attempts, 5);

    assert!(harness.wait_for_status(task.id, TaskStatus::Completed).await);
    let completed = harness.task(task.id).await;
    assert_eq!(completed.attempts, 0);
    assert!(completed.error.is_none());
    assert!(completed.started_at.is_some());
    assert!(completed.completed_at.is_some());
    assert_eq!(
        completed.result,
        Some(serde_json::json!({"kind": "RAW", "data": {"ok": true}}))
    );
    assert_eq!(processor.calls(), 1);

    // stop 会等待当前任务的收尾写入完成
    harness.agent.stop().await.unwrap();
    let record = harness
        .knowledge
        .get("CHECK_ELIGIBILITY", GENERIC_COUNTERPART)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.success_count, 1);
    assert_eq!(record.failure_count, 0);
}

#[tokio::test]
async fn test_transient_failure_schedules_retry_with_backoff() {
    let processor = FlakyProcessor::new(1, "payer timeout");
    let harness = Harness::with_policy(
        registry_for(TaskType::SubmitClaim, Arc::new(processor.clone())),
        RetryPolicy::default(),
    );
    harness.agent.start().await.unwrap();

    let task = harness
        .agent
        .create_task(TaskSpecBuilder::new(TaskType::SubmitClaim).build())
        .await
        .unwrap();

    assert!(harness.wait_for_status(task.id, TaskStatus::Retrying).await);
    let retrying = harness.task(task.id).await;
    assert_eq!(retrying.attempts, 1);
    assert_eq!(retrying.error.as_deref(), Some("payer timeout"));

    // 默认退避: 第1次失败后约2秒
    let delay = retrying.scheduled_for - retrying.updated_at;
    assert!(delay >= chrono::Duration::milliseconds(1900), "delay was {delay}");
    assert!(delay <= chrono::Duration::milliseconds(2100), "delay was {delay}");

    assert!(harness.wait_for_status(task.id, TaskStatus::Completed).await);
    let completed = harness.task(task.id).await;
    assert_eq!(completed.attempts, 1);
    assert!(completed.error.is_none());
    assert_eq!(processor.calls(), 2);

    harness.agent.stop().await.unwrap();
    let stats = harness.knowledge.stats().await.unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.success_rate, Some(0.5));
}

#[tokio::test]
async fn test_exhausted_retries_mark_task_failed() {
    let processor = FailingProcessor::new("payer rejected");
    let harness = Harness::new(registry_for(
        TaskType::FileAppeal,
        Arc::new(processor.clone()),
    ));
    harness.agent.start().await.unwrap();

    let task = harness
        .agent
        .create_task(
            TaskSpecBuilder::new(TaskType::FileAppeal)
                .with_max_attempts(2)
                .build(),
        )
        .await
        .unwrap();

    assert!(harness.wait_for_status(task.id, TaskStatus::Failed).await);
    let failed = harness.task(task.id).await;
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.error.as_deref(), Some("payer rejected"));
    assert!(failed.completed_at.is_some());
    assert_eq!(processor.calls(), 2);

    // 终态任务不会再被执行
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(processor.calls(), 2);
    assert_eq!(harness.agent.queue_size().await, 0);

    let record = harness
        .knowledge
        .get("FILE_APPEAL", GENERIC_COUNTERPART)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.failure_count, 2);
    assert_eq!(record.pattern["lastError"], "payer rejected");

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_single_attempt_budget_fails_immediately() {
    let processor = FailingProcessor::new("bad request");
    let harness = Harness::new(registry_for(TaskType::CreateClaim, Arc::new(processor.clone())));
    harness.agent.start().await.unwrap();

    let task = harness
        .agent
        .create_task(
            TaskSpecBuilder::new(TaskType::CreateClaim)
                .with_max_attempts(1)
                .build(),
        )
        .await
        .unwrap();

    assert!(harness.wait_for_status(task.id, TaskStatus::Failed).await);
    assert_eq!(harness.task(task.id).await.attempts, 1);
    assert_eq!(processor.calls(), 1);

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_error_message_is_truncated() {
    let long_message = "拒".repeat(1500);
    let harness = Harness::new(registry_for(
        TaskType::CheckStatus,
        Arc::new(FailingProcessor::new(long_message)),
    ));
    harness.agent.start().await.unwrap();

    let task = harness
        .agent
        .create_task(
            TaskSpecBuilder::new(TaskType::CheckStatus)
                .with_max_attempts(1)
                .build(),
        )
        .await
        .unwrap();

    assert!(harness.wait_for_status(task.id, TaskStatus::Failed).await);
    let stored = harness.task(task.id).await.error.unwrap();
    assert_eq!(stored.chars().count(), 1000);

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_priority_order_across_waiting_tasks() {
    let processor = RecordingProcessor::new();
    let harness = Harness::new(ProcessorRegistry::exhaustive(|_| {
        Arc::new(processor.clone())
    }));

    // 停止状态下创建，启动时一次性装入队列
    let earlier = Utc::now() - chrono::Duration::seconds(10);
    let low = harness
        .agent
        .create_task(
            TaskSpecBuilder::eligibility()
                .with_priority(1)
                .with_scheduled_for(earlier)
                .build(),
        )
        .await
        .unwrap();
    let high = harness
        .agent
        .create_task(TaskSpecBuilder::eligibility().with_priority(10).build())
        .await
        .unwrap();
    let mid_late = harness
        .agent
        .create_task(TaskSpecBuilder::eligibility().with_priority(5).build())
        .await
        .unwrap();
    let mid_early = harness
        .agent
        .create_task(
            TaskSpecBuilder::eligibility()
                .with_priority(5)
                .with_scheduled_for(earlier)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(harness.agent.queue_size().await, 0);

    harness.agent.start().await.unwrap();
    assert!(eventually(|| processor.order().len() == 4).await);
    assert_eq!(
        processor.order(),
        vec![high.id, mid_early.id, mid_late.id, low.id]
    );

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_at_most_one_task_running() {
    let processor = RecordingProcessor::with_delay(Duration::from_millis(20));
    let harness = Harness::new(ProcessorRegistry::exhaustive(|_| {
        Arc::new(processor.clone())
    }));
    harness.agent.start().await.unwrap();

    let mut ids = Vec::new();
    for (i, task_type) in TaskType::ALL.into_iter().enumerate() {
        let task = harness
            .agent
            .create_task(TaskSpecBuilder::new(task_type).with_priority(i as i32).build())
            .await
            .unwrap();
        ids.push(task.id);
    }

    assert!(eventually(|| processor.order().len() == ids.len()).await);
    for id in &ids {
        assert!(harness.wait_for_status(*id, TaskStatus::Completed).await);
    }
    assert_eq!(processor.max_in_flight(), 1);
    assert_eq!(harness.tasks.max_running_observed(), 1);

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_future_task_waits_until_due() {
    let processor = SucceedingProcessor::new();
    let harness = Harness::new(registry_for(
        TaskType::GenerateEdi,
        Arc::new(processor.clone()),
    ));
    harness.agent.start().await.unwrap();

    let due = Utc::now() + chrono::Duration::milliseconds(300);
    let task = harness
        .agent
        .create_task(
            TaskSpecBuilder::new(TaskType::GenerateEdi)
                .with_scheduled_for(due)
                .build(),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(processor.calls(), 0);
    assert_eq!(harness.task(task.id).await.status, TaskStatus::Pending);

    assert!(harness.wait_for_status(task.id, TaskStatus::Completed).await);
    assert!(harness.task(task.id).await.started_at.unwrap() >= due);

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_processor_fails_task() {
    let harness = Harness::new(registry_for(
        TaskType::CheckEligibility,
        Arc::new(SucceedingProcessor::new()),
    ));
    harness.agent.start().await.unwrap();

    let task = harness
        .agent
        .create_task(
            TaskSpecBuilder::new(TaskType::SubmitClaim)
                .with_max_attempts(1)
                .build(),
        )
        .await
        .unwrap();

    assert!(harness.wait_for_status(task.id, TaskStatus::Failed).await);
    let failed = harness.task(task.id).await;
    assert!(failed.error.unwrap().contains("SUBMIT_CLAIM"));
    assert!(harness.agent.is_running());

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_processor_is_contained() {
    let healthy = SucceedingProcessor::new();
    let registry = ProcessorRegistry::builder()
        .register(TaskType::SubmitClaim, Arc::new(PanickingProcessor))
        .register(TaskType::CheckEligibility, Arc::new(healthy.clone()))
        .build();
    let harness = Harness::new(registry);
    harness.agent.start().await.unwrap();

    let doomed = harness
        .agent
        .create_task(
            TaskSpecBuilder::new(TaskType::SubmitClaim)
                .with_priority(10)
                .with_max_attempts(1)
                .build(),
        )
        .await
        .unwrap();
    let survivor = harness
        .agent
        .create_task(TaskSpecBuilder::eligibility().build())
        .await
        .unwrap();

    assert!(harness.wait_for_status(doomed.id, TaskStatus::Failed).await);
    assert!(harness.task(doomed.id).await.error.unwrap().contains("处理器崩溃"));
    assert!(harness.wait_for_status(survivor.id, TaskStatus::Completed).await);
    assert!(harness.agent.is_running());

    harness.agent.stop().await.unwrap();
    assert_eq!(harness.agent.current_task().await, None);
}

#[tokio::test]
async fn test_store_failures_do_not_stop_the_loop() {
    let processor = SucceedingProcessor::new();
    let harness = Harness::new(registry_for(
        TaskType::CheckEligibility,
        Arc::new(processor.clone()),
    ));

    let task = harness
        .agent
        .create_task(TaskSpecBuilder::eligibility().build())
        .await
        .unwrap();

    harness.tasks.set_fail_updates(true);
    harness.agent.start().await.unwrap();
    assert!(eventually(|| processor.calls() == 1).await);

    // 状态未能写入，存储中仍为PENDING
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.task(task.id).await.status, TaskStatus::Pending);
    assert!(harness.agent.is_running());

    harness.tasks.set_fail_updates(false);
    let loaded = harness.agent.trigger_process_queue().await.unwrap();
    assert_eq!(loaded, 1);
    assert!(harness.wait_for_status(task.id, TaskStatus::Completed).await);
    assert_eq!(processor.calls(), 2);

    harness.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_recovers_interrupted_tasks() {
    let interrupted = TaskBuilder::new()
        .with_status(TaskStatus::Running)
        .with_attempts(1, 3)
        .build();
    let finished = TaskBuilder::new().with_status(TaskStatus::Completed).build();
    let repo = MockTaskRepository::with_tasks(vec![interrupted.clone(), finished.clone()]);

    let processor = SucceedingProcessor::new();
    let harness = Harness::with_repository(
        repo,
        registry_for(TaskType::CheckEligibility, Arc::new(processor.clone())),
        common::fast_retry_policy(),
    );
    harness.agent.start().await.unwrap();

    assert!(harness.wait_for_status(interrupted.id, TaskStatus::Completed).await);
    assert_eq!(harness.task(finished.id).await.status, TaskStatus::Completed);
    assert_eq!(processor.calls(), 1);

    harness.agent.stop().await.unwrap();
}
