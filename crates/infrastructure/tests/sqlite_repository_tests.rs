use anyhow::Result;
use billing_core::SchedulerError;
use billing_domain::{
    KnowledgeRepository, TaskFilter, TaskRepository, TaskSpec, TaskStatus, TaskType, TaskUpdate,
    UpdateValue, GENERIC_COUNTERPART,
};
use billing_infrastructure::{DatabaseManager, SqliteKnowledgeRepository, SqliteTaskRepository};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

async fn setup() -> Result<(DatabaseManager, SqliteTaskRepository, SqliteKnowledgeRepository)> {
    let db = DatabaseManager::in_memory().await?;
    let tasks = SqliteTaskRepository::new(db.pool().clone());
    let knowledge = SqliteKnowledgeRepository::new(db.pool().clone());
    Ok((db, tasks, knowledge))
}

#[tokio::test]
async fn test_create_and_get_task() -> Result<()> {
    let (_db, repo, _) = setup().await?;

    let spec = TaskSpec::new(TaskType::CheckEligibility, "claim-1", "CLAIM")
        .with_priority(5)
        .with_metadata(json!({"payerId": "AETNA"}));
    let created = repo.create(&spec).await?;

    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.attempts, 0);
    assert_eq!(created.max_attempts, 5);

    let fetched = repo.get_by_id(created.id).await?.expect("task should exist");
    assert_eq!(fetched.task_type, TaskType::CheckEligibility);
    assert_eq!(fetched.entity_id, "claim-1");
    assert_eq!(fetched.priority, 5);
    assert_eq!(fetched.metadata, json!({"payerId": "AETNA"}));
    assert_eq!(fetched.scheduled_for, created.scheduled_for);
    assert!(fetched.result.is_none());

    assert!(repo.get_by_id(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_missing_fields() -> Result<()> {
    let (_db, repo, _) = setup().await?;

    let result = repo
        .create(&TaskSpec::new(TaskType::CreateClaim, "", "CLAIM"))
        .await;
    assert!(matches!(result, Err(SchedulerError::ValidationError(_))));
    assert_eq!(repo.count(&TaskFilter::default()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_list_orders_by_priority_then_schedule() -> Result<()> {
    let (_db, repo, _) = setup().await?;
    let now = Utc::now();

    let low = repo
        .create(&TaskSpec::new(TaskType::CheckStatus, "c-low", "CLAIM").with_priority(1))
        .await?;
    let late = repo
        .create(
            &TaskSpec::new(TaskType::CheckStatus, "c-late", "CLAIM")
                .with_priority(10)
                .with_scheduled_for(now + Duration::seconds(30)),
        )
        .await?;
    let early = repo
        .create(
            &TaskSpec::new(TaskType::CheckStatus, "c-early", "CLAIM")
                .with_priority(10)
                .with_scheduled_for(now - Duration::seconds(30)),
        )
        .await?;

    let ids: Vec<Uuid> = repo
        .list(&TaskFilter::default())
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![early.id, late.id, low.id]);

    let page: Vec<Uuid> = repo
        .list(&TaskFilter::default().paginate(Some(1), Some(1)))
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(page, vec![late.id]);

    let skipped = repo
        .list(&TaskFilter::default().paginate(None, Some(2)))
        .await?;
    assert_eq!(skipped.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_update_merges_fields() -> Result<()> {
    let (_db, repo, _) = setup().await?;
    let task = repo
        .create(&TaskSpec::new(TaskType::SubmitClaim, "claim-2", "CLAIM").with_max_attempts(3))
        .await?;

    let started = Utc::now();
    let running = repo
        .update(
            task.id,
            &TaskUpdate {
                started_at: UpdateValue::Set(started),
                ..TaskUpdate::status(TaskStatus::Running)
            },
        )
        .await?;
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(running.priority, task.priority);

    let failed = repo
        .update(
            task.id,
            &TaskUpdate {
                attempts: Some(10),
                error: UpdateValue::Set("clearinghouse rejected".to_string()),
                completed_at: UpdateValue::Set(Utc::now()),
                ..TaskUpdate::status(TaskStatus::Failed)
            },
        )
        .await?;
    assert_eq!(failed.attempts, 3);

    let stored = repo.get_by_id(task.id).await?.expect("task should exist");
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.error.as_deref(), Some("clearinghouse rejected"));
    assert_eq!(stored.started_at, Some(started));
    assert!(stored.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_update_missing_task_is_not_found() -> Result<()> {
    let (_db, repo, _) = setup().await?;
    let result = repo
        .update(Uuid::new_v4(), &TaskUpdate::status(TaskStatus::Running))
        .await;
    assert!(matches!(result, Err(SchedulerError::TaskNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn test_update_rejects_backward_status_change() -> Result<()> {
    let (_db, repo, _) = setup().await?;
    let task = repo
        .create(&TaskSpec::new(TaskType::CheckStatus, "claim-10", "CLAIM"))
        .await?;

    let skipped = repo
        .update(task.id, &TaskUpdate::status(TaskStatus::Completed))
        .await;
    assert!(matches!(skipped, Err(SchedulerError::InvalidState { .. })));

    repo.update(task.id, &TaskUpdate::status(TaskStatus::Running))
        .await?;
    repo.update(task.id, &TaskUpdate::status(TaskStatus::Completed))
        .await?;
    let reopened = repo
        .update(task.id, &TaskUpdate::status(TaskStatus::Pending))
        .await;
    assert!(matches!(reopened, Err(SchedulerError::InvalidState { .. })));

    let stored = repo.get_by_id(task.id).await?.expect("task should exist");
    assert_eq!(stored.status, TaskStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_delete_reports_existence() -> Result<()> {
    let (_db, repo, _) = setup().await?;
    let task = repo
        .create(&TaskSpec::new(TaskType::FileAppeal, "claim-3", "CLAIM"))
        .await?;

    assert!(repo.delete(task.id).await?);
    assert!(!repo.delete(task.id).await?);
    assert!(repo.get_by_id(task.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_find_eligible_and_counts() -> Result<()> {
    let (_db, repo, _) = setup().await?;
    let now = Utc::now();

    let due = repo
        .create(&TaskSpec::new(TaskType::GenerateEdi, "claim-4", "CLAIM"))
        .await?;
    let future = repo
        .create(
            &TaskSpec::new(TaskType::GenerateEdi, "claim-5", "CLAIM")
                .with_scheduled_for(now + Duration::minutes(5)),
        )
        .await?;
    let retrying = repo
        .create(&TaskSpec::new(TaskType::GenerateEdi, "claim-6", "CLAIM"))
        .await?;
    repo.update(retrying.id, &TaskUpdate::status(TaskStatus::Running))
        .await?;
    repo.update(retrying.id, &TaskUpdate::status(TaskStatus::Retrying))
        .await?;
    let done = repo
        .create(&TaskSpec::new(TaskType::GenerateEdi, "claim-7", "CLAIM"))
        .await?;
    repo.update(done.id, &TaskUpdate::status(TaskStatus::Running))
        .await?;
    repo.update(done.id, &TaskUpdate::status(TaskStatus::Completed))
        .await?;

    let eligible: Vec<Uuid> = repo
        .find_eligible(Utc::now())
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert!(eligible.contains(&due.id));
    assert!(eligible.contains(&retrying.id));
    assert!(!eligible.contains(&future.id));
    assert!(!eligible.contains(&done.id));

    let stats = repo.count_by_status().await?;
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.retrying, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.running, 0);

    assert_eq!(
        repo.count(&TaskFilter::with_status(TaskStatus::Pending))
            .await?,
        2
    );
    Ok(())
}

#[tokio::test]
async fn test_recover_interrupted_running_tasks() -> Result<()> {
    let (_db, repo, _) = setup().await?;
    let task = repo
        .create(&TaskSpec::new(TaskType::CheckStatus, "claim-8", "CLAIM"))
        .await?;
    repo.update(task.id, &TaskUpdate::status(TaskStatus::Running))
        .await?;

    assert_eq!(repo.recover_interrupted(Utc::now()).await?, 1);
    let recovered = repo.get_by_id(task.id).await?.expect("task should exist");
    assert_eq!(recovered.status, TaskStatus::Retrying);
    assert_eq!(repo.recover_interrupted(Utc::now()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_knowledge_upsert_increments() -> Result<()> {
    let (_db, _, knowledge) = setup().await?;

    assert_eq!(knowledge.stats().await?.success_rate, None);

    knowledge
        .record_success("CHECK_ELIGIBILITY", GENERIC_COUNTERPART)
        .await?;
    knowledge
        .record_success("CHECK_ELIGIBILITY", GENERIC_COUNTERPART)
        .await?;
    let record = knowledge
        .record_failure(
            "CHECK_ELIGIBILITY",
            GENERIC_COUNTERPART,
            &json!({"lastError": "payer timeout"}),
        )
        .await?;
    assert_eq!(record.success_count, 2);
    assert_eq!(record.failure_count, 1);
    assert_eq!(record.pattern["lastError"], "payer timeout");

    let record = knowledge
        .record_failure(
            "CHECK_ELIGIBILITY",
            GENERIC_COUNTERPART,
            &json!({"lastError": "invalid member id"}),
        )
        .await?;
    assert_eq!(record.failure_count, 2);
    assert_eq!(record.pattern["lastError"], "invalid member id");

    knowledge.record_success("SUBMIT_CLAIM", "BCBS").await?;

    let stats = knowledge.stats().await?;
    assert_eq!(stats.total_patterns, 2);
    assert_eq!(stats.success_count, 3);
    assert_eq!(stats.failure_count, 2);
    assert_eq!(stats.success_rate, Some(0.6));

    let fetched = knowledge
        .get("SUBMIT_CLAIM", "BCBS")
        .await?
        .expect("record should exist");
    assert_eq!(fetched.success_count, 1);
    assert!(knowledge.get("SUBMIT_CLAIM", "AETNA").await?.is_none());
    assert_eq!(knowledge.list().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_file_database_survives_reopen() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let config = billing_core::config::DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("billing.db").display()),
        ..Default::default()
    };

    let id = {
        let db = DatabaseManager::new(&config).await?;
        db.migrate().await?;
        let repo = SqliteTaskRepository::new(db.pool().clone());
        let task = repo
            .create(&TaskSpec::new(TaskType::CreateClaim, "claim-9", "CLAIM"))
            .await?;
        db.close().await;
        task.id
    };

    let db = DatabaseManager::new(&config).await?;
    db.migrate().await?;
    let repo = SqliteTaskRepository::new(db.pool().clone());
    let task = repo.get_by_id(id).await?.expect("task should survive reopen");
    assert_eq!(task.entity_id, "claim-9");
    Ok(())
}
