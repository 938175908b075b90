#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use billing_core::config::{AgentConfig, RetryConfig};
use billing_domain::{Task, TaskRepository, TaskStatus};
use billing_scheduler::{BillingAgent, ProcessorRegistry, RetryPolicy};
use billing_testing_utils::{MockKnowledgeRepository, MockTaskRepository, TestEnv};
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fast_agent_config() -> AgentConfig {
    AgentConfig {
        poll_interval_ms: 20,
        rescan_interval_seconds: 0,
        ..AgentConfig::default()
    }
}

pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::from_config(&RetryConfig {
        base_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    })
}

pub struct Harness {
    pub agent: Arc<BillingAgent>,
    pub tasks: MockTaskRepository,
    pub knowledge: MockKnowledgeRepository,
}

impl Harness {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self::with_policy(registry, fast_retry_policy())
    }

    pub fn with_policy(registry: ProcessorRegistry, policy: RetryPolicy) -> Self {
        Self::with_repository(MockTaskRepository::new(), registry, policy)
    }

    pub fn with_repository(
        tasks: MockTaskRepository,
        registry: ProcessorRegistry,
        policy: RetryPolicy,
    ) -> Self {
        let knowledge = MockKnowledgeRepository::new();
        let agent = Arc::new(BillingAgent::new(
            Arc::new(tasks.clone()),
            Arc::new(knowledge.clone()),
            registry,
            fast_agent_config(),
            policy,
        ));
        Self {
            agent,
            tasks,
            knowledge,
        }
    }

    pub async fn task(&self, id: Uuid) -> Task {
        self.tasks
            .get_by_id(id)
            .await
            .unwrap()
            .expect("task should exist")
    }

    pub async fn wait_for_status(&self, id: Uuid, status: TaskStatus) -> bool {
        TestEnv::wait_for(
            || async move {
                matches!(self.tasks.get_by_id(id).await, Ok(Some(task)) if task.status == status)
            },
            WAIT,
        )
        .await
    }
}

/// 轮询同步条件直到成立或超时
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    TestEnv::wait_for(
        || {
            let satisfied = condition();
            async move { satisfied }
        },
        WAIT,
    )
    .await
}
