//! 计费任务调度核心
//!
//! 单进程、单工作者的优先级任务调度：内存队列 + 数据库持久化 + 指数退避重试。

pub mod agent;
pub mod control;
pub mod queue;
pub mod registry;
pub mod retry_policy;

pub use agent::BillingAgent;
pub use control::AgentStatus;
pub use queue::{QueueEntry, TaskQueue};
pub use registry::{ProcessorRegistry, ProcessorRegistryBuilder};
pub use retry_policy::RetryPolicy;
