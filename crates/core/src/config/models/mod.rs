pub mod agent;
pub mod app_config;
pub mod database;
pub mod processors;
pub mod retry;

pub use agent::AgentConfig;
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use processors::ProcessorsConfig;
pub use retry::RetryConfig;
