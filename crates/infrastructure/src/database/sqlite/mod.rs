pub mod sqlite_knowledge_repository;
pub mod sqlite_task_repository;

pub use sqlite_knowledge_repository::SqliteKnowledgeRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
