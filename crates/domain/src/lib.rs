pub mod entities;
pub mod ports;
pub mod repositories;
mod sqlx_impls;
pub mod value_objects;

pub use entities::*;
pub use ports::{ProcessorError, TaskProcessor};
pub use repositories::{KnowledgeRepository, TaskRepository};
pub use value_objects::{EligibilityOutcome, TaskOutput, UpdateValue};
