pub mod database;
pub mod error_handling;
pub mod observability;

pub use database::*;
pub use observability::StructuredLogger;
