//! # Billing Testing Utils
//!
//! 供各 crate 测试共享的内存仓储、测试数据构造器和可编排的任务处理器。
//!
//! ```toml
//! [dev-dependencies]
//! billing-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;
pub mod processors;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
pub use processors::*;
