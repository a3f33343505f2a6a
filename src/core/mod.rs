//! 核心层：错误分类、运行监管

pub mod error;
pub mod supervisor;

pub use error::{HiveError, PlanError};
pub use supervisor::{RunGuard, RunSupervisor};
