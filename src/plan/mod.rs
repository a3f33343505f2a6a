//! 任务计划模型：Task / PlanRevision / PlanItem、计划操作与 follow-up 渲染

pub mod format;
pub mod ops;
pub mod types;

pub use format::{format_plan_items, numbered_plan, render_followup_context};
pub use ops::{get_completed_items, get_current_item, get_remaining_items};
pub use types::{PlanItem, PlanRevision, RevisionSource, Task, TaskPlan, NO_CURRENT_INDEX};
