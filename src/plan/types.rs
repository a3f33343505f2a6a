//! 任务计划数据模型
//!
//! TaskPlan 由若干 Task 组成（每个用户请求一个）；Task 保存完整的计划修订历史，
//! 修订只追加不修改，active_revision_index 指向最近被批准/使用的修订。

use serde::{Deserialize, Serialize};

/// 「当前无任务」哨兵项的索引
pub const NO_CURRENT_INDEX: i64 = -1;

/// 计划中的单个可执行步骤（自然语言描述，不含代码）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    /// 修订内唯一，作为稳定排序键
    pub index: i64,
    pub plan: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl PlanItem {
    pub fn new(index: i64, plan: impl Into<String>) -> Self {
        Self {
            index,
            plan: plan.into(),
            completed: false,
            summary: None,
        }
    }

    /// 「当前无任务」哨兵：调用方必须把 index == -1 视为没有进行中的工作
    pub fn sentinel() -> Self {
        Self {
            index: NO_CURRENT_INDEX,
            plan: "No current task found.".to_string(),
            completed: true,
            summary: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.index == NO_CURRENT_INDEX
    }
}

/// 修订来源（审计用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionSource {
    /// createTask 创建的空修订
    Initial,
    Planner,
    /// 人工在审批中编辑
    Human,
    Reviewer,
}

/// 计划的一个完整版本
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRevision {
    pub revision_index: usize,
    pub plans: Vec<PlanItem>,
    pub created_by: RevisionSource,
    pub created_at: i64,
}

/// 一个用户请求对应的工作单元
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_index: u64,
    pub request: String,
    pub created_at: i64,
    pub plan_revisions: Vec<PlanRevision>,
    pub active_revision_index: usize,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// 会话内全部任务
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_index: Option<u64>,
}
