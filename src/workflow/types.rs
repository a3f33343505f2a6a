//! 工作流类型定义
//!
//! 运行状态（RunStatus）、阶段结果（StageOutcome）、子运行句柄（AgentSession）与运行报告。

use serde::{Deserialize, Serialize};

use crate::workflow::interrupt::{InterruptEnvelope, Resumption};

pub type RunId = String;

/// 运行状态：RUNNING -> AWAITING（挂起）-> RUNNING | 终态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// 在检查点记录的阶段挂起，等待外部决策
    Awaiting { envelope: InterruptEnvelope },
    Completed,
    /// 致命错误，附带失败描述
    Failed { error: String },
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed { .. } | RunStatus::Cancelled
        )
    }

    pub fn pending_interrupt(&self) -> Option<&InterruptEnvelope> {
        match self {
            RunStatus::Awaiting { envelope } => Some(envelope),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Awaiting { .. } => "awaiting",
            RunStatus::Completed => "completed",
            RunStatus::Failed { .. } => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// 阶段执行结果：继续（由图的路由函数决定下一阶段）或挂起
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutcome {
    Continue,
    Interrupt(InterruptEnvelope),
}

/// 阶段输入：首次进入为 None；resume 时为挂起信封 + 人工响应（只消费一次）
pub type StageInput = Option<Resumption>;

/// 子工作流句柄：父运行只持有 ID，不嵌入子运行状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    /// 持久运行 ID（检查点键）
    pub thread_id: String,
    /// 最近一次驱动（start / resume）的 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl AgentSession {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: None,
        }
    }
}

/// 一次驱动结束（挂起或终止）时的报告
#[derive(Clone, Debug)]
pub struct RunReport<S> {
    pub session: AgentSession,
    pub status: RunStatus,
    pub state: S,
}

impl<S> RunReport<S> {
    pub fn is_awaiting(&self) -> bool {
        matches!(self.status, RunStatus::Awaiting { .. })
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
