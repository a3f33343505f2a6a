//! 错误分类
//!
//! PlanError：计划模型的非法变更（拒绝并保持原状）；HiveError：单次工作流运行的错误，
//! 其中协议违规（未知响应类型、缺少 change request / 沙箱会话等）会终止当前运行。
//! 工具失败与预算耗尽不是错误，由 Action Loop 以普通结果消息表达。

use thiserror::Error;

use crate::llm::LlmError;

/// 计划变更错误：变更不会被应用，调用方需重新提交
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Invalid revision index {index} (task has {len} revisions)")]
    InvalidRevision { index: usize, len: usize },

    #[error("Plan item {index} is already completed")]
    AlreadyCompleted { index: i64 },

    /// 修订试图编辑或删除已完成的计划项
    #[error("Completed plan item {index} cannot be edited or removed")]
    CompletedItemModified { index: i64 },

    #[error("Duplicate plan item index {index}")]
    DuplicateIndex { index: i64 },

    #[error("Task {0} not found")]
    TaskNotFound(u64),

    #[error("Task index {0} is duplicated or out of order")]
    TaskIndexOrder(u64),

    #[error("Plan item {index} not found in active revision")]
    ItemNotFound { index: i64 },
}

/// 工作流运行错误
#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Unknown human response type: {0}")]
    UnknownResponseType(String),

    #[error("Response '{kind}' is not allowed for interrupt '{action}'")]
    ResponseNotAllowed { kind: String, action: String },

    #[error("No change request found in state")]
    MissingChangeRequest,

    #[error("No sandbox session id found in state")]
    MissingSandboxSession,

    #[error("Missing required state field: {0}")]
    MissingField(&'static str),

    #[error("Unknown route label: {0}")]
    UnknownRoute(String),

    #[error("Invalid tool arguments for {tool}: {reason}")]
    InvalidToolArgs { tool: String, reason: String },

    #[error("Run {0} not found")]
    RunNotFound(String),

    /// 只有处于 Awaiting 的运行可以 resume
    #[error("Run {0} is not awaiting a human response")]
    NotAwaiting(String),

    #[error("Run {0} is already being driven")]
    RunBusy(String),

    /// 只有停在 Running 且没有驱动者的运行可以 recover
    #[error("Run {0} was not interrupted mid-stage")]
    NotRecoverable(String),

    #[error("Run {run_id} belongs to workflow '{actual}', expected '{expected}'")]
    WorkflowMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Stage transition limit ({0}) exceeded")]
    TransitionLimit(usize),

    #[error("Stage {0} is not registered in the graph")]
    UnregisteredStage(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// 后台驱动任务 panic 或被中止
    #[error("Background run aborted: {0}")]
    Join(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HiveError {
    /// 协议违规：不可恢复，终止运行
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            HiveError::UnknownResponseType(_)
                | HiveError::ResponseNotAllowed { .. }
                | HiveError::MissingChangeRequest
                | HiveError::MissingSandboxSession
                | HiveError::MissingField(_)
                | HiveError::UnknownRoute(_)
        )
    }
}
