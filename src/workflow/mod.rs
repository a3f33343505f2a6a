//! 工作流层：阶段图、中断 / 恢复协议、带检查点的执行引擎

pub mod engine;
pub mod graph;
pub mod interrupt;
pub mod types;

pub use engine::{Workflow, WorkflowEngine, DEFAULT_MAX_TRANSITIONS};
pub use graph::{Next, Router, StageGraph, StageGraphBuilder};
pub use interrupt::{
    resolve, ActionRequest, Decision, HumanResponse, InterruptConfig, InterruptEnvelope, Resumption,
};
pub use types::{AgentSession, RunId, RunReport, RunStatus, StageInput, StageOutcome};
