//! 流水线层：Manager / Planner / Reviewer 工作流与 CLI 使用的 Pipeline 门面
//!
//! submit 启动一次 Manager 运行，Manager 分类后以后台任务启动 Planner；
//! resume 接受 Manager 或 Planner 的运行 ID，把人工响应转给 Planner 的挂起点；
//! review 针对计划已被接受的 Planner 运行启动 Reviewer；Reviewer 记录其来源 Planner，
//! 之后的 follow-up 与再次审查都从「Planner 或其后最近完成的 Reviewer」中取最新的计划。
//! recover 重新驱动因进程崩溃而停在 Running 的运行。

pub mod launcher;
pub mod manager;
pub mod planner;
pub mod prompts;
pub mod reviewer;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::{HiveError, RunSupervisor};
use crate::llm::LlmClient;
use crate::memory::{Checkpoint, CheckpointStore};
use crate::plan::TaskPlan;
use crate::react::{ActionLoop, EventSink};
use crate::tools::{SandboxLifecycle, ToolExecutor};
use crate::workflow::{HumanResponse, RunReport, RunStatus, Workflow, WorkflowEngine};

pub use launcher::{EngineLauncher, PlannerLauncher, RecordingLauncher};
pub use manager::{ManagerStage, ManagerState, ManagerWorkflow, Route, NO_OP_ROUTE, ROUTE_TOOL};
pub use planner::{
    split_plan, PlanStatus, PlannerStage, PlannerState, PlannerWorkflow, APPROVE_PLAN_ACTION,
    SESSION_PLAN_TOOL,
};
pub use reviewer::{
    ReviewVerdict, ReviewerStage, ReviewerState, ReviewerWorkflow, MARK_COMPLETED_TOOL,
    MARK_NOT_COMPLETE_TOOL,
};

/// 一次 submit 的结果：Manager 运行报告 + 由它启动的 Planner（若有）
#[derive(Debug)]
pub struct Submission {
    pub manager: RunReport<ManagerState>,
    pub planner: Option<RunReport<PlannerState>>,
}

/// 流水线门面
pub struct Pipeline {
    config: AppConfig,
    store: Arc<dyn CheckpointStore>,
    manager: WorkflowEngine<ManagerWorkflow>,
    planner: Arc<WorkflowEngine<PlannerWorkflow>>,
    reviewer: WorkflowEngine<ReviewerWorkflow>,
    launcher: Arc<EngineLauncher>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        store: Arc<dyn CheckpointStore>,
        sandbox: Arc<dyn SandboxLifecycle>,
        events: EventSink,
    ) -> Result<Self, HiveError> {
        let supervisor = RunSupervisor::new();
        let read_only_tools = executor.tool_names();
        let max_transitions = config.engine.max_transitions;

        let planner_loop = ActionLoop::new(llm.clone(), executor.clone(), read_only_tools.clone())
            .with_events(events.clone());
        let planner_workflow =
            PlannerWorkflow::new(planner_loop, sandbox.clone(), config.planner.clone())?;
        let planner = Arc::new(
            WorkflowEngine::new(Arc::new(planner_workflow), store.clone(), sandbox.clone())
                .with_max_transitions(max_transitions)
                .with_supervisor(supervisor.clone())
                .with_events(events.clone()),
        );

        let launcher = Arc::new(EngineLauncher::new(planner.clone()));
        let manager_workflow =
            ManagerWorkflow::new(config.manager.clone(), llm.clone(), launcher.clone())?
                .with_events(events.clone());
        let manager = WorkflowEngine::new(Arc::new(manager_workflow), store.clone(), sandbox.clone())
            .with_max_transitions(max_transitions)
            .with_supervisor(supervisor.clone())
            .with_events(events.clone());

        let reviewer_loop =
            ActionLoop::new(llm, executor, read_only_tools).with_events(events.clone());
        let reviewer_workflow = ReviewerWorkflow::new(reviewer_loop, sandbox.clone())?;
        let reviewer = WorkflowEngine::new(Arc::new(reviewer_workflow), store.clone(), sandbox)
            .with_max_transitions(max_transitions)
            .with_supervisor(supervisor)
            .with_events(events);

        Ok(Self {
            config,
            store,
            manager,
            planner,
            reviewer,
            launcher,
        })
    }

    pub fn planner_engine(&self) -> &Arc<WorkflowEngine<PlannerWorkflow>> {
        &self.planner
    }

    pub fn manager_engine(&self) -> &WorkflowEngine<ManagerWorkflow> {
        &self.manager
    }

    pub fn reviewer_engine(&self) -> &WorkflowEngine<ReviewerWorkflow> {
        &self.reviewer
    }

    /// 提交请求；follow_up 为此前的 Manager 运行 ID 时在同一会话的计划上继续
    pub async fn submit(
        &self,
        request: &str,
        follow_up: Option<&str>,
    ) -> Result<Submission, HiveError> {
        let state = match follow_up {
            None => ManagerState::new(request),
            Some(previous_run) => self.follow_up_state(previous_run, request).await?,
        };
        let manager = self.manager.start(state).await?;
        let planner = match &manager.state.planner_session {
            Some(session) => {
                info!(manager = %manager.session.thread_id, planner = %session.thread_id, "waiting for planner");
                self.launcher.join(&session.thread_id).await?
            }
            None => None,
        };
        Ok(Submission { manager, planner })
    }

    async fn follow_up_state(
        &self,
        previous_run: &str,
        request: &str,
    ) -> Result<ManagerState, HiveError> {
        let previous = self.manager.state(previous_run).await?;
        // 子运行上的计划比 Manager 记录的副本更新
        let task_plan = match &previous.planner_session {
            Some(session) => match self.latest_plan(&session.thread_id).await {
                Ok(plan) => plan,
                Err(HiveError::RunNotFound(_)) => previous.task_plan.clone(),
                Err(e) => return Err(e),
            },
            None => previous.task_plan.clone(),
        };
        let mut state = ManagerState::follow_up(task_plan, previous.messages, request);
        state.issue_id = previous.issue_id;
        state.title = previous.title;
        Ok(state)
    }

    /// 以人工响应恢复计划审批；run_id 可以是 Manager 或 Planner 的运行
    pub async fn resume(
        &self,
        run_id: &str,
        response: HumanResponse,
    ) -> Result<RunReport<PlannerState>, HiveError> {
        let checkpoint = self.checkpoint(run_id).await?;
        let planner_run = if checkpoint.workflow == ManagerWorkflow::NAME {
            let state: ManagerState = serde_json::from_value(checkpoint.state)?;
            state
                .planner_session
                .map(|s| s.thread_id)
                .ok_or_else(|| HiveError::NotAwaiting(run_id.to_string()))?
        } else if checkpoint.workflow == PlannerWorkflow::NAME {
            run_id.to_string()
        } else {
            return Err(HiveError::WorkflowMismatch {
                run_id: run_id.to_string(),
                expected: PlannerWorkflow::NAME.to_string(),
                actual: checkpoint.workflow,
            });
        };
        self.planner.resume(&planner_run, response).await
    }

    /// 审查一个计划已被接受的 Planner 运行
    pub async fn review(&self, planner_run: &str) -> Result<RunReport<ReviewerState>, HiveError> {
        let planner = self.planner.state(planner_run).await?;
        if planner.status != PlanStatus::Accepted {
            return Err(HiveError::MissingField("accepted_plan"));
        }
        let task_index = planner
            .task_index
            .ok_or(HiveError::MissingField("task_index"))?;
        let session = planner
            .sandbox_session_id
            .ok_or(HiveError::MissingSandboxSession)?;
        let task_plan = self.latest_plan(planner_run).await?;
        let state = ReviewerState::new(task_plan, task_index, session)
            .with_max_review_actions(self.config.reviewer.max_review_actions)
            .with_planner_run(planner_run);
        self.reviewer.start(state).await
    }

    /// Planner 运行所在会话的最新计划：Planner 自身的计划，或之后完成的最近一次审查结果
    pub async fn latest_plan(&self, planner_run: &str) -> Result<TaskPlan, HiveError> {
        let planner = self.planner.checkpoint(planner_run).await?;
        let mut latest = (planner.updated_at, planner.created_at);
        let mut plan = serde_json::from_value::<PlannerState>(planner.state)?.task_plan;

        let prefix = format!("{}_", ReviewerWorkflow::NAME);
        for run_id in self.store.list().await? {
            if !run_id.starts_with(&prefix) {
                continue;
            }
            let Some(checkpoint) = self.store.load(&run_id).await? else {
                continue;
            };
            let at = (checkpoint.updated_at, checkpoint.created_at);
            if checkpoint.status != RunStatus::Completed || at < latest {
                continue;
            }
            let review: ReviewerState = serde_json::from_value(checkpoint.state)?;
            if review.planner_run.as_deref() == Some(planner_run) {
                latest = at;
                plan = review.task_plan;
            }
        }
        Ok(plan)
    }

    /// 重新驱动因进程退出而停在 Running 的运行，返回驱动后的状态
    pub async fn recover(&self, run_id: &str) -> Result<RunStatus, HiveError> {
        let checkpoint = self.checkpoint(run_id).await?;
        match checkpoint.workflow.as_str() {
            w if w == ManagerWorkflow::NAME => {
                let report = self.manager.recover(run_id).await?;
                if let Some(session) = &report.state.planner_session {
                    self.launcher.join(&session.thread_id).await?;
                }
                Ok(report.status)
            }
            w if w == PlannerWorkflow::NAME => Ok(self.planner.recover(run_id).await?.status),
            _ => Ok(self.reviewer.recover(run_id).await?.status),
        }
    }

    /// 等待仍在后台驱动的 Planner（进程退出前调用）
    pub async fn shutdown(&self) -> Result<(), HiveError> {
        for result in self.launcher.drain().await? {
            if let Err(e) = result {
                warn!(error = %e, "background planner failed");
            }
        }
        Ok(())
    }

    pub async fn cancel(&self, run_id: &str) -> Result<RunStatus, HiveError> {
        let checkpoint = self.checkpoint(run_id).await?;
        match checkpoint.workflow.as_str() {
            w if w == ManagerWorkflow::NAME => self.manager.cancel(run_id).await,
            w if w == PlannerWorkflow::NAME => self.planner.cancel(run_id).await,
            _ => self.reviewer.cancel(run_id).await,
        }
    }

    /// 任意运行的原始检查点
    pub async fn checkpoint(&self, run_id: &str) -> Result<Checkpoint, HiveError> {
        self.store
            .load(run_id)
            .await?
            .ok_or_else(|| HiveError::RunNotFound(run_id.to_string()))
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatus, HiveError> {
        Ok(self.checkpoint(run_id).await?.status)
    }

    pub async fn runs(&self) -> Result<Vec<String>, HiveError> {
        self.store.list().await
    }
}
