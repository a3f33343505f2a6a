//! Planner 工作流
//!
//! prepare -> initialize_sandbox -> generate_action <-> take_action（有界动作循环）-> generate_plan
//! -> summarize -> interrupt_approval -> 终止；审批时 respond 进入 rewrite_plan，再回到审批。
//! 每个候选计划（生成或重写）都立即作为 Planner 修订追加到任务上，但不生效；
//! accept 使候选修订生效，edit 追加并接受 Human 修订，respond 与 ignore 不改变生效修订。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PlannerSection;
use crate::core::HiveError;
use crate::llm::{ModelRequest, ModelResponse, ToolChoice, ToolSpec};
use crate::memory::Message;
use crate::plan::{numbered_plan, render_followup_context, PlanItem, RevisionSource, TaskPlan};
use crate::pipeline::prompts;
use crate::react::{actions_taken, close_dangling, should_take_action, ActionLoop};
use crate::tools::{parse_args, spec_for, SandboxLifecycle};
use crate::workflow::{
    ActionRequest, Decision, InterruptEnvelope, Next, StageGraph, StageInput, StageOutcome,
    Workflow,
};

/// 提交计划的工具名
pub const SESSION_PLAN_TOOL: &str = "session_plan";
/// 审批中断的动作名
pub const APPROVE_PLAN_ACTION: &str = "Approve Plan";

/// session_plan 工具参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionPlanArgs {
    /// 计划的简短标题
    pub title: String,
    /// 有序的计划步骤，每步一句话，不含代码
    pub plan: Vec<String>,
}

pub fn session_plan_spec() -> ToolSpec {
    spec_for::<SessionPlanArgs>(
        SESSION_PLAN_TOOL,
        "Propose the complete plan for the request as an ordered list of short steps.",
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStage {
    Prepare,
    InitializeSandbox,
    GenerateAction,
    TakeAction,
    GeneratePlan,
    Summarize,
    InterruptApproval,
    RewritePlan,
}

/// 计划所处的状态，路由函数据此决定下一阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    /// 最新消息不需要规划
    Skipped,
    /// 已生成候选计划，等待审批
    Proposed,
    Accepted,
    /// 收到修改意见，等待重写
    Revising,
    Ignored,
    /// 模型未调用计划工具，以澄清问题结束
    Clarifying,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerState {
    pub messages: Vec<Message>,
    pub task_plan: TaskPlan,
    /// 本次规划的任务；prepare 时为空则新建
    #[serde(default)]
    pub task_index: Option<u64>,
    #[serde(default)]
    pub sandbox_session_id: Option<String>,
    /// 收集上下文的动作预算
    #[serde(default)]
    pub action_budget: usize,
    #[serde(default)]
    pub plan_title: Option<String>,
    #[serde(default)]
    pub proposed_plan: Vec<String>,
    /// proposed_plan 对应的（尚未生效的）修订
    #[serde(default)]
    pub proposed_revision: Option<usize>,
    #[serde(default)]
    pub plan_context_summary: Option<String>,
    #[serde(default)]
    pub change_request: Option<String>,
    #[serde(default)]
    pub clarification: Option<String>,
    #[serde(default)]
    pub status: PlanStatus,
}

impl PlannerState {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(request)],
            ..Self::default()
        }
    }

    /// 针对已有计划中的某个任务规划（Manager 使用）
    pub fn for_task(task_plan: TaskPlan, task_index: u64, messages: Vec<Message>) -> Self {
        Self {
            messages,
            task_plan,
            task_index: Some(task_index),
            ..Self::default()
        }
    }

    pub fn with_sandbox_session(mut self, session_id: impl Into<String>) -> Self {
        self.sandbox_session_id = Some(session_id.into());
        self
    }

    /// 已接受的计划项（生效修订）；未接受时为空
    pub fn accepted_plan(&self) -> Vec<PlanItem> {
        if self.status != PlanStatus::Accepted {
            return Vec::new();
        }
        self.task_index
            .and_then(|i| self.task_plan.task(i).ok())
            .map(|t| t.active_items().to_vec())
            .unwrap_or_default()
    }

    fn task_request(&self) -> Result<String, HiveError> {
        let index = self.task_index.ok_or(HiveError::MissingField("task_index"))?;
        Ok(self.task_plan.task(index)?.request.clone())
    }
}

/// 按分隔符拆分编辑后的计划文本（去空白、丢弃空项）
pub fn split_plan(text: &str, delimiter: &str) -> Vec<String> {
    text.split(delimiter)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn after_prepare(s: &PlannerState) -> Next<PlannerStage> {
    if s.status == PlanStatus::Skipped {
        Next::End
    } else {
        Next::Stage(PlannerStage::InitializeSandbox)
    }
}

fn after_generate_action(s: &PlannerState) -> Next<PlannerStage> {
    if should_take_action(&s.messages, Some(s.action_budget)) {
        Next::Stage(PlannerStage::TakeAction)
    } else {
        Next::Stage(PlannerStage::GeneratePlan)
    }
}

fn after_plan_proposal(s: &PlannerState) -> Next<PlannerStage> {
    if s.status == PlanStatus::Proposed {
        Next::Stage(PlannerStage::Summarize)
    } else {
        Next::End
    }
}

fn after_approval(s: &PlannerState) -> Next<PlannerStage> {
    match s.status {
        PlanStatus::Revising => Next::Stage(PlannerStage::RewritePlan),
        _ => Next::End,
    }
}

fn after_rewrite(s: &PlannerState) -> Next<PlannerStage> {
    if s.status == PlanStatus::Proposed {
        Next::Stage(PlannerStage::InterruptApproval)
    } else {
        Next::End
    }
}

pub struct PlannerWorkflow {
    actions: ActionLoop,
    sandbox: Arc<dyn SandboxLifecycle>,
    config: PlannerSection,
    graph: StageGraph<PlannerStage, PlannerState>,
}

impl PlannerWorkflow {
    pub fn new(
        actions: ActionLoop,
        sandbox: Arc<dyn SandboxLifecycle>,
        config: PlannerSection,
    ) -> Result<Self, HiveError> {
        use PlannerStage::*;
        let graph = StageGraph::builder(Prepare)
            .conditional(Prepare, after_prepare)
            .edge(InitializeSandbox, GenerateAction)
            .conditional(GenerateAction, after_generate_action)
            .edge(TakeAction, GenerateAction)
            .conditional(GeneratePlan, after_plan_proposal)
            .edge(Summarize, InterruptApproval)
            .conditional(InterruptApproval, after_approval)
            .conditional(RewritePlan, after_rewrite)
            .build()?;
        Ok(Self {
            actions,
            sandbox,
            config,
            graph,
        })
    }

    async fn prepare(&self, s: &mut PlannerState) -> Result<(), HiveError> {
        let request = match s.messages.last() {
            Some(m) if m.is_user() => m.content.clone(),
            _ => {
                info!("latest message is not a user request, nothing to plan");
                s.status = PlanStatus::Skipped;
                return Ok(());
            }
        };
        s.action_budget = self.config.max_context_actions;
        let index = match s.task_index {
            Some(index) => s.task_plan.task(index)?.task_index,
            None => s.task_plan.create_task(request).task_index,
        };
        s.task_index = Some(index);
        s.status = PlanStatus::Pending;
        debug!(task_index = index, budget = s.action_budget, "planner prepared");
        Ok(())
    }

    async fn initialize_sandbox(&self, s: &mut PlannerState) -> Result<(), HiveError> {
        let session = s
            .sandbox_session_id
            .get_or_insert_with(|| format!("sbx_{}", uuid::Uuid::new_v4().simple()))
            .clone();
        self.sandbox
            .start(&session)
            .await
            .map_err(HiveError::Sandbox)?;
        info!(session = %session, "sandbox ready");
        Ok(())
    }

    fn system_with_history(&self, base: &str, s: &PlannerState) -> Result<String, HiveError> {
        let history = render_followup_context(&s.task_plan, s.task_index);
        Ok(prompts::with_history(base, &s.task_request()?, &history))
    }

    async fn generate_action(&self, s: &mut PlannerState) -> Result<(), HiveError> {
        let system = self.system_with_history(prompts::GATHER_CONTEXT_PROMPT, s)?;
        self.actions.next_action(&system, &mut s.messages).await
    }

    /// 要求模型调用 session_plan；未调用则视为澄清问题
    async fn request_plan(&self, system: String, s: &mut PlannerState) -> Result<(), HiveError> {
        let request = ModelRequest::new(system, s.messages.clone()).with_tools(
            vec![session_plan_spec()],
            ToolChoice::Tool(SESSION_PLAN_TOOL.to_string()),
        );
        let response = self.actions.llm().invoke(&request).await?;
        match response.find_call(SESSION_PLAN_TOOL) {
            Some(call) => {
                let args: SessionPlanArgs = parse_args(SESSION_PLAN_TOOL, &call.args)?;
                let plan: Vec<String> = args
                    .plan
                    .iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                if plan.is_empty() {
                    warn!("session_plan called without any steps");
                    self.clarify(s, &response);
                    return Ok(());
                }
                let index = s.task_index.ok_or(HiveError::MissingField("task_index"))?;
                let revision = s
                    .task_plan
                    .task_mut(index)?
                    .propose_revision(&plan, RevisionSource::Planner)?;
                info!(title = %args.title, steps = plan.len(), revision, "plan proposed");
                s.plan_title = Some(args.title);
                s.proposed_plan = plan;
                s.proposed_revision = Some(revision);
                s.clarification = None;
                s.status = PlanStatus::Proposed;
            }
            None => self.clarify(s, &response),
        }
        Ok(())
    }

    fn clarify(&self, s: &mut PlannerState, response: &ModelResponse) {
        let question = match response.content.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => "Could you clarify what you would like me to plan?".to_string(),
        };
        info!("model asked a clarifying question instead of proposing a plan");
        s.messages.push(Message::assistant(question.clone()));
        s.clarification = Some(question);
        s.status = PlanStatus::Clarifying;
    }

    async fn generate_plan(&self, s: &mut PlannerState) -> Result<(), HiveError> {
        close_dangling(&mut s.messages, s.action_budget, self.actions.events());
        let system = self.system_with_history(prompts::GENERATE_PLAN_PROMPT, s)?;
        self.request_plan(system, s).await
    }

    async fn summarize(&self, s: &mut PlannerState) -> Result<(), HiveError> {
        if actions_taken(&s.messages) == 0 {
            s.plan_context_summary = None;
            return Ok(());
        }
        let request = ModelRequest::new(prompts::SUMMARIZE_PROMPT, s.messages.clone());
        let response = self.actions.llm().invoke(&request).await?;
        s.plan_context_summary = response
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Ok(())
    }

    fn approval_envelope(&self, s: &PlannerState) -> InterruptEnvelope {
        let delimiter = &self.config.plan_delimiter;
        let title = s.plan_title.as_deref().unwrap_or("Proposed plan");
        InterruptEnvelope::new(
            ActionRequest::new(APPROVE_PLAN_ACTION)
                .with_arg("plan", s.proposed_plan.join(delimiter)),
            format!(
                "{}\n\n{}\n\nAccept the plan, edit it (steps separated by `{}`), respond with requested changes, or ignore it.",
                title,
                numbered_plan(&s.proposed_plan),
                delimiter
            ),
        )
    }

    /// 接受候选修订；没有记录候选修订时按 Planner 来源补一个
    fn accept_proposal(&self, s: &mut PlannerState) -> Result<(), HiveError> {
        let index = s.task_index.ok_or(HiveError::MissingField("task_index"))?;
        let task = s.task_plan.task_mut(index)?;
        let revision = match s.proposed_revision {
            Some(revision) => revision,
            None => task.propose_revision(&s.proposed_plan, RevisionSource::Planner)?,
        };
        task.accept_revision(revision)?;
        info!(task_index = index, revision, "plan accepted");
        s.proposed_revision = Some(revision);
        s.status = PlanStatus::Accepted;
        Ok(())
    }

    /// 追加并接受人工编辑后的修订
    fn accept_edit(&self, s: &mut PlannerState, plan: Vec<String>) -> Result<(), HiveError> {
        let index = s.task_index.ok_or(HiveError::MissingField("task_index"))?;
        let task = s.task_plan.task_mut(index)?;
        let revision = task.propose_revision(&plan, RevisionSource::Human)?;
        task.accept_revision(revision)?;
        info!(task_index = index, revision, steps = plan.len(), "edited plan accepted");
        s.proposed_plan = plan;
        s.proposed_revision = Some(revision);
        s.status = PlanStatus::Accepted;
        Ok(())
    }

    async fn interrupt_approval(
        &self,
        s: &mut PlannerState,
        input: StageInput,
    ) -> Result<StageOutcome, HiveError> {
        if self.config.auto_accept_plan {
            self.accept_proposal(s)?;
            return Ok(StageOutcome::Continue);
        }
        let Some(resumption) = input else {
            return Ok(StageOutcome::Interrupt(self.approval_envelope(s)));
        };
        match resumption.resolve()? {
            Decision::Apply { edited: false, .. } => self.accept_proposal(s)?,
            Decision::Apply {
                edited: true,
                request,
            } => {
                let text = request
                    .arg_str("plan")
                    .ok_or(HiveError::MissingField("plan"))?;
                let plan = split_plan(text, &self.config.plan_delimiter);
                if plan.is_empty() {
                    return Err(HiveError::MissingField("plan"));
                }
                self.accept_edit(s, plan)?;
            }
            Decision::Respond(feedback) => {
                info!("plan change requested");
                s.change_request = Some(feedback);
                s.status = PlanStatus::Revising;
            }
            Decision::Ignore => {
                info!("plan ignored");
                s.status = PlanStatus::Ignored;
            }
        }
        Ok(StageOutcome::Continue)
    }

    async fn rewrite_plan(&self, s: &mut PlannerState) -> Result<(), HiveError> {
        let change_request = s
            .change_request
            .clone()
            .ok_or(HiveError::MissingChangeRequest)?;
        let system = prompts::rewrite_prompt(&s.task_request()?, &s.proposed_plan, &change_request);
        self.request_plan(system, s).await?;
        if s.status == PlanStatus::Proposed {
            s.change_request = None;
        }
        Ok(())
    }
}

#[async_trait]
impl Workflow for PlannerWorkflow {
    const NAME: &'static str = "planner";
    type Stage = PlannerStage;
    type State = PlannerState;

    fn graph(&self) -> &StageGraph<PlannerStage, PlannerState> {
        &self.graph
    }

    async fn run_stage(
        &self,
        stage: PlannerStage,
        state: &mut PlannerState,
        input: StageInput,
    ) -> Result<StageOutcome, HiveError> {
        match stage {
            PlannerStage::Prepare => self.prepare(state).await?,
            PlannerStage::InitializeSandbox => self.initialize_sandbox(state).await?,
            PlannerStage::GenerateAction => self.generate_action(state).await?,
            PlannerStage::TakeAction => {
                self.actions
                    .take_action(&mut state.messages, state.sandbox_session_id.as_deref())
                    .await?;
            }
            PlannerStage::GeneratePlan => self.generate_plan(state).await?,
            PlannerStage::Summarize => self.summarize(state).await?,
            PlannerStage::InterruptApproval => {
                return self.interrupt_approval(state, input).await;
            }
            PlannerStage::RewritePlan => self.rewrite_plan(state).await?,
        }
        Ok(StageOutcome::Continue)
    }

    fn sandbox_session(&self, state: &PlannerState) -> Option<String> {
        state.sandbox_session_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;

    #[test]
    fn test_split_plan_trims_and_drops_empty() {
        assert_eq!(
            split_plan(" Add auth :::Add docs::: ::: ", ":::"),
            vec!["Add auth".to_string(), "Add docs".to_string()]
        );
    }

    #[test]
    fn test_generate_action_routing_respects_budget() {
        let mut s = PlannerState::new("do it");
        s.action_budget = 1;
        s.messages.push(Message::assistant_with_calls(
            "",
            vec![ToolCall::new("ls", serde_json::json!({}))],
        ));
        assert_eq!(after_generate_action(&s), Next::Stage(PlannerStage::TakeAction));
        s.action_budget = 0;
        assert_eq!(after_generate_action(&s), Next::Stage(PlannerStage::GeneratePlan));
    }

    #[test]
    fn test_approval_routing() {
        let mut s = PlannerState::default();
        s.status = PlanStatus::Revising;
        assert_eq!(after_approval(&s), Next::Stage(PlannerStage::RewritePlan));
        s.status = PlanStatus::Ignored;
        assert_eq!(after_approval(&s), Next::End);
        s.status = PlanStatus::Clarifying;
        assert_eq!(after_rewrite(&s), Next::End);
        s.status = PlanStatus::Proposed;
        assert_eq!(after_rewrite(&s), Next::Stage(PlannerStage::InterruptApproval));
    }

    #[test]
    fn test_session_plan_schema() {
        let spec = session_plan_spec();
        assert_eq!(spec.name, SESSION_PLAN_TOOL);
        assert!(spec.parameters["properties"]["plan"].is_object());
        assert!(spec.parameters["properties"]["title"].is_object());
    }
}
