//! Reviewer 工作流
//!
//! initialize -> generate_review_action <-> take_review_action（工具失败时先经 diagnose_error）
//! -> final_review -> 终止。审查循环在模型不再请求工具时结束；默认不设动作预算。
//! final_review 给出接受 / 拒绝结论，拒绝时把后续动作作为新修订追加到任务上。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::HiveError;
use crate::llm::{ModelRequest, ToolChoice};
use crate::memory::Message;
use crate::pipeline::prompts;
use crate::plan::{format_plan_items, RevisionSource, TaskPlan};
use crate::react::{close_dangling, last_action_failed, should_take_action, ActionLoop};
use crate::tools::{parse_args, spec_for, SandboxLifecycle};
use crate::workflow::{Next, StageGraph, StageInput, StageOutcome, Workflow};

pub const MARK_COMPLETED_TOOL: &str = "mark_task_completed";
pub const MARK_NOT_COMPLETE_TOOL: &str = "mark_task_not_complete";

/// mark_task_completed 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MarkCompletedArgs {
    /// 对已完成工作的简短评价
    pub review: String,
}

/// mark_task_not_complete 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MarkNotCompleteArgs {
    /// 未完成原因的简短评价
    pub review: String,
    /// 仍需执行的后续动作
    pub additional_actions: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerStage {
    Initialize,
    GenerateReviewAction,
    TakeReviewAction,
    DiagnoseError,
    FinalReview,
}

/// 审查结论
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewVerdict {
    pub accepted: bool,
    pub review: String,
    #[serde(default)]
    pub follow_up_actions: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerState {
    pub messages: Vec<Message>,
    pub task_plan: TaskPlan,
    pub task_index: Option<u64>,
    pub sandbox_session_id: Option<String>,
    /// None 表示审查循环不设预算
    #[serde(default)]
    pub max_review_actions: Option<usize>,
    #[serde(default)]
    pub verdict: Option<ReviewVerdict>,
    /// 计划来源的 Planner 运行；审查后的计划据此回流到会话
    #[serde(default)]
    pub planner_run: Option<String>,
}

impl ReviewerState {
    pub fn new(task_plan: TaskPlan, task_index: u64, sandbox_session_id: impl Into<String>) -> Self {
        Self {
            task_plan,
            task_index: Some(task_index),
            sandbox_session_id: Some(sandbox_session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_max_review_actions(mut self, max: Option<usize>) -> Self {
        self.max_review_actions = max;
        self
    }

    pub fn with_planner_run(mut self, run_id: impl Into<String>) -> Self {
        self.planner_run = Some(run_id.into());
        self
    }
}

fn after_review_action(s: &ReviewerState) -> Next<ReviewerStage> {
    if should_take_action(&s.messages, s.max_review_actions) {
        Next::Stage(ReviewerStage::TakeReviewAction)
    } else {
        Next::Stage(ReviewerStage::FinalReview)
    }
}

fn after_take_review_action(s: &ReviewerState) -> Next<ReviewerStage> {
    if last_action_failed(&s.messages) {
        Next::Stage(ReviewerStage::DiagnoseError)
    } else {
        Next::Stage(ReviewerStage::GenerateReviewAction)
    }
}

pub struct ReviewerWorkflow {
    actions: ActionLoop,
    sandbox: Arc<dyn SandboxLifecycle>,
    graph: StageGraph<ReviewerStage, ReviewerState>,
}

impl ReviewerWorkflow {
    pub fn new(actions: ActionLoop, sandbox: Arc<dyn SandboxLifecycle>) -> Result<Self, HiveError> {
        use ReviewerStage::*;
        let graph = StageGraph::builder(Initialize)
            .edge(Initialize, GenerateReviewAction)
            .conditional(GenerateReviewAction, after_review_action)
            .conditional(TakeReviewAction, after_take_review_action)
            .edge(DiagnoseError, GenerateReviewAction)
            .end(FinalReview)
            .build()?;
        Ok(Self {
            actions,
            sandbox,
            graph,
        })
    }

    async fn initialize(&self, s: &mut ReviewerState) -> Result<(), HiveError> {
        let session = s
            .sandbox_session_id
            .clone()
            .ok_or(HiveError::MissingSandboxSession)?;
        let index = s.task_index.ok_or(HiveError::MissingField("task_index"))?;
        let task = s.task_plan.task(index)?;
        let review_request = format!(
            "Review the work done for this request.\n\n<request>\n{}\n</request>\n\n<plan>\n{}\n</plan>",
            task.request,
            format_plan_items(task.active_items())
        );
        self.sandbox
            .start(&session)
            .await
            .map_err(HiveError::Sandbox)?;
        s.messages.push(Message::user(review_request));
        info!(task_index = index, session = %session, "review started");
        Ok(())
    }

    async fn diagnose_error(&self, s: &mut ReviewerState) -> Result<(), HiveError> {
        let request = ModelRequest::new(prompts::DIAGNOSE_ERROR_PROMPT, s.messages.clone());
        let response = self.actions.llm().invoke(&request).await?;
        let hint = response.content_or_empty().trim().to_string();
        info!("diagnosed failed review action");
        s.messages.push(Message::user(format!(
            "<diagnosis>\n{}\n</diagnosis>",
            if hint.is_empty() {
                "The previous tool call failed. Try a different approach."
            } else {
                hint.as_str()
            }
        )));
        Ok(())
    }

    async fn final_review(&self, s: &mut ReviewerState) -> Result<(), HiveError> {
        if let Some(max) = s.max_review_actions {
            close_dangling(&mut s.messages, max, self.actions.events());
        }
        let request = ModelRequest::new(prompts::FINAL_REVIEW_PROMPT, s.messages.clone())
            .with_tools(
                vec![
                    spec_for::<MarkCompletedArgs>(
                        MARK_COMPLETED_TOOL,
                        "Mark the task as completed.",
                    ),
                    spec_for::<MarkNotCompleteArgs>(
                        MARK_NOT_COMPLETE_TOOL,
                        "Mark the task as not complete and list the additional actions required.",
                    ),
                ],
                ToolChoice::Any,
            );
        let response = self.actions.llm().invoke(&request).await?;
        let index = s.task_index.ok_or(HiveError::MissingField("task_index"))?;

        let verdict = if let Some(call) = response.find_call(MARK_NOT_COMPLETE_TOOL) {
            let args: MarkNotCompleteArgs = parse_args(MARK_NOT_COMPLETE_TOOL, &call.args)?;
            // follow-up actions 取代所有未完成项
            let task = s.task_plan.task_mut(index)?;
            let revision = task.revise_remaining(&args.additional_actions, RevisionSource::Reviewer)?;
            task.accept_revision(revision)?;
            ReviewVerdict {
                accepted: false,
                review: args.review,
                follow_up_actions: args.additional_actions,
            }
        } else {
            let review = match response.find_call(MARK_COMPLETED_TOOL) {
                Some(call) => parse_args::<MarkCompletedArgs>(MARK_COMPLETED_TOOL, &call.args)?.review,
                None => response.content_or_empty().trim().to_string(),
            };
            s.task_plan.task_mut(index)?.complete(review.clone());
            ReviewVerdict {
                accepted: true,
                review,
                follow_up_actions: Vec::new(),
            }
        };
        info!(
            task_index = index,
            accepted = verdict.accepted,
            follow_ups = verdict.follow_up_actions.len(),
            "review finished"
        );
        s.verdict = Some(verdict);
        Ok(())
    }
}

#[async_trait]
impl Workflow for ReviewerWorkflow {
    const NAME: &'static str = "reviewer";
    type Stage = ReviewerStage;
    type State = ReviewerState;

    fn graph(&self) -> &StageGraph<ReviewerStage, ReviewerState> {
        &self.graph
    }

    async fn run_stage(
        &self,
        stage: ReviewerStage,
        state: &mut ReviewerState,
        _input: StageInput,
    ) -> Result<StageOutcome, HiveError> {
        match stage {
            ReviewerStage::Initialize => self.initialize(state).await?,
            ReviewerStage::GenerateReviewAction => {
                self.actions
                    .next_action(prompts::REVIEW_ACTIONS_PROMPT, &mut state.messages)
                    .await?
            }
            ReviewerStage::TakeReviewAction => {
                self.actions
                    .take_action(&mut state.messages, state.sandbox_session_id.as_deref())
                    .await?;
            }
            ReviewerStage::DiagnoseError => self.diagnose_error(state).await?,
            ReviewerStage::FinalReview => self.final_review(state).await?,
        }
        Ok(StageOutcome::Continue)
    }

    fn sandbox_session(&self, state: &ReviewerState) -> Option<String> {
        state.sandbox_session_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ToolCall, ToolStatus};
    use serde_json::json;

    #[test]
    fn test_failed_action_routes_to_diagnosis() {
        let call = ToolCall::new("view", json!({ "path": "missing.rs" }));
        let mut s = ReviewerState::default();
        s.messages.push(Message::assistant_with_calls("", vec![call.clone()]));
        s.messages
            .push(Message::tool_result(&call, "ERROR: not found", ToolStatus::Error));
        assert_eq!(after_take_review_action(&s), Next::Stage(ReviewerStage::DiagnoseError));

        s.messages.pop();
        s.messages
            .push(Message::tool_result(&call, "fn main() {}", ToolStatus::Success));
        assert_eq!(
            after_take_review_action(&s),
            Next::Stage(ReviewerStage::GenerateReviewAction)
        );
    }

    #[test]
    fn test_review_loop_is_unbounded_by_default() {
        let mut s = ReviewerState::default();
        for _ in 0..10 {
            let call = ToolCall::new("ls", json!({}));
            s.messages.push(Message::assistant_with_calls("", vec![call.clone()]));
            s.messages.push(Message::tool_result(&call, "ok", ToolStatus::Success));
        }
        s.messages.push(Message::assistant_with_calls(
            "",
            vec![ToolCall::new("ls", json!({}))],
        ));
        assert_eq!(after_review_action(&s), Next::Stage(ReviewerStage::TakeReviewAction));
        s.max_review_actions = Some(10);
        assert_eq!(after_review_action(&s), Next::Stage(ReviewerStage::FinalReview));
    }
}
