//! Manager 工作流
//!
//! initialize_issue_link -> classify_message -> create_new_session | start_planner | 终止。
//! 分类的路由枚举来自配置（数据而非代码），no_op 总是存在并直接终止。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::{ManagerSection, RouteAction};
use crate::core::HiveError;
use crate::llm::{LlmClient, ModelRequest, ToolChoice, ToolSpec};
use crate::memory::Message;
use crate::pipeline::launcher::PlannerLauncher;
use crate::pipeline::planner::PlannerState;
use crate::pipeline::prompts;
use crate::plan::TaskPlan;
use crate::react::{EventSink, WorkflowEvent};
use crate::tools::parse_args;
use crate::workflow::{AgentSession, Next, StageGraph, StageInput, StageOutcome, Workflow};

pub const ROUTE_TOOL: &str = "respond_and_route";
pub const NO_OP_ROUTE: &str = "no_op";

/// 标题最大字符数
const TITLE_MAX_CHARS: usize = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStage {
    InitializeIssueLink,
    ClassifyMessage,
    CreateNewSession,
    StartPlanner,
}

/// 分类结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    NoOp,
    CreateNewSession,
    StartPlanner,
}

impl From<RouteAction> for Route {
    fn from(action: RouteAction) -> Self {
        match action {
            RouteAction::CreateNewSession => Route::CreateNewSession,
            RouteAction::StartPlanner => Route::StartPlanner,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RouteArgs {
    response: String,
    route: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerState {
    pub messages: Vec<Message>,
    pub task_plan: TaskPlan,
    #[serde(default)]
    pub issue_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// 分类器选择的标签
    #[serde(default)]
    pub route_label: Option<String>,
    #[serde(default)]
    pub route: Option<Route>,
    /// 分类器给用户的回复
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub planner_session: Option<AgentSession>,
}

impl ManagerState {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(request)],
            ..Self::default()
        }
    }

    /// 在已有会话上追加一条 follow-up 请求
    pub fn follow_up(task_plan: TaskPlan, mut messages: Vec<Message>, request: impl Into<String>) -> Self {
        messages.push(Message::user(request));
        Self {
            messages,
            task_plan,
            ..Self::default()
        }
    }

    pub fn with_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    fn latest_request(&self) -> Result<String, HiveError> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.clone())
            .ok_or(HiveError::MissingField("messages"))
    }
}

fn after_classify(s: &ManagerState) -> Next<ManagerStage> {
    match s.route {
        Some(Route::CreateNewSession) => Next::Stage(ManagerStage::CreateNewSession),
        Some(Route::StartPlanner) => Next::Stage(ManagerStage::StartPlanner),
        Some(Route::NoOp) | None => Next::End,
    }
}

fn derive_title(request: &str) -> String {
    let first = request.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let mut title: String = first.chars().take(TITLE_MAX_CHARS).collect();
    if first.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

pub struct ManagerWorkflow {
    config: ManagerSection,
    llm: Arc<dyn LlmClient>,
    launcher: Arc<dyn PlannerLauncher>,
    events: EventSink,
    graph: StageGraph<ManagerStage, ManagerState>,
}

impl ManagerWorkflow {
    pub fn new(
        config: ManagerSection,
        llm: Arc<dyn LlmClient>,
        launcher: Arc<dyn PlannerLauncher>,
    ) -> Result<Self, HiveError> {
        use ManagerStage::*;
        let graph = StageGraph::builder(InitializeIssueLink)
            .edge(InitializeIssueLink, ClassifyMessage)
            .conditional(ClassifyMessage, after_classify)
            .end(CreateNewSession)
            .end(StartPlanner)
            .build()?;
        Ok(Self {
            config,
            llm,
            launcher,
            events: EventSink::none(),
            graph,
        })
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// 全部路由标签（配置标签 + no_op）
    pub fn route_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .config
            .routes
            .iter()
            .map(|r| r.label.clone())
            .filter(|l| l != NO_OP_ROUTE)
            .collect();
        labels.push(NO_OP_ROUTE.to_string());
        labels
    }

    fn route_tool(&self) -> ToolSpec {
        ToolSpec::new(
            ROUTE_TOOL,
            "Respond to the user and route the latest message.",
            json!({
                "type": "object",
                "properties": {
                    "response": {
                        "type": "string",
                        "description": "Short response to show the user."
                    },
                    "route": {
                        "type": "string",
                        "enum": self.route_labels(),
                        "description": "Where to route the latest message."
                    }
                },
                "required": ["response", "route"]
            }),
        )
    }

    fn resolve_route(&self, label: &str) -> Result<Route, HiveError> {
        if label == NO_OP_ROUTE {
            return Ok(Route::NoOp);
        }
        self.config
            .routes
            .iter()
            .find(|r| r.label == label)
            .map(|r| Route::from(r.action))
            .ok_or_else(|| HiveError::UnknownRoute(label.to_string()))
    }

    async fn initialize_issue_link(&self, s: &mut ManagerState) -> Result<(), HiveError> {
        let request = s.latest_request()?;
        let issue = s
            .issue_id
            .get_or_insert_with(|| format!("issue_{}", uuid::Uuid::new_v4().simple()))
            .clone();
        if s.title.is_none() {
            s.title = Some(derive_title(&request));
        }
        info!(issue = %issue, "issue linked");
        Ok(())
    }

    async fn classify_message(&self, s: &mut ManagerState) -> Result<(), HiveError> {
        let request = ModelRequest::new(prompts::classify_prompt(&self.route_labels()), s.messages.clone())
            .with_tools(vec![self.route_tool()], ToolChoice::Tool(ROUTE_TOOL.to_string()));
        let response = self.llm.invoke(&request).await?;
        let (label, reply) = match response.find_call(ROUTE_TOOL) {
            Some(call) => {
                let args: RouteArgs = parse_args(ROUTE_TOOL, &call.args)?;
                (args.route, args.response)
            }
            None => (NO_OP_ROUTE.to_string(), response.content_or_empty().to_string()),
        };
        let route = self.resolve_route(&label)?;
        info!(label = %label, route = ?route, "message classified");
        if !reply.trim().is_empty() {
            s.messages.push(Message::assistant(reply.clone()));
        }
        s.route_label = Some(label);
        s.route = Some(route);
        s.response = Some(reply);
        Ok(())
    }

    async fn launch(&self, s: &mut ManagerState, task_plan: TaskPlan) -> Result<(), HiveError> {
        let request = s.latest_request()?;
        let mut task_plan = task_plan;
        let task_index = task_plan.create_task(request.clone()).task_index;
        let planner = PlannerState::for_task(task_plan.clone(), task_index, vec![Message::user(request)]);
        let session = self.launcher.launch(planner).await?;
        info!(thread_id = %session.thread_id, task_index, "planner launched");
        self.events.emit(WorkflowEvent::SessionLaunched {
            workflow: "planner".to_string(),
            thread_id: session.thread_id.clone(),
        });
        s.task_plan = task_plan;
        s.planner_session = Some(session);
        Ok(())
    }
}

#[async_trait]
impl Workflow for ManagerWorkflow {
    const NAME: &'static str = "manager";
    type Stage = ManagerStage;
    type State = ManagerState;

    fn graph(&self) -> &StageGraph<ManagerStage, ManagerState> {
        &self.graph
    }

    async fn run_stage(
        &self,
        stage: ManagerStage,
        state: &mut ManagerState,
        _input: StageInput,
    ) -> Result<StageOutcome, HiveError> {
        match stage {
            ManagerStage::InitializeIssueLink => self.initialize_issue_link(state).await?,
            ManagerStage::ClassifyMessage => self.classify_message(state).await?,
            ManagerStage::CreateNewSession => self.launch(state, TaskPlan::new()).await?,
            ManagerStage::StartPlanner => {
                let existing = state.task_plan.clone();
                self.launch(state, existing).await?
            }
        }
        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::launcher::RecordingLauncher;

    fn manager() -> ManagerWorkflow {
        ManagerWorkflow::new(
            ManagerSection::default(),
            Arc::new(MockLlmClient::new()),
            Arc::new(RecordingLauncher::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_route_labels_always_include_no_op() {
        let labels = manager().route_labels();
        assert_eq!(labels.last().map(String::as_str), Some(NO_OP_ROUTE));
        assert!(labels.contains(&"create_new_session".to_string()));
    }

    #[test]
    fn test_resolve_route() {
        let m = manager();
        assert_eq!(m.resolve_route("no_op").unwrap(), Route::NoOp);
        assert_eq!(m.resolve_route("start_planner_for_followup").unwrap(), Route::StartPlanner);
        assert!(matches!(
            m.resolve_route("delete_repo"),
            Err(HiveError::UnknownRoute(_))
        ));
    }

    #[test]
    fn test_route_schema_enumerates_labels() {
        let spec = manager().route_tool();
        let labels = spec.parameters["properties"]["route"]["enum"].as_array().unwrap().len();
        assert_eq!(labels, 4);
    }

    #[test]
    fn test_derive_title_uses_first_line() {
        assert_eq!(derive_title("\n  Fix login bug \nmore details"), "Fix login bug");
        let long = "x".repeat(100);
        assert_eq!(derive_title(&long).chars().count(), TITLE_MAX_CHARS + 3);
    }
}
