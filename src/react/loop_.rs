//! 有界动作循环（Bounded Action Loop）
//!
//! next_action -> （路由）-> take_action -> next_action ... 直到模型不再请求工具或预算耗尽。
//! 预算按轮计：每轮模型输出只保留第一个工具调用，已执行的动作数 = 日志中 tool 消息条数。
//! 预算耗尽时最后一个调用未执行，进入总结阶段前由 close_dangling 补上合成结果，保持日志良构。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::HiveError;
use crate::llm::{LlmClient, ModelRequest, ToolChoice};
use crate::memory::{dangling_tool_call, Message, Role, ToolStatus};
use crate::react::events::{preview, EventSink, WorkflowEvent, OBSERVATION_PREVIEW_CHARS};
use crate::tools::{ToolExecutor, ToolOutcome};

/// 工具失败结果的前缀
pub const TOOL_ERROR_PREFIX: &str = "ERROR:";

/// 日志中已执行的动作数（tool 消息条数）
pub fn actions_taken(log: &[Message]) -> usize {
    log.iter().filter(|m| m.role == Role::Tool).count()
}

/// 路由谓词：最后一条消息请求了工具且预算未耗尽
pub fn should_take_action(log: &[Message], max_actions: Option<usize>) -> bool {
    let wants_tool = log.last().map(Message::has_tool_calls).unwrap_or(false);
    wants_tool && max_actions.map_or(true, |max| actions_taken(log) < max)
}

/// 最近一条工具结果是否失败
pub fn last_action_failed(log: &[Message]) -> bool {
    log.last()
        .map(|m| m.role == Role::Tool && m.status == Some(ToolStatus::Error))
        .unwrap_or(false)
}

/// 为预算耗尽时未执行的调用补上合成结果；无悬挂调用时返回 false
pub fn close_dangling(log: &mut Vec<Message>, max_actions: usize, events: &EventSink) -> bool {
    let Some(call) = dangling_tool_call(log).cloned() else {
        return false;
    };
    warn!(tool = %call.name, max_actions, "action budget exhausted, closing dangling tool call");
    events.emit(WorkflowEvent::BudgetExhausted {
        tool: call.name.clone(),
        max_actions,
    });
    log.push(Message::tool_result(
        &call,
        format!(
            "Tool call not executed: action budget of {} exhausted.",
            max_actions
        ),
        ToolStatus::Error,
    ));
    true
}

/// 动作循环：模型 + 只读工具白名单
pub struct ActionLoop {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    allowed_tools: Vec<String>,
    events: EventSink,
}

impl ActionLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        allowed_tools: Vec<String>,
    ) -> Self {
        Self {
            llm,
            executor,
            allowed_tools,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn allowed_tools(&self) -> &[String] {
        &self.allowed_tools
    }

    /// 调用模型（tool_choice = Auto，仅白名单工具），把输出追加到日志；
    /// 多个工具调用时只保留第一个
    pub async fn next_action(&self, system: &str, log: &mut Vec<Message>) -> Result<(), HiveError> {
        let request = ModelRequest::new(system, log.clone()).with_tools(
            self.executor.specs(Some(&self.allowed_tools)),
            ToolChoice::Auto,
        );
        let mut response = self.llm.invoke(&request).await?;
        if response.tool_calls.len() > 1 {
            let dropped = response.tool_calls.len() - 1;
            response.tool_calls.truncate(1);
            let kept = response.tool_calls[0].name.clone();
            warn!(kept = %kept, dropped, "model requested multiple tool calls, keeping the first");
            self.events
                .emit(WorkflowEvent::ExtraToolCallsDropped { kept, dropped });
        }
        debug!(
            tool_calls = response.tool_calls.len(),
            "next action generated"
        );
        log.push(response.to_message());
        Ok(())
    }

    /// 执行最后一条 assistant 消息中的工具调用，追加结果消息。
    /// 需要沙箱会话；工具失败不是错误，而是以 ERROR: 前缀的结果返回给模型
    pub async fn take_action(
        &self,
        log: &mut Vec<Message>,
        sandbox_session: Option<&str>,
    ) -> Result<ToolOutcome, HiveError> {
        let session = sandbox_session.ok_or(HiveError::MissingSandboxSession)?;
        let call = dangling_tool_call(log)
            .cloned()
            .ok_or(HiveError::MissingField("tool_call"))?;
        self.events.emit(WorkflowEvent::ToolCall {
            tool: call.name.clone(),
            args: call.args.clone(),
        });

        let outcome = if self.allowed_tools.iter().any(|t| t == &call.name) {
            debug!(tool = %call.name, session, "executing tool");
            self.executor.execute(&call.name, call.args.clone()).await
        } else {
            ToolOutcome::error(format!("Tool {} is not available.", call.name))
        };
        let content = if outcome.is_error() {
            format!("{} {}", TOOL_ERROR_PREFIX, outcome.result)
        } else {
            outcome.result.clone()
        };
        self.events.emit(WorkflowEvent::Observation {
            tool: call.name.clone(),
            preview: preview(&content, OBSERVATION_PREVIEW_CHARS),
            ok: !outcome.is_error(),
        });
        log.push(Message::tool_result(&call, content, outcome.status));
        Ok(outcome)
    }
}
