//! 消息日志
//!
//! 工作流状态中的有序消息/事件日志：user / assistant（可带 tool_calls）/ tool（工具结果）。
//! 「良构」日志要求每个 tool call 之后恰有一条同 id 的 tool 消息。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 工具执行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// 模型发出的工具调用请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅 tool 消息：对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// 仅 tool 消息：工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            status: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    /// 带工具调用的 assistant 消息
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content.into())
        }
    }

    /// 工具结果消息
    pub fn tool_result(call: &ToolCall, content: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            status: Some(status),
            ..Self::plain(Role::Tool, content.into())
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// 日志中最后一个尚未有结果的工具调用（用于补齐预算耗尽时的结果）
pub fn dangling_tool_call(log: &[Message]) -> Option<&ToolCall> {
    let last = log.last()?;
    if !last.has_tool_calls() {
        return None;
    }
    last.tool_calls.first()
}

/// 检查日志是否良构：每个工具调用后紧跟对应的 tool 消息
pub fn is_well_formed(log: &[Message]) -> bool {
    let mut pending: Vec<&str> = Vec::new();
    for msg in log {
        match msg.role {
            Role::Assistant => {
                if !pending.is_empty() {
                    return false;
                }
                pending = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
                pending.reverse();
            }
            Role::Tool => match (pending.pop(), msg.tool_call_id.as_deref()) {
                (Some(expected), Some(actual)) if expected == actual => {}
                _ => return false,
            },
            Role::User | Role::System => {
                if !pending.is_empty() {
                    return false;
                }
            }
        }
    }
    pending.is_empty()
}
