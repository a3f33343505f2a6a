//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；使用 function calling
//! 传递工具与 tool_choice，并关闭并行工具调用。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse, ToolChoice};
use crate::memory::{Message, Role, ToolCall};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            usage: TokenUsage::new(),
        }
    }

    fn build_request(&self, request: &ModelRequest) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut messages = vec![ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.clone())
                .build()
                .map_err(invalid_request)?,
        )];
        for m in &request.messages {
            messages.push(to_openai_message(m)?);
        }

        let mut built = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(invalid_request)?;

        if !request.tools.is_empty() && request.tool_choice != ToolChoice::None {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            let choice = match &request.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Any => json!("required"),
                ToolChoice::Tool(name) => {
                    json!({ "type": "function", "function": { "name": name } })
                }
                ToolChoice::None => json!("none"),
            };
            built.tools = Some(serde_json::from_value(Value::Array(tools)).map_err(invalid_request)?);
            built.tool_choice = Some(serde_json::from_value(choice).map_err(invalid_request)?);
            // 一次只执行一个工具调用
            built.parallel_tool_calls = Some(false);
        }
        Ok(built)
    }
}

fn invalid_request(e: impl std::fmt::Display) -> LlmError {
    LlmError::InvalidRequest(e.to_string())
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let message = match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid_request)?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid_request)?,
        ),
        Role::Assistant => {
            let mut assistant = ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid_request)?;
            if !m.tool_calls.is_empty() {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.args.to_string() }
                        })
                    })
                    .collect();
                assistant.tool_calls =
                    Some(serde_json::from_value(Value::Array(calls)).map_err(invalid_request)?);
            }
            ChatCompletionRequestMessage::Assistant(assistant)
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(m.content.clone())
                .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                .build()
                .map_err(invalid_request)?,
        ),
    };
    Ok(message)
}

#[derive(Deserialize)]
struct FunctionCall {
    id: String,
    function: FunctionPayload,
}

#[derive(Deserialize)]
struct FunctionPayload {
    name: String,
    arguments: String,
}

/// 解析响应中的 tool_calls（JSON 形式）
fn parse_tool_calls(calls: Value) -> Result<Vec<ToolCall>, LlmError> {
    let calls: Vec<FunctionCall> = serde_json::from_value(calls)
        .map_err(|e| LlmError::InvalidResponse(format!("tool calls: {}", e)))?;
    calls
        .into_iter()
        .map(|c| {
            let args = if c.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&c.function.arguments).map_err(|e| {
                    LlmError::InvalidResponse(format!("tool arguments for {}: {}", c.function.name, e))
                })?
            };
            Ok(ToolCall {
                id: c.id,
                name: c.function.name,
                args,
            })
        })
        .collect()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let built = self.build_request(request)?;
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(built))
            .await
            .map_err(|_| LlmError::Http(format!("request timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices".to_string()))?;
        let tool_calls = match &choice.message.tool_calls {
            Some(calls) => parse_tool_calls(
                serde_json::to_value(calls).map_err(|e| LlmError::InvalidResponse(e.to_string()))?,
            )?,
            None => Vec::new(),
        };
        Ok(ModelResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolSpec;

    #[test]
    fn test_request_uses_named_tool_choice() {
        let client = OpenAiClient::new(None, "gpt-4o-mini", "sk-test", 5);
        let request = ModelRequest::new("sys", vec![Message::user("plan it")]).with_tools(
            vec![ToolSpec::new("session_plan", "propose", json!({ "type": "object" }))],
            ToolChoice::Tool("session_plan".to_string()),
        );
        let body = serde_json::to_value(client.build_request(&request).unwrap()).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["tool_choice"]["function"]["name"], "session_plan");
        assert_eq!(body["tools"][0]["function"]["name"], "session_plan");
        assert_eq!(body["parallel_tool_calls"], false);
    }

    #[test]
    fn test_request_without_tools() {
        let client = OpenAiClient::new(Some("http://localhost:8080/v1/"), "m", "sk-test", 5);
        let body = serde_json::to_value(
            client
                .build_request(&ModelRequest::new("sys", vec![Message::user("hi")]))
                .unwrap(),
        )
        .unwrap();
        assert!(body.get("tools").map_or(true, |t| t.is_null()));
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_tool_round_in_history() {
        let client = OpenAiClient::new(None, "m", "sk-test", 5);
        let call = ToolCall::new("ls", json!({ "path": "." }));
        let messages = vec![
            Message::user("look around"),
            Message::assistant_with_calls("", vec![call.clone()]),
            Message::tool_result(&call, "out", crate::memory::ToolStatus::Success),
        ];
        let body =
            serde_json::to_value(client.build_request(&ModelRequest::new("sys", messages)).unwrap())
                .unwrap();
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], call.id.as_str());
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], call.id.as_str());
    }

    #[test]
    fn test_parse_tool_call_arguments() {
        let parsed = parse_tool_calls(json!([{
            "id": "call_1",
            "type": "function",
            "function": { "name": "ls", "arguments": "{\"path\":\".\"}" }
        }]))
        .unwrap();
        assert_eq!(parsed[0].id, "call_1");
        assert_eq!(parsed[0].args["path"], ".");

        let err = parse_tool_calls(json!([{
            "id": "call_2",
            "type": "function",
            "function": { "name": "ls", "arguments": "{not json" }
        }]))
        .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
