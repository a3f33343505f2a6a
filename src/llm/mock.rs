//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按顺序回放预设的 ModelResponse，并记录每次收到的请求，便于断言 Prompt、工具与 tool_choice。
//! 剧本为空时：若设置了 fallback 则返回 fallback，否则返回 LlmError::Exhausted。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse, ToolChoice};

/// 记录下来的请求摘要
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub system: String,
    pub message_count: usize,
    pub tool_names: Vec<String>,
    pub tool_choice: ToolChoice,
    pub last_message: Option<String>,
}

/// 剧本式 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<ModelResponse>>,
    fallback: Option<ModelResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 剧本用完后一直返回该响应
    pub fn with_fallback(mut self, response: ModelResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn push(&self, response: ModelResponse) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                system: request.system.clone(),
                message_count: request.messages.len(),
                tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
                tool_choice: request.tool_choice.clone(),
                last_message: request.messages.last().map(|m| m.content.clone()),
            });
        }
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::InvalidResponse("mock script lock poisoned".to_string()))?
            .pop_front();
        match next {
            Some(response) => Ok(response),
            None => self.fallback.clone().ok_or(LlmError::Exhausted),
        }
    }
}
