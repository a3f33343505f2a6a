//! 工具执行器
//!
//! 统一的工具执行契约：execute(tool_name, args) -> ToolOutcome { result, status }。
//! 未知工具、工具返回 Err、超时都不会向上抛错，而是 status = Error 的普通结果；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::llm::ToolSpec;
use crate::memory::ToolStatus;
use crate::tools::{Tool, ToolRegistry};

/// 工具执行结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub result: String,
    pub status: ToolStatus,
}

impl ToolOutcome {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            status: ToolStatus::Success,
        }
    }

    pub fn error(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            status: ToolStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> ToolOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => ToolOutcome::success(content),
            Ok(Err(e)) => ToolOutcome::error(e),
            Err(_) => ToolOutcome::error(format!(
                "Tool {} timed out after {}s",
                tool_name,
                self.timeout.as_secs()
            )),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn specs(&self, whitelist: Option<&[String]>) -> Vec<ToolSpec> {
        self.registry.specs(whitelist)
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::tools::EchoTool;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: serde_json::Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        ToolExecutor::new(registry, 1)
    }

    #[tokio::test]
    async fn test_success_and_error_are_outcomes() {
        let exec = executor();
        let ok = exec.execute("echo", serde_json::json!({ "text": "hi" })).await;
        assert_eq!(ok, ToolOutcome::success("hi"));
        let bad = exec.execute("echo", serde_json::json!({})).await;
        assert!(bad.is_error());
        let unknown = exec.execute("rm", serde_json::json!({})).await;
        assert!(unknown.result.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_outcome() {
        let out = executor().execute("slow", serde_json::json!({})).await;
        assert!(out.is_error());
        assert!(out.result.contains("timed out"));
    }
}
