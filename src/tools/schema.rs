//! 工具参数 JSON Schema 生成（schemars）
//!
//! 计划 / 审查等「结构化输出」工具的参数由 Rust 类型派生，保证 Schema 与解析端一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::HiveError;
use crate::llm::ToolSpec;

/// 由参数类型生成 JSON Schema
pub fn parameters_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

/// 由参数类型生成 ToolSpec
pub fn spec_for<T: JsonSchema>(name: &str, description: &str) -> ToolSpec {
    ToolSpec::new(name, description, parameters_for::<T>())
}

/// 解析工具参数；失败转为 InvalidToolArgs
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: &Value) -> Result<T, HiveError> {
    serde_json::from_value(args.clone()).map_err(|e| HiveError::InvalidToolArgs {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    /// 测试参数
    #[allow(dead_code)]
    #[derive(Debug, JsonSchema, Deserialize)]
    struct Args {
        /// 步骤列表
        steps: Vec<String>,
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = parameters_for::<Args>();
        assert!(schema["properties"]["steps"].is_object());
    }

    #[test]
    fn test_parse_args_error_names_tool() {
        let err = parse_args::<Args>("session_plan", &serde_json::json!({ "steps": 3 })).unwrap_err();
        assert!(err.to_string().contains("session_plan"));
    }
}
