//! 中断 / 恢复协议
//!
//! 挂起阶段产出 InterruptEnvelope（待审批动作 + 允许的响应类型 + 描述），运行被持久化后停止；
//! 外部以 HumanResponse 恢复，挂起阶段从头重新执行并收到该响应。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::HiveError;

/// 待审批的动作：名称 + 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// 允许的响应类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptConfig {
    pub allow_accept: bool,
    pub allow_edit: bool,
    pub allow_respond: bool,
    pub allow_ignore: bool,
}

impl InterruptConfig {
    pub fn all() -> Self {
        Self {
            allow_accept: true,
            allow_edit: true,
            allow_respond: true,
            allow_ignore: true,
        }
    }

    pub fn allows(&self, response: &HumanResponse) -> bool {
        match response {
            HumanResponse::Accept => self.allow_accept,
            HumanResponse::Edit(_) => self.allow_edit,
            HumanResponse::Respond(_) => self.allow_respond,
            HumanResponse::Ignore => self.allow_ignore,
        }
    }
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self::all()
    }
}

/// 挂起信封
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterruptEnvelope {
    pub action_request: ActionRequest,
    pub config: InterruptConfig,
    pub description: String,
}

impl InterruptEnvelope {
    pub fn new(action_request: ActionRequest, description: impl Into<String>) -> Self {
        Self {
            action_request,
            config: InterruptConfig::all(),
            description: description.into(),
        }
    }

    pub fn with_config(mut self, config: InterruptConfig) -> Self {
        self.config = config;
        self
    }
}

/// 人工响应
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "lowercase")]
pub enum HumanResponse {
    /// 原样接受待审批动作
    Accept,
    /// 以修改后的参数接受
    Edit(ActionRequest),
    /// 不执行，给出反馈文本
    Respond(String),
    /// 放弃
    Ignore,
}

impl HumanResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            HumanResponse::Accept => "accept",
            HumanResponse::Edit(_) => "edit",
            HumanResponse::Respond(_) => "respond",
            HumanResponse::Ignore => "ignore",
        }
    }

    /// 从外部的 (type, args) 构造响应，未知类型返回 UnknownResponseType
    pub fn parse(kind: &str, args: Option<Value>) -> Result<Self, HiveError> {
        match kind {
            "accept" => Ok(HumanResponse::Accept),
            "ignore" => Ok(HumanResponse::Ignore),
            "respond" => match args {
                Some(Value::String(text)) => Ok(HumanResponse::Respond(text)),
                Some(other) => Ok(HumanResponse::Respond(other.to_string())),
                None => Err(HiveError::MissingField("args")),
            },
            "edit" => {
                let args = args.ok_or(HiveError::MissingField("args"))?;
                let request: ActionRequest = serde_json::from_value(args)?;
                Ok(HumanResponse::Edit(request))
            }
            other => Err(HiveError::UnknownResponseType(other.to_string())),
        }
    }
}

/// 校验后的决策
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// 接受（Accept 时为原始动作，Edit 时为修改后的动作）
    Apply { edited: bool, request: ActionRequest },
    Respond(String),
    Ignore,
}

/// 按信封的 config 校验响应并得出决策
pub fn resolve(envelope: &InterruptEnvelope, response: HumanResponse) -> Result<Decision, HiveError> {
    if !envelope.config.allows(&response) {
        return Err(HiveError::ResponseNotAllowed {
            kind: response.kind().to_string(),
            action: envelope.action_request.action.clone(),
        });
    }
    Ok(match response {
        HumanResponse::Accept => Decision::Apply {
            edited: false,
            request: envelope.action_request.clone(),
        },
        HumanResponse::Edit(request) => Decision::Apply {
            edited: true,
            request,
        },
        HumanResponse::Respond(text) => Decision::Respond(text),
        HumanResponse::Ignore => Decision::Ignore,
    })
}

/// resume 时交给挂起阶段的输入
#[derive(Clone, Debug, PartialEq)]
pub struct Resumption {
    pub envelope: InterruptEnvelope,
    pub response: HumanResponse,
}

impl Resumption {
    pub fn resolve(self) -> Result<Decision, HiveError> {
        resolve(&self.envelope, self.response)
    }
}
