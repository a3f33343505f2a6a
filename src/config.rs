//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__PLANNER__AUTO_ACCEPT_PLAN=true`）。
//! 所有字段都有默认值，空配置即可运行。配置以结构体形式显式传入各工作流构造函数。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planner: PlannerSection,
    pub reviewer: ReviewerSection,
    pub manager: ManagerSection,
    pub engine: EngineSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、工作目录、检查点目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 只读工具的根目录
    pub workspace_root: PathBuf,
    /// FileCheckpointStore 目录
    pub checkpoint_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            workspace_root: PathBuf::from("./workspace"),
            checkpoint_dir: PathBuf::from("./.hive/checkpoints"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 但缺少 API Key 时回退到 mock
    pub provider: String,
    pub model: String,
    /// OpenAI 兼容端点，未设置时用官方地址
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 收集上下文阶段最多执行的工具动作数
    pub max_context_actions: usize,
    /// 审批编辑时拆分计划项的分隔符
    pub plan_delimiter: String,
    /// 跳过人工审批，直接接受生成的计划
    pub auto_accept_plan: bool,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            max_context_actions: 75,
            plan_delimiter: ":::".to_string(),
            auto_accept_plan: false,
        }
    }
}

/// [reviewer] 段：None 表示不限动作数（由 engine.max_transitions 兜底）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReviewerSection {
    pub max_review_actions: Option<usize>,
}

/// 路由标签对应的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    CreateNewSession,
    StartPlanner,
}

/// [[manager.routes]]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteSection {
    pub label: String,
    pub action: RouteAction,
}

/// [manager] 段：消息分类的路由表（no_op 总是存在，不可重定义）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    pub routes: Vec<RouteSection>,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            routes: vec![
                RouteSection {
                    label: "start_planner".to_string(),
                    action: RouteAction::StartPlanner,
                },
                RouteSection {
                    label: "start_planner_for_followup".to_string(),
                    action: RouteAction::StartPlanner,
                },
                RouteSection {
                    label: "create_new_session".to_string(),
                    action: RouteAction::CreateNewSession,
                },
            ],
        }
    }
}

/// [engine] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 单个运行的最大阶段切换次数
    pub max_transitions: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_transitions: crate::workflow::DEFAULT_MAX_TRANSITIONS,
        }
    }
}

/// [tools] 段：工具超时、Shell 白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词，如 ls、grep）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: vec![
                "ls".into(),
                "grep".into(),
                "cat".into(),
                "head".into(),
                "tail".into(),
                "wc".into(),
                "find".into(),
                "git".into(),
            ],
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
