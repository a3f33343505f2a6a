//! 工具层：统一执行契约、注册表、只读工作区工具、沙箱生命周期

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod sandbox;
pub mod schema;
pub mod shell;

pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolOutcome};
pub use filesystem::{LsTool, SafeFs, ViewTool};
pub use registry::{Tool, ToolRegistry};
pub use sandbox::{NoopSandbox, RecordingSandbox, SandboxEvent, SandboxLifecycle};
pub use schema::{parameters_for, parse_args, spec_for};
pub use shell::ShellTool;
