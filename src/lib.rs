//! Hive - 多阶段编码智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、运行监管（取消令牌、单驱动者）
//! - **llm**: 模型调用抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息日志与检查点持久化
//! - **observability**: tracing 初始化
//! - **pipeline**: Manager / Planner / Reviewer 工作流与 Pipeline 门面
//! - **plan**: 任务计划模型（Task / PlanRevision / PlanItem）
//! - **react**: 有界动作循环与过程事件
//! - **tools**: 工具契约、只读工作区工具、沙箱生命周期
//! - **workflow**: 阶段图、中断 / 恢复协议、带检查点的执行引擎

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod plan;
pub mod react;
pub mod tools;
pub mod workflow;

pub use crate::core::{HiveError, PlanError};
pub use pipeline::Pipeline;
