//! 记忆层：消息日志与检查点持久化

pub mod checkpoint;
pub mod conversation;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use conversation::{dangling_tool_call, is_well_formed, Message, Role, ToolCall, ToolStatus};
