//! 动作层：有界动作循环与运行过程事件

pub mod events;
pub mod loop_;

pub use events::{preview, EventSink, WorkflowEvent};
pub use loop_::{
    actions_taken, close_dangling, last_action_failed, should_take_action, ActionLoop,
    TOOL_ERROR_PREFIX,
};
