//! 运行过程事件：阶段切换、挂起 / 恢复、工具调用与观察，供 CLI / 前端展示

use serde::Serialize;
use tokio::sync::mpsc;

/// Observation 预览最大字符数
pub const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// 进入阶段
    StageEntered {
        workflow: String,
        run_id: String,
        stage: String,
    },
    /// 运行挂起，等待人工响应
    Interrupted {
        workflow: String,
        run_id: String,
        description: String,
    },
    /// 以人工响应恢复
    Resumed {
        workflow: String,
        run_id: String,
        response: String,
    },
    /// 崩溃后从检查点重新驱动
    Recovered {
        workflow: String,
        run_id: String,
        stage: String,
    },
    Completed { workflow: String, run_id: String },
    Failed {
        workflow: String,
        run_id: String,
        error: String,
    },
    Cancelled { workflow: String, run_id: String },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        preview: String,
        ok: bool,
    },
    /// 一轮中多余的工具调用被丢弃
    ExtraToolCallsDropped { kept: String, dropped: usize },
    /// 动作预算耗尽，未执行的调用被补上合成结果
    BudgetExhausted { tool: String, max_actions: usize },
    /// 启动了子工作流
    SessionLaunched { workflow: String, thread_id: String },
}

/// 可选的事件通道；未设置时 emit 为空操作
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::UnboundedSender<WorkflowEvent>>);

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

/// 截断为预览文本
pub fn preview(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = WorkflowEvent::Completed {
            workflow: "planner".into(),
            run_id: "planner_1".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "completed");
        assert_eq!(v["run_id"], "planner_1");
    }

    #[test]
    fn test_sink_delivers_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.emit(WorkflowEvent::Cancelled {
            workflow: "reviewer".into(),
            run_id: "r".into(),
        });
        assert!(matches!(rx.try_recv(), Ok(WorkflowEvent::Cancelled { .. })));
        EventSink::none().emit(WorkflowEvent::Cancelled {
            workflow: "x".into(),
            run_id: "y".into(),
        });
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("你好世界", 2), "你好...");
        assert_eq!(preview("abc", 5), "abc");
    }
}
