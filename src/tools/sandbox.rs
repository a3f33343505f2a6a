//! 沙箱生命周期契约
//!
//! 编排核心只需要 start / stop 两个操作和一个会话 ID；沙箱的创建、命令执行等由外部实现。
//! 工作流挂起时 stop，恢复时 start。

use std::sync::Mutex;

use async_trait::async_trait;

/// 沙箱生命周期
#[async_trait]
pub trait SandboxLifecycle: Send + Sync {
    async fn start(&self, session_id: &str) -> Result<(), String>;

    async fn stop(&self, session_id: &str) -> Result<(), String>;
}

/// 无操作沙箱（本地工作目录即沙箱）
#[derive(Debug, Default)]
pub struct NoopSandbox;

#[async_trait]
impl SandboxLifecycle for NoopSandbox {
    async fn start(&self, session_id: &str) -> Result<(), String> {
        tracing::debug!(session_id, "sandbox start (noop)");
        Ok(())
    }

    async fn stop(&self, session_id: &str) -> Result<(), String> {
        tracing::debug!(session_id, "sandbox stop (noop)");
        Ok(())
    }
}

/// 沙箱事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SandboxEvent {
    Started(String),
    Stopped(String),
}

/// 记录所有 start / stop 调用的沙箱（测试替身）
#[derive(Debug, Default)]
pub struct RecordingSandbox {
    events: Mutex<Vec<SandboxEvent>>,
}

impl RecordingSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SandboxEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn record(&self, event: SandboxEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl SandboxLifecycle for RecordingSandbox {
    async fn start(&self, session_id: &str) -> Result<(), String> {
        self.record(SandboxEvent::Started(session_id.to_string()));
        Ok(())
    }

    async fn stop(&self, session_id: &str) -> Result<(), String> {
        self.record(SandboxEvent::Stopped(session_id.to_string()));
        Ok(())
    }
}
