//! Planner 启动器：Manager 只拿到子运行的 AgentSession，不持有其状态

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::core::HiveError;
use crate::pipeline::planner::{PlannerState, PlannerWorkflow};
use crate::workflow::{AgentSession, RunReport, WorkflowEngine};

type PlannerHandle = JoinHandle<Result<RunReport<PlannerState>, HiveError>>;

/// 启动 Planner 运行
#[async_trait]
pub trait PlannerLauncher: Send + Sync {
    async fn launch(&self, state: PlannerState) -> Result<AgentSession, HiveError>;
}

/// 在引擎上以后台任务启动 Planner；句柄按 Planner 的 thread_id 登记
pub struct EngineLauncher {
    engine: Arc<WorkflowEngine<PlannerWorkflow>>,
    handles: Mutex<HashMap<String, PlannerHandle>>,
}

impl EngineLauncher {
    pub fn new(engine: Arc<WorkflowEngine<PlannerWorkflow>>) -> Self {
        Self {
            engine,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn lock_poisoned() -> HiveError {
        HiveError::Join("planner launcher lock poisoned".to_string())
    }

    /// 等待指定的 Planner 驱动到挂起或终止；未登记（或已被取走）时返回 None
    pub async fn join(
        &self,
        thread_id: &str,
    ) -> Result<Option<RunReport<PlannerState>>, HiveError> {
        let handle = self
            .handles
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .remove(thread_id);
        match handle {
            Some(handle) => Ok(Some(
                handle.await.map_err(|e| HiveError::Join(e.to_string()))??,
            )),
            None => Ok(None),
        }
    }

    /// 等待所有尚未被取走的 Planner
    pub async fn drain(&self) -> Result<Vec<Result<RunReport<PlannerState>, HiveError>>, HiveError> {
        let handles: Vec<PlannerHandle> = self
            .handles
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        Ok(join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => Err(HiveError::Join(e.to_string())),
            })
            .collect())
    }
}

#[async_trait]
impl PlannerLauncher for EngineLauncher {
    async fn launch(&self, state: PlannerState) -> Result<AgentSession, HiveError> {
        let (session, handle) = self.engine.submit(state).await?;
        let mut handles = match self.handles.lock() {
            Ok(handles) => handles,
            Err(_) => {
                handle.abort();
                return Err(Self::lock_poisoned());
            }
        };
        handles.insert(session.thread_id.clone(), handle);
        Ok(session)
    }
}

/// 只记录启动请求的启动器（测试替身）
#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<PlannerState>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched(&self) -> Vec<PlannerState> {
        self.launched.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PlannerLauncher for RecordingLauncher {
    async fn launch(&self, state: PlannerState) -> Result<AgentSession, HiveError> {
        let mut launched = self
            .launched
            .lock()
            .map_err(|_| HiveError::Join("recording launcher lock poisoned".to_string()))?;
        launched.push(state);
        Ok(AgentSession::new(format!("planner_recorded_{}", launched.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerSection;
    use crate::llm::MockLlmClient;
    use crate::memory::{InMemoryCheckpointStore, Message};
    use crate::pipeline::planner::PlanStatus;
    use crate::react::ActionLoop;
    use crate::tools::{NoopSandbox, ToolExecutor, ToolRegistry};

    fn launcher() -> EngineLauncher {
        let executor = Arc::new(ToolExecutor::new(ToolRegistry::new(), 5));
        let actions = ActionLoop::new(Arc::new(MockLlmClient::new()), executor, Vec::new());
        let workflow =
            PlannerWorkflow::new(actions, Arc::new(NoopSandbox), PlannerSection::default()).unwrap();
        EngineLauncher::new(Arc::new(WorkflowEngine::new(
            Arc::new(workflow),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(NoopSandbox),
        )))
    }

    /// 最新消息不是用户请求，Planner 不调用模型直接结束
    fn nothing_to_plan(text: &str) -> PlannerState {
        let mut state = PlannerState::new(text);
        state.messages.push(Message::assistant("done"));
        state
    }

    #[tokio::test]
    async fn test_join_returns_the_requested_planner() {
        let launcher = launcher();
        let first = launcher.launch(nothing_to_plan("first")).await.unwrap();
        let second = launcher.launch(nothing_to_plan("second")).await.unwrap();

        let report = launcher.join(&second.thread_id).await.unwrap().unwrap();
        assert_eq!(report.session.thread_id, second.thread_id);
        assert_eq!(report.state.messages[0].content, "second");
        assert_eq!(report.state.status, PlanStatus::Skipped);

        let report = launcher.join(&first.thread_id).await.unwrap().unwrap();
        assert_eq!(report.session.thread_id, first.thread_id);
        assert!(launcher.join(&first.thread_id).await.unwrap().is_none());
        assert!(launcher.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_collects_unjoined_planners() {
        let launcher = launcher();
        launcher.launch(nothing_to_plan("a")).await.unwrap();
        launcher.launch(nothing_to_plan("b")).await.unwrap();
        let results = launcher.drain().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
