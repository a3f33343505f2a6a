//! 工作流引擎
//!
//! 按阶段图驱动一个运行：每个阶段开始前写检查点；阶段返回 Interrupt 时持久化信封并停止驱动
//! （挂起的运行不占用任务或锁）；resume 时从检查点重建阶段与状态，把人工响应交给挂起阶段。
//! 同一 run_id 同时只有一个驱动者；取消在阶段边界或阶段进行中生效。
//! 进程在阶段中途退出时检查点停在 Running，recover 从记录的阶段与快照重新驱动。

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::{HiveError, RunGuard, RunSupervisor};
use crate::memory::{Checkpoint, CheckpointStore};
use crate::react::{EventSink, WorkflowEvent};
use crate::tools::SandboxLifecycle;
use crate::workflow::graph::{Next, StageGraph};
use crate::workflow::interrupt::{HumanResponse, InterruptEnvelope, Resumption};
use crate::workflow::types::{AgentSession, RunReport, RunStatus, StageInput, StageOutcome};

/// 单个运行允许的最大阶段切换次数
pub const DEFAULT_MAX_TRANSITIONS: usize = 1000;

/// 工作流定义：阶段集合、状态类型、阶段图与每个阶段的执行逻辑
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// 工作流名称，写入检查点，也是 run_id 前缀
    const NAME: &'static str;

    type Stage: Copy + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    type State: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn graph(&self) -> &StageGraph<Self::Stage, Self::State>;

    /// 执行一个阶段。resume 时挂起阶段会被重新执行，input 为挂起信封 + 人工响应
    async fn run_stage(
        &self,
        stage: Self::Stage,
        state: &mut Self::State,
        input: StageInput,
    ) -> Result<StageOutcome, HiveError>;

    /// 状态中的沙箱会话 ID（挂起时 stop，恢复时 start）
    fn sandbox_session(&self, _state: &Self::State) -> Option<String> {
        None
    }
}

/// 工作流引擎
pub struct WorkflowEngine<W: Workflow> {
    workflow: Arc<W>,
    store: Arc<dyn CheckpointStore>,
    sandbox: Arc<dyn SandboxLifecycle>,
    supervisor: RunSupervisor,
    max_transitions: usize,
    events: EventSink,
}

impl<W: Workflow> WorkflowEngine<W> {
    pub fn new(
        workflow: Arc<W>,
        store: Arc<dyn CheckpointStore>,
        sandbox: Arc<dyn SandboxLifecycle>,
    ) -> Self {
        Self {
            workflow,
            store,
            sandbox,
            supervisor: RunSupervisor::new(),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            events: EventSink::none(),
        }
    }

    pub fn with_max_transitions(mut self, max_transitions: usize) -> Self {
        self.max_transitions = max_transitions;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// 与其他引擎共享运行登记（同一进程内的 Pipeline 使用）
    pub fn with_supervisor(mut self, supervisor: RunSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn workflow(&self) -> &Arc<W> {
        &self.workflow
    }

    pub fn supervisor(&self) -> &RunSupervisor {
        &self.supervisor
    }

    /// 新建运行并在当前任务内驱动到挂起或终止
    pub async fn start(&self, state: W::State) -> Result<RunReport<W::State>, HiveError> {
        let checkpoint = self.create_run(&state).await?;
        let guard = self.supervisor.acquire(&checkpoint.run_id)?;
        let entry = self.workflow.graph().entry();
        self.drive(&guard, checkpoint, entry, state, None).await
    }

    /// 新建运行并在后台任务中驱动，立即返回句柄
    pub async fn submit(
        self: &Arc<Self>,
        state: W::State,
    ) -> Result<(AgentSession, JoinHandle<Result<RunReport<W::State>, HiveError>>), HiveError> {
        let checkpoint = self.create_run(&state).await?;
        let guard = self.supervisor.acquire(&checkpoint.run_id)?;
        let session = AgentSession::new(checkpoint.run_id.clone());
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let entry = engine.workflow.graph().entry();
            engine.drive(&guard, checkpoint, entry, state, None).await
        });
        Ok((session, handle))
    }

    /// 以人工响应恢复一个挂起的运行
    pub async fn resume(
        &self,
        run_id: &str,
        response: HumanResponse,
    ) -> Result<RunReport<W::State>, HiveError> {
        let guard = self.supervisor.acquire(run_id)?;
        let mut checkpoint = self.checkpoint(run_id).await?;
        let envelope = match &checkpoint.status {
            RunStatus::Awaiting { envelope } => envelope.clone(),
            _ => return Err(HiveError::NotAwaiting(run_id.to_string())),
        };
        let stage: W::Stage = serde_json::from_value(checkpoint.stage.clone())?;
        let state: W::State = serde_json::from_value(checkpoint.state.clone())?;

        if let Some(session) = self.workflow.sandbox_session(&state) {
            self.sandbox
                .start(&session)
                .await
                .map_err(HiveError::Sandbox)?;
        }

        info!(workflow = W::NAME, run_id, stage = ?stage, response = response.kind(), "run resumed");
        self.events.emit(WorkflowEvent::Resumed {
            workflow: W::NAME.to_string(),
            run_id: run_id.to_string(),
            response: response.kind().to_string(),
        });
        checkpoint.pending_interrupt = Some(envelope.clone());
        let input = Some(Resumption { envelope, response });
        self.drive(&guard, checkpoint, stage, state, input).await
    }

    /// 重新驱动停在 Running 且当前没有驱动者的运行（进程在阶段中途退出）。
    ///
    /// 中断发生在处理人工响应的阶段时，响应已丢失：以同一信封重新挂起，等待新的响应；
    /// 否则从检查点记录的阶段与该阶段开始前的状态快照继续驱动。
    pub async fn recover(&self, run_id: &str) -> Result<RunReport<W::State>, HiveError> {
        let guard = self.supervisor.acquire(run_id)?;
        let mut checkpoint = self.checkpoint(run_id).await?;
        if checkpoint.status != RunStatus::Running {
            return Err(HiveError::NotRecoverable(run_id.to_string()));
        }
        let stage: W::Stage = serde_json::from_value(checkpoint.stage.clone())?;
        let state: W::State = serde_json::from_value(checkpoint.state.clone())?;

        if let Some(envelope) = checkpoint.pending_interrupt.take() {
            warn!(workflow = W::NAME, run_id, stage = ?stage, "human response lost mid-stage, interrupting again");
            return self.suspend(checkpoint, stage, state, envelope).await;
        }

        if let Some(session) = self.workflow.sandbox_session(&state) {
            self.sandbox
                .start(&session)
                .await
                .map_err(HiveError::Sandbox)?;
        }
        info!(workflow = W::NAME, run_id, stage = ?stage, transitions = checkpoint.transitions, "run recovered");
        self.events.emit(WorkflowEvent::Recovered {
            workflow: W::NAME.to_string(),
            run_id: run_id.to_string(),
            stage: format!("{:?}", stage),
        });
        self.drive(&guard, checkpoint, stage, state, None).await
    }

    /// 取消运行：正在驱动的运行收到取消信号；挂起或遗留的运行直接标记为 Cancelled。
    /// 返回取消后观察到的状态（驱动中的运行返回 Running，由驱动者落盘 Cancelled）
    pub async fn cancel(&self, run_id: &str) -> Result<RunStatus, HiveError> {
        let _guard = match self.supervisor.acquire(run_id) {
            Ok(guard) => guard,
            Err(HiveError::RunBusy(_)) => {
                self.supervisor.cancel(run_id);
                info!(workflow = W::NAME, run_id, "cancellation requested");
                return Ok(RunStatus::Running);
            }
            Err(e) => return Err(e),
        };
        let mut checkpoint = self.checkpoint(run_id).await?;
        if checkpoint.status.is_terminal() {
            return Ok(checkpoint.status);
        }
        checkpoint.status = RunStatus::Cancelled;
        checkpoint.pending_interrupt = None;
        checkpoint.updated_at = now_millis();
        self.store.save(&checkpoint).await?;
        info!(workflow = W::NAME, run_id, "run cancelled");
        self.events.emit(WorkflowEvent::Cancelled {
            workflow: W::NAME.to_string(),
            run_id: run_id.to_string(),
        });
        Ok(RunStatus::Cancelled)
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatus, HiveError> {
        Ok(self.checkpoint(run_id).await?.status)
    }

    pub async fn state(&self, run_id: &str) -> Result<W::State, HiveError> {
        let checkpoint = self.checkpoint(run_id).await?;
        Ok(serde_json::from_value(checkpoint.state)?)
    }

    /// 读取本工作流的检查点
    pub async fn checkpoint(&self, run_id: &str) -> Result<Checkpoint, HiveError> {
        let checkpoint = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| HiveError::RunNotFound(run_id.to_string()))?;
        if checkpoint.workflow != W::NAME {
            return Err(HiveError::WorkflowMismatch {
                run_id: run_id.to_string(),
                expected: W::NAME.to_string(),
                actual: checkpoint.workflow,
            });
        }
        Ok(checkpoint)
    }

    async fn create_run(&self, state: &W::State) -> Result<Checkpoint, HiveError> {
        let now = now_millis();
        let checkpoint = Checkpoint {
            run_id: format!("{}_{}", W::NAME, uuid::Uuid::new_v4().simple()),
            workflow: W::NAME.to_string(),
            stage: serde_json::to_value(self.workflow.graph().entry())?,
            state: serde_json::to_value(state)?,
            status: RunStatus::Running,
            transitions: 0,
            pending_interrupt: None,
            created_at: now,
            updated_at: now,
        };
        self.store.save(&checkpoint).await?;
        info!(workflow = W::NAME, run_id = %checkpoint.run_id, "run created");
        Ok(checkpoint)
    }

    async fn drive(
        &self,
        guard: &RunGuard,
        mut checkpoint: Checkpoint,
        mut stage: W::Stage,
        mut state: W::State,
        mut input: StageInput,
    ) -> Result<RunReport<W::State>, HiveError> {
        loop {
            if guard.is_cancelled() {
                return self.finish(checkpoint, stage, state, RunStatus::Cancelled).await;
            }
            if checkpoint.transitions >= self.max_transitions {
                let err = HiveError::TransitionLimit(self.max_transitions);
                return Err(self.fail(checkpoint, stage, &state, err).await);
            }

            self.persist(&mut checkpoint, stage, &state, RunStatus::Running)
                .await?;
            debug!(workflow = W::NAME, run_id = %checkpoint.run_id, stage = ?stage, "stage entered");
            self.events.emit(WorkflowEvent::StageEntered {
                workflow: W::NAME.to_string(),
                run_id: checkpoint.run_id.clone(),
                stage: format!("{:?}", stage),
            });

            let snapshot = state.clone();
            let outcome = tokio::select! {
                _ = guard.token().cancelled() => {
                    return self.finish(checkpoint, stage, snapshot, RunStatus::Cancelled).await;
                }
                result = self.workflow.run_stage(stage, &mut state, input.take()) => result,
            };

            match outcome {
                Err(e) => return Err(self.fail(checkpoint, stage, &snapshot, e).await),
                Ok(StageOutcome::Interrupt(envelope)) => {
                    return self.suspend(checkpoint, stage, state, envelope).await;
                }
                Ok(StageOutcome::Continue) => checkpoint.pending_interrupt = None,
            }

            match self.workflow.graph().route(stage, &state) {
                Ok(Next::Stage(next)) => {
                    checkpoint.transitions += 1;
                    stage = next;
                }
                Ok(Next::End) => {
                    return self.finish(checkpoint, stage, state, RunStatus::Completed).await;
                }
                Err(e) => return Err(self.fail(checkpoint, stage, &state, e).await),
            }
        }
    }

    async fn persist(
        &self,
        checkpoint: &mut Checkpoint,
        stage: W::Stage,
        state: &W::State,
        status: RunStatus,
    ) -> Result<(), HiveError> {
        checkpoint.stage = serde_json::to_value(stage)?;
        checkpoint.state = serde_json::to_value(state)?;
        if status != RunStatus::Running {
            checkpoint.pending_interrupt = None;
        }
        checkpoint.status = status;
        checkpoint.updated_at = now_millis();
        self.store.save(checkpoint).await
    }

    async fn suspend(
        &self,
        mut checkpoint: Checkpoint,
        stage: W::Stage,
        state: W::State,
        envelope: InterruptEnvelope,
    ) -> Result<RunReport<W::State>, HiveError> {
        let description = envelope.description.clone();
        self.persist(
            &mut checkpoint,
            stage,
            &state,
            RunStatus::Awaiting { envelope },
        )
        .await?;
        if let Some(session) = self.workflow.sandbox_session(&state) {
            if let Err(e) = self.sandbox.stop(&session).await {
                warn!(workflow = W::NAME, run_id = %checkpoint.run_id, error = %e, "sandbox stop failed");
            }
        }
        info!(workflow = W::NAME, run_id = %checkpoint.run_id, stage = ?stage, "run suspended");
        self.events.emit(WorkflowEvent::Interrupted {
            workflow: W::NAME.to_string(),
            run_id: checkpoint.run_id.clone(),
            description,
        });
        Ok(report(checkpoint, state))
    }

    async fn finish(
        &self,
        mut checkpoint: Checkpoint,
        stage: W::Stage,
        state: W::State,
        status: RunStatus,
    ) -> Result<RunReport<W::State>, HiveError> {
        self.persist(&mut checkpoint, stage, &state, status).await?;
        let workflow = W::NAME.to_string();
        let run_id = checkpoint.run_id.clone();
        match checkpoint.status {
            RunStatus::Cancelled => {
                info!(workflow = W::NAME, run_id = %run_id, "run cancelled");
                self.events.emit(WorkflowEvent::Cancelled { workflow, run_id });
            }
            _ => {
                info!(workflow = W::NAME, run_id = %run_id, transitions = checkpoint.transitions, "run completed");
                self.events.emit(WorkflowEvent::Completed { workflow, run_id });
            }
        }
        Ok(report(checkpoint, state))
    }

    /// 落盘 Failed（状态为失败阶段开始前的快照）并返回原错误
    async fn fail(
        &self,
        mut checkpoint: Checkpoint,
        stage: W::Stage,
        state: &W::State,
        err: HiveError,
    ) -> HiveError {
        error!(workflow = W::NAME, run_id = %checkpoint.run_id, stage = ?stage, error = %err, "run failed");
        let status = RunStatus::Failed {
            error: err.to_string(),
        };
        if let Err(save_err) = self.persist(&mut checkpoint, stage, state, status).await {
            warn!(run_id = %checkpoint.run_id, error = %save_err, "failed to persist failure checkpoint");
        }
        self.events.emit(WorkflowEvent::Failed {
            workflow: W::NAME.to_string(),
            run_id: checkpoint.run_id.clone(),
            error: err.to_string(),
        });
        err
    }
}

fn report<S>(checkpoint: Checkpoint, state: S) -> RunReport<S> {
    RunReport {
        session: AgentSession {
            thread_id: checkpoint.run_id,
            run_id: Some(format!("drive_{}", uuid::Uuid::new_v4().simple())),
        },
        status: checkpoint.status,
        state,
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCheckpointStore;
    use crate::tools::{NoopSandbox, RecordingSandbox, SandboxEvent};
    use crate::workflow::interrupt::{ActionRequest, Decision};
    use serde::Deserialize;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum Stage {
        Count,
        Ask,
        Boom,
    }

    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    struct Counter {
        n: u32,
        target: u32,
        answer: Option<String>,
        explode: bool,
        session: Option<String>,
    }

    struct CounterFlow {
        graph: StageGraph<Stage, Counter>,
    }

    fn after_count(s: &Counter) -> Next<Stage> {
        if s.explode {
            Next::Stage(Stage::Boom)
        } else if s.n < s.target {
            Next::Stage(Stage::Count)
        } else {
            Next::Stage(Stage::Ask)
        }
    }

    impl CounterFlow {
        fn new() -> Arc<Self> {
            let graph = StageGraph::builder(Stage::Count)
                .conditional(Stage::Count, after_count)
                .end(Stage::Ask)
                .end(Stage::Boom)
                .build()
                .unwrap();
            Arc::new(Self { graph })
        }
    }

    #[async_trait]
    impl Workflow for CounterFlow {
        const NAME: &'static str = "counter";
        type Stage = Stage;
        type State = Counter;

        fn graph(&self) -> &StageGraph<Stage, Counter> {
            &self.graph
        }

        async fn run_stage(
            &self,
            stage: Stage,
            state: &mut Counter,
            input: StageInput,
        ) -> Result<StageOutcome, HiveError> {
            match stage {
                Stage::Count => state.n += 1,
                Stage::Ask => match input {
                    None => {
                        return Ok(StageOutcome::Interrupt(InterruptEnvelope::new(
                            ActionRequest::new("Confirm").with_arg("n", state.n),
                            "confirm the count",
                        )))
                    }
                    Some(resumption) => match resumption.resolve()? {
                        Decision::Apply { .. } => state.answer = Some("accepted".into()),
                        Decision::Respond(text) => state.answer = Some(text),
                        Decision::Ignore => state.answer = None,
                    },
                },
                Stage::Boom => {
                    state.n = 999;
                    return Err(HiveError::MissingField("boom"));
                }
            }
            Ok(StageOutcome::Continue)
        }

        fn sandbox_session(&self, state: &Counter) -> Option<String> {
            state.session.clone()
        }
    }

    fn engine(store: Arc<InMemoryCheckpointStore>) -> WorkflowEngine<CounterFlow> {
        WorkflowEngine::new(CounterFlow::new(), store, Arc::new(NoopSandbox))
    }

    #[tokio::test]
    async fn test_suspend_then_resume_from_fresh_engine() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let report = engine(store.clone())
            .start(Counter {
                target: 3,
                ..Counter::default()
            })
            .await
            .unwrap();
        assert!(report.is_awaiting());
        assert_eq!(report.state.n, 3);
        let run_id = report.session.thread_id.clone();

        // 新引擎实例，仅共享存储
        let other = engine(store.clone());
        let envelope = other.status(&run_id).await.unwrap();
        assert_eq!(
            envelope.pending_interrupt().unwrap().action_request.action,
            "Confirm"
        );
        let done = other
            .resume(&run_id, HumanResponse::Respond("looks right".into()))
            .await
            .unwrap();
        assert!(done.is_completed());
        assert_eq!(done.state.answer.as_deref(), Some("looks right"));
        assert_eq!(other.status(&run_id).await.unwrap(), RunStatus::Completed);

        let err = other.resume(&run_id, HumanResponse::Accept).await.unwrap_err();
        assert!(matches!(err, HiveError::NotAwaiting(_)));
    }

    #[tokio::test]
    async fn test_failure_keeps_pre_stage_snapshot() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(store.clone());
        let err = engine
            .start(Counter {
                target: 5,
                explode: true,
                ..Counter::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::MissingField("boom")));

        let run_id = store.list().await.unwrap().pop().unwrap();
        let status = engine.status(&run_id).await.unwrap();
        assert!(matches!(status, RunStatus::Failed { .. }));
        assert_eq!(engine.state(&run_id).await.unwrap().n, 1);
    }

    #[tokio::test]
    async fn test_transition_limit() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(store).with_max_transitions(4);
        let err = engine
            .start(Counter {
                target: 100,
                ..Counter::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::TransitionLimit(4)));
    }

    #[tokio::test]
    async fn test_cancel_awaiting_run() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(store);
        let report = engine.start(Counter::default()).await.unwrap();
        let run_id = report.session.thread_id;
        assert_eq!(engine.cancel(&run_id).await.unwrap(), RunStatus::Cancelled);
        assert_eq!(engine.cancel(&run_id).await.unwrap(), RunStatus::Cancelled);
        let err = engine.resume(&run_id, HumanResponse::Accept).await.unwrap_err();
        assert!(matches!(err, HiveError::NotAwaiting(_)));
    }

    #[tokio::test]
    async fn test_second_driver_is_rejected() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(store);
        let report = engine.start(Counter::default()).await.unwrap();
        let run_id = report.session.thread_id;
        let _held = engine.supervisor().acquire(&run_id).unwrap();
        let err = engine.resume(&run_id, HumanResponse::Accept).await.unwrap_err();
        assert!(matches!(err, HiveError::RunBusy(_)));
    }

    #[tokio::test]
    async fn test_unknown_run_and_workflow_mismatch() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(store.clone());
        assert!(matches!(
            engine.status("counter_missing").await,
            Err(HiveError::RunNotFound(_))
        ));

        let report = engine.start(Counter::default()).await.unwrap();
        let mut cp = store.load(&report.session.thread_id).await.unwrap().unwrap();
        cp.workflow = "planner".into();
        store.save(&cp).await.unwrap();
        assert!(matches!(
            engine.status(&cp.run_id).await,
            Err(HiveError::WorkflowMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_sandbox_stopped_on_suspend_and_started_on_resume() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let sandbox = Arc::new(RecordingSandbox::new());
        let engine = WorkflowEngine::new(CounterFlow::new(), store, sandbox.clone());
        let report = engine
            .start(Counter {
                session: Some("sbx-1".into()),
                ..Counter::default()
            })
            .await
            .unwrap();
        engine
            .resume(&report.session.thread_id, HumanResponse::Accept)
            .await
            .unwrap();
        assert_eq!(
            sandbox.events(),
            vec![
                SandboxEvent::Stopped("sbx-1".into()),
                SandboxEvent::Started("sbx-1".into()),
            ]
        );
    }

    /// 把运行改写成「进程在 stage 中途退出」时的检查点
    async fn crash_in(
        store: &InMemoryCheckpointStore,
        run_id: &str,
        stage: Stage,
        n: u32,
        pending: Option<InterruptEnvelope>,
    ) {
        let mut cp = store.load(run_id).await.unwrap().unwrap();
        cp.stage = serde_json::to_value(stage).unwrap();
        cp.state["n"] = serde_json::json!(n);
        cp.status = RunStatus::Running;
        cp.pending_interrupt = pending;
        store.save(&cp).await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_redrives_from_stored_stage() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let report = engine(store.clone())
            .start(Counter {
                target: 3,
                ..Counter::default()
            })
            .await
            .unwrap();
        let run_id = report.session.thread_id;
        crash_in(&store, &run_id, Stage::Count, 1, None).await;

        let recovered = engine(store.clone()).recover(&run_id).await.unwrap();
        assert!(recovered.is_awaiting());
        assert_eq!(recovered.state.n, 3);
        assert!(store.load(&run_id).await.unwrap().unwrap().pending_interrupt.is_none());
    }

    #[tokio::test]
    async fn test_recover_interrupts_again_when_response_was_lost() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let sandbox = Arc::new(RecordingSandbox::new());
        let first = engine(store.clone());
        let report = first
            .start(Counter {
                target: 2,
                ..Counter::default()
            })
            .await
            .unwrap();
        let run_id = report.session.thread_id;
        let envelope = report.status.pending_interrupt().cloned().unwrap();
        crash_in(&store, &run_id, Stage::Ask, 2, Some(envelope.clone())).await;
        assert!(matches!(
            first.resume(&run_id, HumanResponse::Accept).await,
            Err(HiveError::NotAwaiting(_))
        ));

        let other = WorkflowEngine::new(CounterFlow::new(), store.clone(), sandbox.clone());
        let again = other.recover(&run_id).await.unwrap();
        assert_eq!(again.status.pending_interrupt(), Some(&envelope));
        assert_eq!(again.state.n, 2);

        let done = other
            .resume(&run_id, HumanResponse::Respond("two".into()))
            .await
            .unwrap();
        assert!(done.is_completed());
        assert_eq!(done.state.answer.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_recover_rejects_settled_and_busy_runs() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(store.clone());
        let report = engine.start(Counter::default()).await.unwrap();
        let run_id = report.session.thread_id;
        assert!(matches!(
            engine.recover(&run_id).await,
            Err(HiveError::NotRecoverable(_))
        ));

        crash_in(&store, &run_id, Stage::Count, 0, None).await;
        let _held = engine.supervisor().acquire(&run_id).unwrap();
        assert!(matches!(
            engine.recover(&run_id).await,
            Err(HiveError::RunBusy(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_runs_in_background() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = Arc::new(engine(store));
        let (session, handle) = engine
            .submit(Counter {
                target: 2,
                ..Counter::default()
            })
            .await
            .unwrap();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.session.thread_id, session.thread_id);
        assert!(report.is_awaiting());
    }
}
