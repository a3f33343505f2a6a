//! Reviewer 工作流集成测试：失败动作的诊断回路、完成 / 未完成裁决

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive::llm::{MockLlmClient, ModelResponse, ToolChoice};
    use hive::memory::{CheckpointStore, InMemoryCheckpointStore, Role, ToolStatus};
    use hive::pipeline::{
        ReviewerState, ReviewerWorkflow, MARK_COMPLETED_TOOL, MARK_NOT_COMPLETE_TOOL,
    };
    use hive::plan::{RevisionSource, TaskPlan};
    use hive::react::{ActionLoop, EventSink, WorkflowEvent};
    use hive::tools::{EchoTool, RecordingSandbox, SandboxEvent, ToolExecutor, ToolRegistry};
    use hive::workflow::{RunStatus, WorkflowEngine};
    use hive::HiveError;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn engine(
        mock: Arc<MockLlmClient>,
        sandbox: Arc<RecordingSandbox>,
        events: EventSink,
    ) -> (WorkflowEngine<ReviewerWorkflow>, Arc<InMemoryCheckpointStore>) {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let executor = Arc::new(ToolExecutor::new(registry, 5));
        let actions = ActionLoop::new(mock, executor, vec!["echo".to_string()]);
        let workflow = ReviewerWorkflow::new(actions, sandbox.clone()).unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = WorkflowEngine::new(Arc::new(workflow), store.clone(), sandbox)
            .with_events(events);
        (engine, store)
    }

    /// 一个已接受两步计划的任务
    fn accepted_plan() -> TaskPlan {
        let mut plan = TaskPlan::new();
        let task = plan.create_task("Add authentication");
        let revision = task
            .propose_revision(
                &["Add auth".to_string(), "Add tests".to_string()],
                RevisionSource::Planner,
            )
            .unwrap();
        task.accept_revision(revision).unwrap();
        plan
    }

    fn stages(rx: &mut mpsc::UnboundedReceiver<WorkflowEvent>) -> Vec<String> {
        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::StageEntered { stage, .. } = event {
                stages.push(stage);
            }
        }
        stages
    }

    #[tokio::test]
    async fn test_failed_action_is_diagnosed_before_next_action() {
        let mock = Arc::new(MockLlmClient::from_script([
            // 缺少 text 参数，echo 失败
            ModelResponse::tool_call("echo", json!({})),
            ModelResponse::text("The echo tool needs a text argument."),
            ModelResponse::tool_call("echo", json!({ "text": "auth.rs looks fine" })),
            ModelResponse::text("Everything checks out."),
            ModelResponse::tool_call(MARK_COMPLETED_TOOL, json!({ "review": "All steps done." })),
        ]));
        let sandbox = Arc::new(RecordingSandbox::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (engine, _) = engine(mock.clone(), sandbox.clone(), EventSink::new(tx));

        let report = engine
            .start(ReviewerState::new(accepted_plan(), 0, "sbx-review"))
            .await
            .unwrap();
        assert!(report.is_completed());

        assert_eq!(
            stages(&mut rx),
            vec![
                "Initialize",
                "GenerateReviewAction",
                "TakeReviewAction",
                "DiagnoseError",
                "GenerateReviewAction",
                "TakeReviewAction",
                "GenerateReviewAction",
                "FinalReview",
            ]
        );

        let messages = &report.state.messages;
        let results: Vec<_> = messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(results[0].status, Some(ToolStatus::Error));
        assert!(results[0].content.starts_with("ERROR:"));
        assert_eq!(results[1].content, "auth.rs looks fine");
        assert!(messages
            .iter()
            .any(|m| m.role == Role::User && m.content.contains("needs a text argument")));

        let verdict = report.state.verdict.clone().unwrap();
        assert!(verdict.accepted);
        assert_eq!(verdict.review, "All steps done.");
        let task = report.state.task_plan.task(0).unwrap();
        assert!(task.completed);
        assert_eq!(task.summary.as_deref(), Some("All steps done."));

        assert_eq!(mock.requests().last().unwrap().tool_choice, ToolChoice::Any);
        assert_eq!(
            sandbox.events(),
            vec![SandboxEvent::Started("sbx-review".to_string())]
        );
    }

    #[tokio::test]
    async fn test_rejection_appends_follow_up_actions() {
        let mut plan = accepted_plan();
        let task = plan.task_mut(0).unwrap();
        task.complete_item(0, "auth added").unwrap();
        task.complete_item(1, "tests added").unwrap();

        let mock = Arc::new(MockLlmClient::from_script([
            ModelResponse::text("Docs are missing."),
            ModelResponse::tool_call(
                MARK_NOT_COMPLETE_TOOL,
                json!({ "review": "No docs.", "additional_actions": ["Add docs"] }),
            ),
        ]));
        let (engine, _) = engine(mock, Arc::new(RecordingSandbox::new()), EventSink::none());
        let report = engine
            .start(ReviewerState::new(plan, 0, "sbx-review"))
            .await
            .unwrap();

        let verdict = report.state.verdict.clone().unwrap();
        assert!(!verdict.accepted);
        assert_eq!(verdict.follow_up_actions, vec!["Add docs".to_string()]);

        let task = report.state.task_plan.task(0).unwrap();
        assert!(!task.completed);
        assert_eq!(task.active_revision().created_by, RevisionSource::Reviewer);
        let items = task.active_items();
        assert_eq!(items.len(), 3);
        assert!(items[0].completed && items[1].completed);
        assert_eq!(items[0].summary.as_deref(), Some("auth added"));
        assert_eq!(items[2].index, 2);
        assert_eq!(items[2].plan, "Add docs");
        assert!(!items[2].completed);
    }

    #[tokio::test]
    async fn test_review_budget_closes_dangling_call() {
        let mock = Arc::new(MockLlmClient::from_script([
            ModelResponse::tool_call("echo", json!({ "text": "one" })),
            ModelResponse::tool_call("echo", json!({ "text": "two" })),
            ModelResponse::tool_call(MARK_COMPLETED_TOOL, json!({ "review": "Fine." })),
        ]));
        let (engine, _) = engine(mock, Arc::new(RecordingSandbox::new()), EventSink::none());
        let state = ReviewerState::new(accepted_plan(), 0, "sbx-review").with_max_review_actions(Some(1));
        let report = engine.start(state).await.unwrap();

        let results: Vec<_> = report
            .state
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].content.contains("action budget of 1 exhausted"));
        assert!(report.state.verdict.unwrap().accepted);
    }

    #[tokio::test]
    async fn test_missing_sandbox_session_fails_run() {
        let mock = Arc::new(MockLlmClient::new());
        let sandbox = Arc::new(RecordingSandbox::new());
        let (engine, store) = engine(mock.clone(), sandbox.clone(), EventSink::none());
        let mut state = ReviewerState::new(accepted_plan(), 0, "unused");
        state.sandbox_session_id = None;

        let err = engine.start(state).await.unwrap_err();
        assert!(matches!(err, HiveError::MissingSandboxSession));
        assert!(mock.requests().is_empty());
        assert!(sandbox.events().is_empty());

        let runs = store.list().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(matches!(
            engine.status(&runs[0]).await.unwrap(),
            RunStatus::Failed { .. }
        ));
    }
}
