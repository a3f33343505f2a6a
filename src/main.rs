//! Hive CLI
//!
//! 入口：加载配置、初始化日志，组装 Pipeline（文件检查点 + 只读工作区工具），执行子命令。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use hive::config::{load_config, AppConfig};
use hive::llm::{LlmClient, MockLlmClient, ModelResponse, OpenAiClient};
use hive::memory::FileCheckpointStore;
use hive::pipeline::{Pipeline, PlannerState, APPROVE_PLAN_ACTION};
use hive::react::EventSink;
use hive::tools::{LsTool, NoopSandbox, ShellTool, ToolExecutor, ToolRegistry, ViewTool};
use hive::workflow::{ActionRequest, HumanResponse, RunReport, RunStatus};

/// Hive - planning, approval and review pipeline for coding agents
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print workflow events as JSON lines on stderr
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a request; starts a manager run
    Submit {
        request: String,

        /// Continue the session of a previous manager run
        #[arg(long, value_name = "RUN_ID")]
        follow_up: Option<String>,
    },

    /// Resume a run suspended for plan approval
    Resume {
        /// Manager or planner run id
        run_id: String,

        #[command(flatten)]
        response: ResponseArgs,
    },

    /// Review the accepted plan of a planner run
    Review { planner_run_id: String },

    /// Show the status of a run
    Status { run_id: String },

    /// Cancel a run
    Cancel { run_id: String },

    /// Drive a run again that was left running when the process exited
    Recover { run_id: String },

    /// List all runs
    Runs,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ResponseArgs {
    /// Accept the proposed plan as is
    #[arg(long)]
    accept: bool,

    /// Replace the plan (steps separated by the plan delimiter)
    #[arg(long, value_name = "PLAN")]
    edit: Option<String>,

    /// Ask for changes; the planner rewrites the plan
    #[arg(long, value_name = "TEXT")]
    respond: Option<String>,

    /// Drop the plan
    #[arg(long)]
    ignore: bool,

    /// Raw response JSON: {"type": "...", "args": ...}
    #[arg(long, value_name = "JSON")]
    raw: Option<String>,
}

impl ResponseArgs {
    fn into_response(self) -> anyhow::Result<HumanResponse> {
        if self.accept {
            return Ok(HumanResponse::Accept);
        }
        if self.ignore {
            return Ok(HumanResponse::Ignore);
        }
        if let Some(plan) = self.edit {
            return Ok(HumanResponse::Edit(
                ActionRequest::new(APPROVE_PLAN_ACTION).with_arg("plan", plan),
            ));
        }
        if let Some(text) = self.respond {
            return Ok(HumanResponse::Respond(text));
        }
        let raw = self.raw.context("no response given")?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).context("--raw is not valid JSON")?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .context("--raw needs a \"type\" field")?;
        Ok(HumanResponse::parse(kind, value.get("args").cloned())?)
    }
}

fn build_llm(cfg: &AppConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    if cfg.llm.provider != "mock" {
        if let Some(key) = cfg.llm.api_key() {
            let client = OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &key,
                cfg.llm.request_timeout_secs,
            );
            return Ok(Arc::new(client));
        }
        tracing::warn!(env = %cfg.llm.api_key_env, "API key not set, using mock model");
    }
    Ok(Arc::new(MockLlmClient::new().with_fallback(ModelResponse::text(
        "Mock model: no API key configured.",
    ))))
}

fn build_pipeline(cfg: &AppConfig, events: EventSink) -> anyhow::Result<Pipeline> {
    let workspace = &cfg.app.workspace_root;
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;

    let mut tools = ToolRegistry::new();
    tools.register(ViewTool::new(workspace));
    tools.register(LsTool::new(workspace));
    tools.register(ShellTool::new(
        cfg.tools.shell.allowed_commands.clone(),
        cfg.tools.tool_timeout_secs,
        workspace,
    ));
    let executor = Arc::new(ToolExecutor::new(tools, cfg.tools.tool_timeout_secs));
    let store = Arc::new(FileCheckpointStore::new(&cfg.app.checkpoint_dir));

    Pipeline::new(
        cfg.clone(),
        build_llm(cfg)?,
        executor,
        store,
        Arc::new(NoopSandbox),
        events,
    )
    .context("failed to build pipeline")
}

fn print_status(run_id: &str, status: &RunStatus) {
    match status {
        RunStatus::Awaiting { envelope } => {
            println!("{}: awaiting '{}'", run_id, envelope.action_request.action);
            println!("{}", envelope.description);
        }
        RunStatus::Failed { error } => println!("{}: failed: {}", run_id, error),
        other => println!("{}: {}", run_id, other.label()),
    }
}

fn print_planner(report: &RunReport<PlannerState>) {
    print_status(&report.session.thread_id, &report.status);
    if let Some(question) = &report.state.clarification {
        println!("clarification: {}", question);
    }
    for item in report.state.accepted_plan() {
        println!("  [{}] {}", item.index, item.plan);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("failed to load config")?;

    let events = if cli.events {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
        });
        EventSink::new(tx)
    } else {
        EventSink::none()
    };
    let pipeline = build_pipeline(&cfg, events)?;

    match cli.command {
        Command::Submit { request, follow_up } => {
            let submission = pipeline
                .submit(&request, follow_up.as_deref())
                .await
                .context("submit failed")?;
            let manager = &submission.manager;
            print_status(&manager.session.thread_id, &manager.status);
            if let Some(route) = &manager.state.route_label {
                println!("route: {}", route);
            }
            if let Some(response) = &manager.state.response {
                println!("response: {}", response);
            }
            if let Some(planner) = &submission.planner {
                print_planner(planner);
            }
        }
        Command::Resume { run_id, response } => {
            let response = response.into_response()?;
            let report = pipeline
                .resume(&run_id, response)
                .await
                .context("resume failed")?;
            print_planner(&report);
        }
        Command::Review { planner_run_id } => {
            let report = pipeline
                .review(&planner_run_id)
                .await
                .context("review failed")?;
            print_status(&report.session.thread_id, &report.status);
            if let Some(verdict) = &report.state.verdict {
                println!(
                    "verdict: {}",
                    if verdict.accepted { "accepted" } else { "rejected" }
                );
                println!("{}", verdict.review);
                for action in &verdict.follow_up_actions {
                    println!("  - {}", action);
                }
            }
        }
        Command::Status { run_id } => {
            let status = pipeline.status(&run_id).await?;
            print_status(&run_id, &status);
        }
        Command::Cancel { run_id } => {
            let status = pipeline.cancel(&run_id).await?;
            print_status(&run_id, &status);
        }
        Command::Recover { run_id } => {
            let status = pipeline.recover(&run_id).await.context("recover failed")?;
            print_status(&run_id, &status);
        }
        Command::Runs => {
            for run_id in pipeline.runs().await? {
                let status = pipeline.status(&run_id).await?;
                println!("{}\t{}", run_id, status.label());
            }
        }
    }
    pipeline.shutdown().await?;
    Ok(())
}
