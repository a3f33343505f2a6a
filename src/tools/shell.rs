//! 只读命令工具
//!
//! 命令按 shell 引号规则拆分后直接执行（不经过 sh），因此管道、重定向、命令替换都不可用；
//! 程序名必须在配置的白名单内，git 只允许查询类子命令。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::{parameters_for, Tool};

/// 输出最大字符数
const MAX_OUTPUT_CHARS: usize = 20_000;

/// 只读命令里不应出现的 shell 元字符
const SHELL_METACHARS: &[&str] = &[";", "|", "&", ">", "<", "`", "$("];

/// find 的写操作 / 执行参数
const FIND_WRITE_FLAGS: &[&str] = &[
    "-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint", "-fprint0", "-fprintf", "-fls",
];

const READ_ONLY_GIT: &[&str] = &[
    "log", "show", "diff", "status", "blame", "grep", "ls-files", "rev-parse", "branch",
];

/// git 子命令中会写文件或启动外部程序的参数（前缀匹配）
const GIT_WRITE_FLAGS: &[&str] = &["--output", "-o", "-O", "--open-files-in-pager", "--ext-diff"];

/// git branch 的修改类参数
const GIT_BRANCH_WRITE_FLAGS: &[&str] = &[
    "-d", "-D", "-m", "-M", "-c", "-C", "-f", "-u", "--delete", "--move", "--copy", "--force",
    "--set-upstream-to", "--unset-upstream", "--edit-description", "--track", "--no-track",
];

#[derive(Debug, Deserialize, JsonSchema)]
struct ShellArgs {
    /// 要执行的命令，例如 `grep -rn session_plan src`
    command: String,
}

pub struct ShellTool {
    allowed_programs: HashSet<String>,
    timeout: Duration,
    workdir: PathBuf,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64, workdir: impl AsRef<Path>) -> Self {
        Self {
            allowed_programs: allowed_commands.into_iter().collect(),
            timeout: Duration::from_secs(timeout_secs),
            workdir: workdir.as_ref().to_path_buf(),
        }
    }

    /// 校验并拆分命令，返回 (程序, 参数)
    fn parse_command(&self, raw: &str) -> Result<(String, Vec<String>), String> {
        if let Some(meta) = SHELL_METACHARS.iter().find(|m| raw.contains(*m)) {
            return Err(format!("Shell operator '{}' is not supported", meta));
        }
        let mut parts = shlex::split(raw)
            .ok_or_else(|| "Unbalanced quotes in command".to_string())?
            .into_iter();
        let program = parts.next().ok_or_else(|| "Empty command".to_string())?;
        if !self.allowed_programs.contains(&program) {
            return Err(format!("Command '{}' is not allowed", program));
        }
        let args: Vec<String> = parts.collect();
        match program.as_str() {
            "git" => check_git(&args)?,
            "find" => {
                if let Some(flag) = args.iter().find(|a| FIND_WRITE_FLAGS.contains(&a.as_str())) {
                    return Err(format!("find {} is not allowed", flag));
                }
            }
            _ => {}
        }
        Ok((program, args))
    }
}

/// git 只允许 `[--no-pager] <只读子命令> [参数]`，全局选项（如 -c）一律拒绝
fn check_git(args: &[String]) -> Result<(), String> {
    let rest = match args.first().map(String::as_str) {
        Some("--no-pager") => &args[1..],
        _ => args,
    };
    let (sub, sub_args) = rest
        .split_first()
        .ok_or_else(|| "git needs a subcommand".to_string())?;
    if !READ_ONLY_GIT.contains(&sub.as_str()) {
        return Err(format!("git {} is not a read-only command", sub));
    }
    let matches_flag = |arg: &str, flags: &[&str]| {
        flags
            .iter()
            .any(|f| arg == *f || (f.starts_with("--") && arg.starts_with(&format!("{}=", f))))
    };
    if let Some(flag) = sub_args
        .iter()
        .find(|a| matches_flag(a.as_str(), GIT_WRITE_FLAGS))
    {
        return Err(format!("git {} {} is not allowed", sub, flag));
    }
    if sub == "branch" {
        if let Some(arg) = sub_args
            .iter()
            .find(|a| !a.starts_with('-') || matches_flag(a.as_str(), GIT_BRANCH_WRITE_FLAGS))
        {
            return Err(format!("git branch {} is not allowed", arg));
        }
    }
    Ok(())
}

fn truncate(mut text: String) -> String {
    if text.chars().count() > MAX_OUTPUT_CHARS {
        text = text.chars().take(MAX_OUTPUT_CHARS).collect();
        text.push_str("\n... [truncated]");
    }
    text
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a read-only, allow-listed command in the repository root (e.g. grep, find, git log). Pipes and redirects are not supported."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ShellArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ShellArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let (program, argv) = self.parse_command(args.command.trim())?;
        tracing::debug!(program = %program, args = ?argv, "running read-only command");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&program)
                .args(&argv)
                .current_dir(&self.workdir)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| format!("Command timed out after {}s", self.timeout.as_secs()))?
        .map_err(|e| format!("Failed to run {}: {}", program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(format!("exit {}: {}", code, stderr.trim()));
        }
        Ok(truncate(stdout.into_owned()))
    }
}
