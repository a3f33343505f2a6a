//! 各阶段的系统提示词（对模型调用而言是不透明输入）

use crate::plan::numbered_plan;

pub const GATHER_CONTEXT_PROMPT: &str = "You are a senior engineer preparing to plan work on a codebase.
Use the available read-only tools to gather the context you need to write a plan for the user's request.
Call one tool at a time. When you have enough context, reply without calling any tool.";

pub const GENERATE_PLAN_PROMPT: &str = "You are a senior engineer writing a high-level plan for the user's request.
Call the `session_plan` tool exactly once with a short title and an ordered list of plan steps.
Each step is one short natural-language sentence. Do not include code.
If the request is too ambiguous to plan, do not call the tool; ask the user a clarifying question instead.";

pub const SUMMARIZE_PROMPT: &str = "Summarize the context gathered by the tool calls above in a few concise bullet points.
Keep file paths, symbols and facts that matter for carrying out the plan. Do not repeat the plan.";

pub const REWRITE_PLAN_PROMPT: &str = "You are a senior engineer revising a plan after feedback from the user.
Call the `session_plan` tool exactly once with the COMPLETE replacement plan, not a diff.
Each step is one short natural-language sentence. Do not include code.
If the feedback is unclear, do not call the tool; ask the user a clarifying question instead.";

pub const REVIEW_ACTIONS_PROMPT: &str = "You are reviewing changes made by another engineer in this workspace.
Use the available read-only tools to inspect the changes and verify the plan was carried out.
Call one tool at a time. When you have seen enough, reply without calling any tool.";

pub const DIAGNOSE_ERROR_PROMPT: &str = "The last tool call failed. Explain briefly why it most likely failed
and what to try instead. Answer in two or three sentences.";

pub const FINAL_REVIEW_PROMPT: &str = "Decide whether the task is complete.
Call `mark_task_completed` with a short review if every plan step was carried out correctly.
Otherwise call `mark_task_not_complete` with a short review and the additional actions still required.";

pub const CLASSIFY_MESSAGE_PROMPT: &str = "You route incoming messages for a coding agent.
Call the `respond_and_route` tool with a short response to the user and the route for the latest message.
Use `no_op` when the message needs no new planning (greetings, thanks, questions already answered).";

/// 带历史上下文的 system prompt
pub fn with_history(base: &str, request: &str, history: &str) -> String {
    let mut prompt = format!("{}\n\n<request>\n{}\n</request>", base, request);
    if !history.is_empty() {
        prompt.push_str(&format!("\n\n<previous-tasks>\n{}\n</previous-tasks>", history));
    }
    prompt
}

/// 重写计划的 system prompt：原计划 + 修改意见
pub fn rewrite_prompt(request: &str, previous_plan: &[String], change_request: &str) -> String {
    format!(
        "{}\n\n<request>\n{}\n</request>\n\n<previous-plan>\n{}\n</previous-plan>\n\n<change-request>\n{}\n</change-request>",
        REWRITE_PLAN_PROMPT,
        request,
        numbered_plan(previous_plan),
        change_request
    )
}

/// 分类 prompt：列出全部路由标签
pub fn classify_prompt(labels: &[String]) -> String {
    format!(
        "{}\n\nAvailable routes: {}",
        CLASSIFY_MESSAGE_PROMPT,
        labels.join(", ")
    )
}
