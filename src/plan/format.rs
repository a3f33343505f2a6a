//! 计划渲染
//!
//! render_followup_context 是唯一把多个任务合并为一段文本的地方，格式直接进入 Prompt，
//! 任务按 taskIndex、计划项按 index 升序，格式必须稳定。

use crate::plan::types::{PlanItem, Task, TaskPlan};

const NO_SUMMARY: &str = "No summary available.";

/// 渲染计划项列表（按 index 升序）
pub fn format_plan_items(items: &[PlanItem]) -> String {
    let mut sorted: Vec<&PlanItem> = items.iter().collect();
    sorted.sort_by_key(|i| i.index);
    sorted
        .into_iter()
        .map(|item| {
            let mut block = format!(
                "<plan-item index=\"{}\" completed=\"{}\">\n{}\n",
                item.index, item.completed, item.plan
            );
            if let Some(summary) = &item.summary {
                block.push_str(&format!("<summary>{}</summary>\n", summary));
            }
            block.push_str("</plan-item>");
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_task(task: &Task) -> String {
    let items = format_plan_items(task.active_items());
    let plan_block = if items.is_empty() {
        "<plan>\n</plan>".to_string()
    } else {
        format!("<plan>\n{}\n</plan>", items)
    };
    format!(
        "<previous-task index=\"{}\">\n<request>\n{}\n</request>\n<summary>\n{}\n</summary>\n{}\n</previous-task>",
        task.task_index,
        task.request,
        task.summary.as_deref().unwrap_or(NO_SUMMARY),
        plan_block
    )
}

/// 渲染此前所有任务（请求、摘要、生效修订的计划项），供 follow-up 规划使用；
/// exclude_task 为正在规划的任务，不计入历史。
pub fn render_followup_context(plan: &TaskPlan, exclude_task: Option<u64>) -> String {
    let mut tasks: Vec<&Task> = plan
        .tasks
        .iter()
        .filter(|t| Some(t.task_index) != exclude_task)
        .collect();
    tasks.sort_by_key(|t| t.task_index);
    tasks
        .into_iter()
        .map(format_task)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 把计划编号为「1. xxx」的纯文本列表（用于审批描述与日志）
pub fn numbered_plan(plans: &[String]) -> String {
    plans
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, p))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::RevisionSource;

    #[test]
    fn test_render_followup_exact_format() {
        let mut plan = TaskPlan::new();
        let task = plan.create_task("Add login");
        let r = task
            .propose_revision(&["Add auth".to_string(), "Add tests".to_string()], RevisionSource::Planner)
            .unwrap();
        task.accept_revision(r).unwrap();
        task.complete_item(0, "added jwt auth").unwrap();
        task.complete("login works");

        let rendered = render_followup_context(&plan, None);
        let expected = "<previous-task index=\"0\">\n\
<request>\nAdd login\n</request>\n\
<summary>\nlogin works\n</summary>\n\
<plan>\n\
<plan-item index=\"0\" completed=\"true\">\nAdd auth\n<summary>added jwt auth</summary>\n</plan-item>\n\
<plan-item index=\"1\" completed=\"false\">\nAdd tests\n</plan-item>\n\
</plan>\n\
</previous-task>";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_orders_tasks_and_skips_excluded() {
        let mut plan = TaskPlan::new();
        plan.create_task("first");
        plan.create_task("second");
        plan.create_task("third");
        plan.tasks.swap(0, 1);

        let rendered = render_followup_context(&plan, Some(2));
        let first = rendered.find("first").unwrap();
        let second = rendered.find("second").unwrap();
        assert!(first < second);
        assert!(!rendered.contains("third"));
        assert!(rendered.contains(NO_SUMMARY));
        assert_eq!(rendered.matches("</previous-task>\n\n<previous-task").count(), 1);
    }

    #[test]
    fn test_numbered_plan() {
        let s = numbered_plan(&["a".to_string(), "b".to_string()]);
        assert_eq!(s, "1. a\n2. b");
    }
}
