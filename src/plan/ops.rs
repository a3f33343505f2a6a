//! 任务计划操作
//!
//! 所有变更先校验再应用：校验失败返回 PlanError，模型保持原状。

use std::collections::{HashMap, HashSet};

use crate::core::PlanError;
use crate::plan::types::{PlanItem, PlanRevision, RevisionSource, Task, TaskPlan};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 当前项：index 最小的未完成项（与数组顺序无关）；全部完成时返回哨兵
pub fn get_current_item(items: &[PlanItem]) -> PlanItem {
    items
        .iter()
        .filter(|i| !i.completed)
        .min_by_key(|i| i.index)
        .cloned()
        .unwrap_or_else(PlanItem::sentinel)
}

/// 未完成项按 index 排序；include_current=false 时去掉当前项
pub fn get_remaining_items(items: &[PlanItem], include_current: bool) -> Vec<PlanItem> {
    let mut remaining: Vec<PlanItem> = items.iter().filter(|i| !i.completed).cloned().collect();
    remaining.sort_by_key(|i| i.index);
    if !include_current && !remaining.is_empty() {
        remaining.remove(0);
    }
    remaining
}

/// 已完成项按 index 排序
pub fn get_completed_items(items: &[PlanItem]) -> Vec<PlanItem> {
    let mut done: Vec<PlanItem> = items.iter().filter(|i| i.completed).cloned().collect();
    done.sort_by_key(|i| i.index);
    done
}

impl PlanItem {
    /// 标记完成并附加摘要；已完成时拒绝
    pub fn mark_completed(&mut self, summary: impl Into<String>) -> Result<(), PlanError> {
        if self.completed {
            return Err(PlanError::AlreadyCompleted { index: self.index });
        }
        self.completed = true;
        self.summary = Some(summary.into());
        Ok(())
    }
}

fn check_unique(items: &[PlanItem]) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.index) {
            return Err(PlanError::DuplicateIndex { index: item.index });
        }
    }
    Ok(())
}

impl Task {
    pub fn new(task_index: u64, request: impl Into<String>) -> Self {
        let created_at = now_ms();
        Self {
            task_index,
            request: request.into(),
            created_at,
            plan_revisions: vec![PlanRevision {
                revision_index: 0,
                plans: Vec::new(),
                created_by: RevisionSource::Initial,
                created_at,
            }],
            active_revision_index: 0,
            completed: false,
            summary: None,
        }
    }

    pub fn active_revision(&self) -> &PlanRevision {
        &self.plan_revisions[self.active_revision_index]
    }

    /// 当前生效的计划项
    pub fn active_items(&self) -> &[PlanItem] {
        &self.active_revision().plans
    }

    pub fn latest_revision_index(&self) -> usize {
        self.plan_revisions.len() - 1
    }

    fn append_revision(&mut self, mut plans: Vec<PlanItem>, source: RevisionSource) -> usize {
        plans.sort_by_key(|i| i.index);
        let revision_index = self.plan_revisions.len();
        self.plan_revisions.push(PlanRevision {
            revision_index,
            plans,
            created_by: source,
            created_at: now_ms(),
        });
        revision_index
    }

    /// 由字符串列表追加一个全新修订（index 从 0 开始），不改变 active_revision_index。
    /// 若当前修订已有完成项则拒绝：完成项不能被丢弃，应使用 revise / revise_remaining。
    pub fn propose_revision(
        &mut self,
        items: &[String],
        source: RevisionSource,
    ) -> Result<usize, PlanError> {
        if let Some(done) = self.active_items().iter().find(|i| i.completed) {
            return Err(PlanError::CompletedItemModified { index: done.index });
        }
        let plans = items
            .iter()
            .enumerate()
            .map(|(i, p)| PlanItem::new(i as i64, p.clone()))
            .collect();
        Ok(self.append_revision(plans, source))
    }

    /// 追加一个经过校验的修订：当前修订中的完成项必须原样保留（只允许补充摘要），
    /// 新增或编辑的项必须是未完成状态。
    pub fn revise(
        &mut self,
        items: Vec<PlanItem>,
        source: RevisionSource,
    ) -> Result<usize, PlanError> {
        check_unique(&items)?;
        let proposed: HashMap<i64, &PlanItem> = items.iter().map(|i| (i.index, i)).collect();
        let mut completed_indices = HashSet::new();
        for done in self.active_items().iter().filter(|i| i.completed) {
            completed_indices.insert(done.index);
            let kept = proposed
                .get(&done.index)
                .ok_or(PlanError::CompletedItemModified { index: done.index })?;
            let summary_ok = match (&done.summary, &kept.summary) {
                (Some(old), Some(new)) => old == new,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if !kept.completed || kept.plan != done.plan || !summary_ok {
                return Err(PlanError::CompletedItemModified { index: done.index });
            }
        }
        if let Some(bad) = items
            .iter()
            .find(|i| i.completed && !completed_indices.contains(&i.index))
        {
            return Err(PlanError::CompletedItemModified { index: bad.index });
        }
        Ok(self.append_revision(items, source))
    }

    /// 保留当前修订的完成项，用 plans 替换全部剩余项（编号接在最大保留 index 之后）。
    ///
    /// 旧修订中尚未完成的项不会并入新修订：调用方给出的 plans 就是任务剩余的全部工作。
    /// Reviewer 拒绝时即以此方式把 follow-up actions 作为新的剩余计划。
    pub fn revise_remaining(
        &mut self,
        plans: &[String],
        source: RevisionSource,
    ) -> Result<usize, PlanError> {
        let mut items = get_completed_items(self.active_items());
        let start = items.iter().map(|i| i.index + 1).max().unwrap_or(0);
        items.extend(
            plans
                .iter()
                .enumerate()
                .map(|(i, p)| PlanItem::new(start + i as i64, p.clone())),
        );
        self.revise(items, source)
    }

    /// 将 revision_index 设为生效修订
    pub fn accept_revision(&mut self, revision_index: usize) -> Result<(), PlanError> {
        if revision_index >= self.plan_revisions.len() {
            return Err(PlanError::InvalidRevision {
                index: revision_index,
                len: self.plan_revisions.len(),
            });
        }
        self.active_revision_index = revision_index;
        Ok(())
    }

    /// 在生效修订上完成某一项
    pub fn complete_item(&mut self, index: i64, summary: impl Into<String>) -> Result<(), PlanError> {
        let revision = &mut self.plan_revisions[self.active_revision_index];
        let item = revision
            .plans
            .iter_mut()
            .find(|i| i.index == index)
            .ok_or(PlanError::ItemNotFound { index })?;
        item.mark_completed(summary)
    }

    pub fn current_item(&self) -> PlanItem {
        get_current_item(self.active_items())
    }

    /// 整个任务完成并附加摘要
    pub fn complete(&mut self, summary: impl Into<String>) {
        self.completed = true;
        self.summary = Some(summary.into());
    }
}

impl TaskPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配下一个 taskIndex（单调递增）并设为当前任务
    pub fn create_task(&mut self, request: impl Into<String>) -> &mut Task {
        let task_index = self
            .tasks
            .iter()
            .map(|t| t.task_index + 1)
            .max()
            .unwrap_or(0);
        self.tasks.push(Task::new(task_index, request));
        self.active_task_index = Some(task_index);
        let last = self.tasks.len() - 1;
        &mut self.tasks[last]
    }

    pub fn task(&self, task_index: u64) -> Result<&Task, PlanError> {
        self.tasks
            .iter()
            .find(|t| t.task_index == task_index)
            .ok_or(PlanError::TaskNotFound(task_index))
    }

    pub fn task_mut(&mut self, task_index: u64) -> Result<&mut Task, PlanError> {
        self.tasks
            .iter_mut()
            .find(|t| t.task_index == task_index)
            .ok_or(PlanError::TaskNotFound(task_index))
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.active_task_index.and_then(|i| self.task(i).ok())
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 校验不变量：taskIndex 唯一且递增、active_revision_index 有效、修订内 index 唯一
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut last: Option<u64> = None;
        for task in &self.tasks {
            if let Some(prev) = last {
                if task.task_index <= prev {
                    return Err(PlanError::TaskIndexOrder(task.task_index));
                }
            }
            last = Some(task.task_index);
            if task.active_revision_index >= task.plan_revisions.len() {
                return Err(PlanError::InvalidRevision {
                    index: task.active_revision_index,
                    len: task.plan_revisions.len(),
                });
            }
            for revision in &task.plan_revisions {
                check_unique(&revision.plans)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(plans: &[&str]) -> Vec<String> {
        plans.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_current_item_ignores_array_order() {
        let a = PlanItem::new(2, "c");
        let b = PlanItem::new(1, "b");
        let mut c = PlanItem::new(0, "a");
        c.completed = true;
        let current = get_current_item(&[a, b, c]);
        assert_eq!(current.index, 1);
    }

    #[test]
    fn test_current_item_sentinel_when_all_done() {
        let mut a = PlanItem::new(0, "a");
        a.mark_completed("ok").unwrap();
        let current = get_current_item(&[a]);
        assert!(current.is_sentinel());
        assert!(current.completed);
        assert_eq!(current.plan, "No current task found.");
        assert!(get_current_item(&[]).is_sentinel());
    }

    #[test]
    fn test_remaining_items_excluding_current() {
        let list = vec![PlanItem::new(3, "d"), PlanItem::new(1, "b"), PlanItem::new(2, "c")];
        let with = get_remaining_items(&list, true);
        assert_eq!(with.iter().map(|i| i.index).collect::<Vec<_>>(), vec![1, 2, 3]);
        let without = get_remaining_items(&list, false);
        assert_eq!(without.iter().map(|i| i.index).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_mark_completed_twice_fails() {
        let mut item = PlanItem::new(0, "a");
        item.mark_completed("first").unwrap();
        assert_eq!(
            item.mark_completed("second"),
            Err(PlanError::AlreadyCompleted { index: 0 })
        );
        assert_eq!(item.summary.as_deref(), Some("first"));
    }

    #[test]
    fn test_create_task_indices_increase() {
        let mut plan = TaskPlan::new();
        assert_eq!(plan.create_task("one").task_index, 0);
        assert_eq!(plan.create_task("two").task_index, 1);
        assert_eq!(plan.active_task_index, Some(1));
        let task = plan.task(0).unwrap();
        assert_eq!(task.plan_revisions.len(), 1);
        assert!(task.active_items().is_empty());
        plan.validate().unwrap();
    }

    #[test]
    fn test_propose_revision_is_append_only() {
        let mut task = Task::new(0, "req");
        let first = task.propose_revision(&items(&["a", "b"]), RevisionSource::Planner).unwrap();
        task.accept_revision(first).unwrap();
        let before = task.plan_revisions.clone();

        let second = task.propose_revision(&items(&["x"]), RevisionSource::Planner).unwrap();
        assert_eq!(second, 2);
        assert_eq!(&task.plan_revisions[..2], &before[..]);
        assert_eq!(task.plan_revisions[2].plans, vec![PlanItem::new(0, "x")]);
        assert_eq!(task.active_revision_index, first);
    }

    #[test]
    fn test_accept_revision_out_of_range() {
        let mut task = Task::new(0, "req");
        assert_eq!(
            task.accept_revision(5),
            Err(PlanError::InvalidRevision { index: 5, len: 1 })
        );
        assert_eq!(task.active_revision_index, 0);
    }

    #[test]
    fn test_revise_rejects_editing_completed_item() {
        let mut task = Task::new(0, "req");
        let r = task.propose_revision(&items(&["a", "b"]), RevisionSource::Planner).unwrap();
        task.accept_revision(r).unwrap();
        task.complete_item(0, "did a").unwrap();

        let mut edited = task.active_items().to_vec();
        edited[0].plan = "a, but different".to_string();
        let revisions = task.plan_revisions.len();
        assert_eq!(
            task.revise(edited, RevisionSource::Human),
            Err(PlanError::CompletedItemModified { index: 0 })
        );
        assert_eq!(task.plan_revisions.len(), revisions);
    }

    #[test]
    fn test_revise_rejects_removing_completed_item() {
        let mut task = Task::new(0, "req");
        let r = task.propose_revision(&items(&["a", "b"]), RevisionSource::Planner).unwrap();
        task.accept_revision(r).unwrap();
        task.complete_item(0, "did a").unwrap();

        let only_remaining = vec![PlanItem::new(1, "b")];
        assert_eq!(
            task.revise(only_remaining, RevisionSource::Human),
            Err(PlanError::CompletedItemModified { index: 0 })
        );
        assert!(matches!(
            task.propose_revision(&items(&["z"]), RevisionSource::Planner),
            Err(PlanError::CompletedItemModified { index: 0 })
        ));
    }

    #[test]
    fn test_revise_rejects_duplicates_and_new_completed() {
        let mut task = Task::new(0, "req");
        let dup = vec![PlanItem::new(0, "a"), PlanItem::new(0, "b")];
        assert_eq!(
            task.revise(dup, RevisionSource::Human),
            Err(PlanError::DuplicateIndex { index: 0 })
        );
        let mut sneaky = PlanItem::new(0, "a");
        sneaky.completed = true;
        assert_eq!(
            task.revise(vec![sneaky], RevisionSource::Human),
            Err(PlanError::CompletedItemModified { index: 0 })
        );
    }

    #[test]
    fn test_revise_remaining_keeps_completed_work() {
        let mut task = Task::new(0, "req");
        let r = task
            .propose_revision(&items(&["a", "b", "c"]), RevisionSource::Planner)
            .unwrap();
        task.accept_revision(r).unwrap();
        task.complete_item(0, "did a").unwrap();

        let r2 = task
            .revise_remaining(&items(&["fix tests"]), RevisionSource::Reviewer)
            .unwrap();
        task.accept_revision(r2).unwrap();
        let plans = task.active_items();
        assert_eq!(plans.len(), 2);
        assert!(plans[0].completed);
        assert_eq!(plans[0].summary.as_deref(), Some("did a"));
        assert_eq!(plans[1], PlanItem::new(1, "fix tests"));
        // 未完成的 b、c 被替换，只留在旧修订里
        assert!(plans.iter().all(|i| i.plan != "b" && i.plan != "c"));
        assert_eq!(task.plan_revisions[r].plans.len(), 3);
    }

    #[test]
    fn test_complete_item_unknown_index() {
        let mut task = Task::new(0, "req");
        assert_eq!(
            task.complete_item(4, "x"),
            Err(PlanError::ItemNotFound { index: 4 })
        );
    }
}
