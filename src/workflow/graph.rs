//! 阶段图
//!
//! 每个工作流是一张有向图：唯一入口阶段，阶段 -> 边（固定下一阶段 / 条件路由函数 / 终止）。
//! 路由函数是当前状态的纯函数，图本身是数据，构建时校验入口和固定目标均已注册。

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::core::HiveError;

/// 路由结果：下一阶段或终止
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next<S> {
    Stage(S),
    End,
}

/// 条件路由函数
pub type Router<S, St> = fn(&St) -> Next<S>;

enum Edge<S, St> {
    Fixed(Next<S>),
    Conditional(Router<S, St>),
}

/// 已校验的阶段图
pub struct StageGraph<S, St> {
    entry: S,
    edges: HashMap<S, Edge<S, St>>,
}

impl<S, St> StageGraph<S, St>
where
    S: Copy + Eq + Hash + Debug,
{
    pub fn builder(entry: S) -> StageGraphBuilder<S, St> {
        StageGraphBuilder {
            entry,
            edges: HashMap::new(),
        }
    }

    pub fn entry(&self) -> S {
        self.entry
    }

    pub fn contains(&self, stage: S) -> bool {
        self.edges.contains_key(&stage)
    }

    /// 计算 from 之后的下一阶段
    pub fn route(&self, from: S, state: &St) -> Result<Next<S>, HiveError> {
        let next = match self.edges.get(&from) {
            Some(Edge::Fixed(next)) => *next,
            Some(Edge::Conditional(router)) => router(state),
            None => return Err(HiveError::UnregisteredStage(format!("{:?}", from))),
        };
        if let Next::Stage(s) = next {
            if !self.contains(s) {
                return Err(HiveError::UnregisteredStage(format!("{:?}", s)));
            }
        }
        Ok(next)
    }
}

/// 阶段图构建器
pub struct StageGraphBuilder<S, St> {
    entry: S,
    edges: HashMap<S, Edge<S, St>>,
}

impl<S, St> StageGraphBuilder<S, St>
where
    S: Copy + Eq + Hash + Debug,
{
    /// 固定边：from 完成后总是进入 to
    pub fn edge(mut self, from: S, to: S) -> Self {
        self.edges.insert(from, Edge::Fixed(Next::Stage(to)));
        self
    }

    /// 终止边：from 完成后运行结束
    pub fn end(mut self, from: S) -> Self {
        self.edges.insert(from, Edge::Fixed(Next::End));
        self
    }

    /// 条件边：由 router(state) 决定
    pub fn conditional(mut self, from: S, router: Router<S, St>) -> Self {
        self.edges.insert(from, Edge::Conditional(router));
        self
    }

    pub fn build(self) -> Result<StageGraph<S, St>, HiveError> {
        if !self.edges.contains_key(&self.entry) {
            return Err(HiveError::UnregisteredStage(format!("{:?}", self.entry)));
        }
        for edge in self.edges.values() {
            if let Edge::Fixed(Next::Stage(to)) = edge {
                if !self.edges.contains_key(to) {
                    return Err(HiveError::UnregisteredStage(format!("{:?}", to)));
                }
            }
        }
        Ok(StageGraph {
            entry: self.entry,
            edges: self.edges,
        })
    }
}
