//! 运行监管：活跃运行登记、取消令牌
//!
//! 每个正在被驱动的运行持有一个 CancellationToken；同一 run_id 同时只允许一个驱动者（RunBusy）。
//! 挂起中的运行不在此登记：它不占用任何锁或计算，只存在于检查点中。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::HiveError;

/// 运行监管器：run_id -> 取消令牌
#[derive(Debug, Clone, Default)]
pub struct RunSupervisor {
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl RunSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个运行为活跃；已活跃时返回 RunBusy
    pub fn acquire(&self, run_id: &str) -> Result<RunGuard, HiveError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| HiveError::Checkpoint("run supervisor lock poisoned".to_string()))?;
        if active.contains_key(run_id) {
            return Err(HiveError::RunBusy(run_id.to_string()));
        }
        let token = CancellationToken::new();
        active.insert(run_id.to_string(), token.clone());
        Ok(RunGuard {
            run_id: run_id.to_string(),
            token,
            active: Arc::clone(&self.active),
        })
    }

    /// 取消活跃运行；返回该运行是否正在被驱动
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.active.lock() {
            Ok(active) => match active.get(run_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.active
            .lock()
            .map(|a| a.contains_key(run_id))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }
}

/// 活跃登记的守卫，drop 时注销
#[derive(Debug)]
pub struct RunGuard {
    run_id: String,
    token: CancellationToken,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.run_id);
        }
    }
}
