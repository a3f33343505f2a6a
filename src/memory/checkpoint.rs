//! 工作流检查点持久化
//!
//! 每次阶段切换、挂起与终止时写入一份完整检查点（当前阶段、完整状态含 TaskPlan 与消息日志、
//! 待处理的中断信封），进程重启后可按 run_id 恢复。存储格式与介质由实现决定：
//! InMemoryCheckpointStore（测试 / 单进程）与 FileCheckpointStore（每个运行一个 JSON 文件）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::HiveError;
use crate::workflow::{InterruptEnvelope, RunStatus};

/// 检查点：stage / state 以 JSON 形式保存，使存储层与具体工作流类型无关
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub workflow: String,
    pub stage: serde_json::Value,
    pub state: serde_json::Value,
    pub status: RunStatus,
    /// 已执行的阶段切换次数
    pub transitions: usize,
    /// 正在以人工响应重新执行的挂起信封；运行在该阶段中断（崩溃）时用于重新挂起
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<InterruptEnvelope>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), HiveError>;

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, HiveError>;

    async fn delete(&self, run_id: &str) -> Result<(), HiveError>;

    /// 列出全部 run_id（按字典序）
    async fn list(&self) -> Result<Vec<String>, HiveError>;
}

/// 内存检查点存储
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), HiveError> {
        self.inner
            .write()
            .await
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, HiveError> {
        Ok(self.inner.read().await.get(run_id).cloned())
    }

    async fn delete(&self, run_id: &str) -> Result<(), HiveError> {
        self.inner.write().await.remove(run_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, HiveError> {
        let mut ids: Vec<String> = self.inner.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// 文件检查点存储：dir/{run_id}.json，先写临时文件再 rename，避免半写文件
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, HiveError> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(HiveError::Checkpoint(format!("invalid run id: {run_id}")));
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

fn io_err(e: std::io::Error) -> HiveError {
    HiveError::Checkpoint(e.to_string())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), HiveError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let path = self.path_for(&checkpoint.run_id)?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, HiveError> {
        let path = self.path_for(run_id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn delete(&self, run_id: &str) -> Result<(), HiveError> {
        let path = self.path_for(run_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, HiveError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(io_err(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
