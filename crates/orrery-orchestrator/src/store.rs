use crate::types::Task;
use async_trait::async_trait;
use orrery_core::{OrreryError, OrreryResult};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Durable home for terminal tasks, consulted when a status query misses
/// the in-memory tracker.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save(&self, task: &Task) -> OrreryResult<()>;
    async fn load(&self, task_id: &str) -> OrreryResult<Option<Task>>;
    async fn delete(&self, task_id: &str) -> OrreryResult<()>;
    async fn list(&self) -> OrreryResult<Vec<String>>;
}

/// File-based task store: one pretty-printed JSON file per task.
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub async fn new(dir: impl Into<PathBuf>) -> OrreryResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn save(&self, task: &Task) -> OrreryResult<()> {
        let json = serde_json::to_string_pretty(task)?;
        tokio::fs::write(self.task_path(&task.id), json).await?;
        Ok(())
    }

    async fn load(&self, task_id: &str) -> OrreryResult<Option<Task>> {
        let path = self.task_path(task_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let task: Task = serde_json::from_str(&data)
            .map_err(|e| OrreryError::Store(format!("Failed to parse task {task_id}: {e}")))?;
        Ok(Some(task))
    }

    async fn delete(&self, task_id: &str) -> OrreryResult<()> {
        let path = self.task_path(task_id);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> OrreryResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-process store, mostly for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &Task) -> OrreryResult<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, task_id: &str) -> OrreryResult<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn delete(&self, task_id: &str) -> OrreryResult<()> {
        self.tasks.write().await.remove(task_id);
        Ok(())
    }

    async fn list(&self) -> OrreryResult<Vec<String>> {
        let mut ids: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
