//! JSON file storage implementation.
//!
//! Stores one `<task_id>.json` snapshot per task under `<root>/tasks`.
//! Snapshots are written to a temporary file first and renamed into place so
//! a reader never sees a half-written task.

use std::path::{Path, PathBuf};
use taskpilot_core::{Task, TaskFilter, TaskId};
use super::{Result, StorageError, TaskStore};
use tokio::fs;
use tracing::warn;

/// File-based JSON task store.
#[derive(Debug, Clone)]
pub struct JsonTaskStore {
    root: PathBuf,
}

impl JsonTaskStore {
    /// Create storage, creating `<root>/tasks` if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("tasks")).await?;
        Ok(Self { root })
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, id: &TaskId) -> PathBuf {
        self.root.join("tasks").join(format!("{}.json", file_stem(id)))
    }
}

/// Task ids come from plans. ASCII alphanumerics and `-` pass through; every
/// other byte, `_` included, becomes `_XX` so distinct ids never share a file.
fn file_stem(id: &TaskId) -> String {
    let mut stem = String::with_capacity(id.as_str().len());
    for b in id.as_str().bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("_{:02X}", b));
        }
    }
    stem
}

#[async_trait::async_trait]
impl TaskStore for JsonTaskStore {
    async fn save(&self, task: &Task) -> Result<()> {
        let path = self.task_path(&task.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(task)?;
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>> {
        let path = self.task_path(id);
        let task: Option<Task> = read_json(&path).await?;
        match task {
            Some(task) if task.id != *id => {
                warn!(path = %path.display(), task_id = %id, found = %task.id, "Snapshot belongs to another task");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = list_dir(&self.root.join("tasks"))
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(tasks)
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        match fs::remove_file(self.task_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Skipping unreadable task snapshot"),
        }
    }
    Ok(items)
}
