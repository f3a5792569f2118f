//! In-memory task store (non-persistent).

use super::{Result, StorageError, TaskStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskpilot_core::{Task, TaskFilter, TaskId};
use tokio::sync::RwLock;

/// Task store backed by a map. Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(tasks)
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpilot_core::{Step, TaskStatus};

    fn task(id: &str) -> Task {
        Task::new(id, "Research").with_step(Step::new("s1", "Search"))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryTaskStore::new();
        store.save(&task("t1")).await.unwrap();

        let loaded = store.load(&"t1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Research");
        assert!(store.load(&"t2".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_snapshot() {
        let store = InMemoryTaskStore::new();
        let mut t = task("t1");
        store.save(&t).await.unwrap();

        t.status = TaskStatus::Executing;
        store.save(&t).await.unwrap();

        assert_eq!(store.len().await, 1);
        let loaded = store.load(&"t1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Executing);
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let store = InMemoryTaskStore::new();
        let mut done = task("done");
        done.status = TaskStatus::Completed;
        store.save(&done).await.unwrap();
        store.save(&task("pending")).await.unwrap();

        let filter = TaskFilter { status: Some(vec![TaskStatus::Completed]) };
        let tasks = store.list(&filter).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.as_str(), "done");
        assert_eq!(store.list(&TaskFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryTaskStore::new();
        store.save(&task("t1")).await.unwrap();
        store.delete(&"t1".into()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(matches!(store.delete(&"t1".into()).await, Err(StorageError::NotFound(_))));
    }
}
