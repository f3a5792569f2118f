//! Storage trait abstraction.

use async_trait::async_trait;
use taskpilot_core::{Task, TaskFilter, TaskId};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Snapshot store for tasks.
///
/// The engine saves a full copy of the task after every status change, so
/// `save` is an upsert keyed by task id. Implementations are shared between
/// concurrently running drivers.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Save a task snapshot (create or replace).
    async fn save(&self, task: &Task) -> Result<()>;

    /// Load a task by ID.
    async fn load(&self, id: &TaskId) -> Result<Option<Task>>;

    /// List tasks matching the filter, most recently updated first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Delete a task.
    async fn delete(&self, id: &TaskId) -> Result<()>;

    /// Whether snapshots survive a restart.
    fn is_persistent(&self) -> bool;
}
