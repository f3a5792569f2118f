//! Engine errors.

use taskpilot_core::{PlanError, TaskId};
use taskpilot_storage::StorageError;

/// Errors surfaced by the task manager.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The driver was aborted before it could report
    #[error("Task {0} was cancelled")]
    Cancelled(TaskId),

    /// Unknown task id
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// The task already has a running driver
    #[error("Task {0} is already running")]
    AlreadyRunning(TaskId),

    /// The task has no running driver
    #[error("Task {0} is not running")]
    NotRunning(TaskId),

    /// The driver panicked
    #[error("Driver for task {task} failed: {message}")]
    Worker {
        /// Task whose driver failed
        task: TaskId,
        /// Panic message
        message: String,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The plan could not be turned into a task
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
