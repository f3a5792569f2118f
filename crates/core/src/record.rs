//! Tool execution record - one entry per tool invocation attempt.

use serde::{Deserialize, Serialize};
use crate::id::{StepId, TaskId, ToolId};
use crate::Time;

/// Log of a single tool invocation made on behalf of a step.
///
/// Records are append-only: a step keeps every attempt, including the ones
/// that were later retried or superseded by a replan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    /// Tool that was invoked
    pub tool_id: ToolId,

    /// Owning task
    pub task_id: TaskId,

    /// Owning step
    pub step_id: StepId,

    /// Step attempt number (1-based) this invocation belongs to
    pub attempt: u32,

    /// When the invocation began
    pub started_at: Time,

    /// When the invocation returned (None while in flight)
    pub completed_at: Option<Time>,

    /// Whether the tool reported success
    pub success: bool,

    /// Tool result on success
    pub result: Option<serde_json::Value>,

    /// Error message on failure
    pub error_message: Option<String>,
}

impl ToolExecutionRecord {
    /// Open a record for an invocation that is about to start.
    pub fn start(tool_id: ToolId, task_id: TaskId, step_id: StepId, attempt: u32) -> Self {
        Self {
            tool_id,
            task_id,
            step_id,
            attempt,
            started_at: chrono::Utc::now(),
            completed_at: None,
            success: false,
            result: None,
            error_message: None,
        }
    }

    /// Close the record with a successful result.
    pub fn succeed(mut self, result: serde_json::Value) -> Self {
        self.completed_at = Some(chrono::Utc::now());
        self.success = true;
        self.result = Some(result);
        self
    }

    /// Close the record with an error.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.completed_at = Some(chrono::Utc::now());
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    /// Wall-clock duration in milliseconds, derived from the timestamps.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds().max(0))
    }
}
