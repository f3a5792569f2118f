//! Progress events - what subscribers see of a running task.

use crate::id::{EventId, StepId, TaskId};
use crate::step::Step;
use crate::task::Task;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A step attempt began
    StepStarted,
    /// A failed step was queued for another attempt
    StepRetry,
    /// A step finished successfully
    StepCompleted,
    /// A step failed terminally
    StepFailed,
    /// A failed step was given a new tool assignment
    TaskReplanned,
    /// Every step completed
    TaskCompleted,
    /// The task ended without completing every step
    TaskFailed,
}

impl EventType {
    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepStarted => "step_started",
            Self::StepRetry => "step_retry",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::TaskReplanned => "task_replanned",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// An event is an atomic state change announced at a specific time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: EventId,

    /// What happened
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Task the event belongs to
    pub task_id: TaskId,

    /// Step the event belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,

    /// Status of the step (or task) after the transition
    pub status: String,

    /// When it happened
    pub timestamp: Time,

    /// Extra payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl Event {
    /// Event about the task as a whole.
    pub fn for_task(event_type: EventType, task: &Task, detail: Option<serde_json::Value>) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            task_id: task.id.clone(),
            step_id: None,
            status: task.status.as_str().to_string(),
            timestamp: chrono::Utc::now(),
            detail,
        }
    }

    /// Event about one step of a task.
    pub fn for_step(
        event_type: EventType,
        task_id: &TaskId,
        step: &Step,
        detail: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            task_id: task_id.clone(),
            step_id: Some(step.id.clone()),
            status: step.status.as_str().to_string(),
            timestamp: chrono::Utc::now(),
            detail,
        }
    }
}
