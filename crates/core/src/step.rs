//! Step model - one unit of work within a task.

use serde::{Deserialize, Serialize};
use crate::id::{StepId, ToolId};
use crate::record::ToolExecutionRecord;
use crate::Time;

/// A step ("phase") of a task: what to do, which tools may do it, and what
/// it waits on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Identifier, unique within the task
    pub id: StepId,

    /// Short title
    pub title: String,

    /// What the step should accomplish
    pub description: String,

    /// Capability tags used to pick a tool when `required_tools` is empty
    pub required_capabilities: Vec<String>,

    /// Tools to invoke, in order
    pub required_tools: Vec<ToolId>,

    /// Steps that must complete first
    pub dependencies: Vec<StepId>,

    /// May run concurrently with other parallel-safe steps
    pub parallel_safe: bool,

    /// Parameters handed to every tool invocation of this step
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,

    /// Current status
    pub status: StepStatus,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Attempts started so far, across retries and replans
    #[serde(default)]
    pub attempts: u32,

    /// Retries allowed before escalation
    pub max_retries: u32,

    /// When the current attempt started
    pub started_at: Option<Time>,

    /// When the step completed
    pub completed_at: Option<Time>,

    /// Last failure message
    pub error_message: Option<String>,

    /// Aggregated tool results, keyed by tool id
    pub result: Option<serde_json::Value>,

    /// Every tool invocation attempt, oldest first
    pub executions: Vec<ToolExecutionRecord>,
}

/// Step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Waiting to be scheduled
    Pending,
    /// Currently executing
    Active,
    /// Finished successfully
    Completed,
    /// Failed terminally
    Failed,
}

impl StepStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Step {
    /// Create a pending step with empty collections.
    pub fn new(id: impl Into<StepId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            required_capabilities: Vec::new(),
            required_tools: Vec::new(),
            dependencies: Vec::new(),
            parallel_safe: false,
            parameters: serde_json::Map::new(),
            status: StepStatus::Pending,
            retry_count: 0,
            attempts: 0,
            max_retries: 0,
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
            executions: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a required capability.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    /// Add a required tool.
    pub fn with_tool(mut self, tool: impl Into<ToolId>) -> Self {
        self.required_tools.push(tool.into());
        self
    }

    /// Add a dependency.
    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    /// Mark as parallel-safe.
    pub fn parallel(mut self) -> Self {
        self.parallel_safe = true;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set a tool parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Whether the step has reached COMPLETED or FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Failed)
    }

    /// Move to ACTIVE, stamp the start time and open a new attempt.
    pub fn activate(&mut self) {
        self.attempts += 1;
        self.status = StepStatus::Active;
        self.started_at = Some(chrono::Utc::now());
        self.completed_at = None;
    }

    /// Move to COMPLETED with the aggregated result.
    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(chrono::Utc::now());
        self.error_message = None;
        self.result = Some(result);
    }

    /// Move to FAILED, keeping the last error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(chrono::Utc::now());
        self.error_message = Some(message.into());
    }

    /// Put the step back in the queue.
    pub fn reset_to_pending(&mut self) {
        self.status = StepStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
    }
}
