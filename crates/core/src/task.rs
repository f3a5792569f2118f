//! Task model - a goal broken into dependent steps.

use serde::{Deserialize, Serialize};
use crate::graph::{DependencyGraph, GraphWarning};
use crate::id::{StepId, TaskId};
use crate::step::{Step, StepStatus};
use crate::Time;

/// A task is a plan being executed: a set of steps plus the bookkeeping the
/// engine needs for retries and replans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Task title
    pub title: String,

    /// Detailed description
    pub description: String,

    /// Natural-language goal the plan was synthesized from
    pub goal: String,

    /// Steps, in plan order
    pub steps: Vec<Step>,

    /// Current status
    pub status: TaskStatus,

    /// Derived from `steps`; rebuilt after load and after every replan
    #[serde(skip)]
    pub dependency_graph: DependencyGraph,

    /// Whether exhausted steps may be replanned
    pub auto_replan: bool,

    /// Replans performed so far
    pub replan_count: u32,

    /// Replan budget
    pub max_replans: u32,

    /// Estimated wall-clock duration
    pub estimated_duration_ms: u64,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet started
    Pending,
    /// Driver loop is running
    Executing,
    /// Ended with some, but not all, steps completed
    PartiallyCompleted,
    /// Every step completed
    Completed,
    /// Ended with no step completed
    Failed,
}

impl TaskStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::PartiallyCompleted => "PARTIALLY_COMPLETED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the task has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::PartiallyCompleted)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "EXECUTING" => Ok(Self::Executing),
            "PARTIALLY_COMPLETED" => Ok(Self::PartiallyCompleted),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Step counts for a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Steps in COMPLETED
    pub completed: usize,
    /// Steps in FAILED
    pub failed: usize,
    /// Steps in ACTIVE
    pub active: usize,
    /// Steps in PENDING
    pub pending: usize,
    /// Completed share, 0-100
    pub percentage: f32,
}

/// Filter for listing stored tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Keep only these statuses
    pub status: Option<Vec<TaskStatus>>,
}

impl TaskFilter {
    /// Whether `task` passes the filter.
    pub fn matches(&self, task: &Task) -> bool {
        self.status
            .as_ref()
            .map_or(true, |statuses| statuses.contains(&task.status))
    }
}

impl Task {
    /// Create an empty pending task.
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            goal: String::new(),
            steps: Vec::new(),
            status: TaskStatus::Pending,
            dependency_graph: DependencyGraph::default(),
            auto_replan: false,
            replan_count: 0,
            max_replans: 0,
            estimated_duration_ms: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the goal.
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a step and refresh the dependency graph.
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self.rebuild_graph();
        self
    }

    /// Enable automatic replanning with the given budget.
    pub fn with_auto_replan(mut self, max_replans: u32) -> Self {
        self.auto_replan = true;
        self.max_replans = max_replans;
        self
    }

    /// Recompute the cached dependency graph, returning its warnings.
    pub fn rebuild_graph(&mut self) -> &[GraphWarning] {
        self.dependency_graph = DependencyGraph::build(&self.steps);
        &self.dependency_graph.warnings
    }

    /// Position of a step in `steps`.
    pub fn step_index(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    /// Look up a step.
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Look up a step mutably.
    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    /// Whether every step is COMPLETED.
    pub fn all_completed(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    /// Whether at least one step is COMPLETED.
    pub fn any_completed(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Completed)
    }

    /// Whether more replans are allowed.
    pub fn can_replan(&self) -> bool {
        self.auto_replan && self.replan_count < self.max_replans
    }

    /// Count steps by status.
    pub fn progress(&self) -> TaskProgress {
        let mut progress = TaskProgress::default();
        for step in &self.steps {
            match step.status {
                StepStatus::Completed => progress.completed += 1,
                StepStatus::Failed => progress.failed += 1,
                StepStatus::Active => progress.active += 1,
                StepStatus::Pending => progress.pending += 1,
            }
        }
        progress.percentage = if self.steps.is_empty() {
            0.0
        } else {
            (progress.completed as f32 / self.steps.len() as f32) * 100.0
        };
        progress
    }
}
