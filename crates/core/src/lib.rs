//! TaskPilot core data models.
//!
//! Tasks, steps, execution records, progress events and the dependency
//! graph the execution engine schedules from.

#![warn(missing_docs)]

mod id;

// Task model
mod step;
mod task;
mod record;
mod graph;

// Inputs and outputs
mod plan;
mod event;

pub use id::*;
pub use step::{Step, StepStatus};
pub use task::{Task, TaskStatus, TaskProgress, TaskFilter};
pub use record::ToolExecutionRecord;
pub use graph::{DependencyGraph, GraphWarning};
pub use plan::{Plan, PlanStep, PlanDefaults, PlanError, RawStepId};
pub use event::{Event, EventType};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
