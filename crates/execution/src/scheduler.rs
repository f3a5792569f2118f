//! Step scheduling - which steps may run now.
//!
//! Readiness is checked per step against the live statuses of its declared
//! dependencies, never against the cached topological order, so a task whose
//! graph has a cycle still makes progress once a member of the cycle is
//! completed by other means.

use taskpilot_core::{Step, StepId, StepStatus, Task};

/// Readiness of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// All dependencies completed
    Ready,
    /// Waiting on these dependencies
    Blocked(Vec<StepId>),
    /// A dependency failed terminally; the step can never run
    Unreachable(Vec<StepId>),
}

/// Computes runnable steps from task state. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
    /// Create a scheduler.
    pub fn new() -> Self {
        Self
    }

    /// Check whether `step`'s dependencies are satisfied.
    ///
    /// Dependencies naming steps outside the task are ignored, matching the
    /// graph builder which drops them.
    pub fn check(&self, task: &Task, step: &Step) -> Resolution {
        let mut blocked = Vec::new();
        let mut failed = Vec::new();

        for dep in &step.dependencies {
            match task.step(dep).map(|s| s.status) {
                Some(StepStatus::Completed) | None => {}
                Some(StepStatus::Failed) => failed.push(dep.clone()),
                Some(_) => blocked.push(dep.clone()),
            }
        }

        if !failed.is_empty() {
            Resolution::Unreachable(failed)
        } else if !blocked.is_empty() {
            Resolution::Blocked(blocked)
        } else {
            Resolution::Ready
        }
    }

    /// PENDING steps whose dependencies are all COMPLETED, in task order.
    pub fn next_runnable<'a>(&self, task: &'a Task) -> Vec<&'a Step> {
        task.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .filter(|s| self.check(task, s) == Resolution::Ready)
            .collect()
    }

    /// Split runnable steps into the parallel-safe batch and the sequential
    /// remainder, each keeping scheduler order.
    pub fn partition(&self, runnable: &[&Step]) -> (Vec<StepId>, Vec<StepId>) {
        let (parallel, sequential): (Vec<&&Step>, Vec<&&Step>) =
            runnable.iter().partition(|s| s.parallel_safe);
        (
            parallel.into_iter().map(|s| s.id.clone()).collect(),
            sequential.into_iter().map(|s| s.id.clone()).collect(),
        )
    }

    /// PENDING steps that can never run because a dependency failed or
    /// because they are stuck behind a cycle.
    pub fn stranded<'a>(&self, task: &'a Task) -> Vec<&'a Step> {
        task.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .filter(|s| self.check(task, s) != Resolution::Ready)
            .collect()
    }
}
