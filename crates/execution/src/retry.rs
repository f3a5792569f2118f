//! Retry and replanning - what happens to a step after a failed attempt.
//!
//! Retries are local to the step and bounded by `max_retries`. Once they run
//! out, a task with `auto_replan` may swap the step's tool for the best
//! remaining alternative and start its retry budget over, bounded by
//! `max_replans` per task. Everything else is a terminal step failure.

use std::sync::Arc;
use serde_json::json;
use taskpilot_core::{EventType, StepId, Task, ToolId};
use taskpilot_tools::{SelectionStrategy, ToolError, ToolRegistry};
use tracing::{info, warn};
use crate::emitter::ProgressEmitter;

/// What the controller did with a failed step.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDecision {
    /// Step is PENDING again with `retry_count` bumped
    Retry {
        /// Retries used so far
        retry_count: u32,
    },
    /// Retries were exhausted and the step was reassigned
    Replanned {
        /// Tools the step will use from now on
        tools: Vec<ToolId>,
    },
    /// Step is FAILED for good
    Failed,
}

/// Applies the retry/replan state machine.
#[derive(Clone)]
pub struct RetryController {
    registry: Arc<ToolRegistry>,
}

impl RetryController {
    /// Create a controller that reselects tools from `registry`.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Decide the fate of `step_id` after `error`.
    pub fn on_failure(
        &self,
        task: &mut Task,
        step_id: &StepId,
        error: &ToolError,
        emitter: &ProgressEmitter,
    ) -> FailureDecision {
        let Some(idx) = task.step_index(step_id) else {
            warn!(task_id = %task.id, step_id = %step_id, "Failure reported for unknown step");
            return FailureDecision::Failed;
        };

        let step = &mut task.steps[idx];
        if step.retry_count < step.max_retries {
            step.retry_count += 1;
            step.reset_to_pending();
            let retry_count = step.retry_count;
            let detail = json!({
                "retry_count": retry_count,
                "max_retries": step.max_retries,
                "error": error.to_string(),
            });
            info!(task_id = %task.id, step_id = %step_id, retry_count, error = %error, "Retrying step");
            task.touch();

            let task: &Task = task;
            emitter.step(EventType::StepRetry, task, &task.steps[idx], Some(detail));
            return FailureDecision::Retry { retry_count };
        }

        if task.can_replan() {
            return self.replan(task, idx, error, emitter);
        }

        step_failed(task, idx, error, emitter);
        FailureDecision::Failed
    }

    /// Reset the step at `idx`, reassign its tool and bump the replan count.
    fn replan(
        &self,
        task: &mut Task,
        idx: usize,
        error: &ToolError,
        emitter: &ProgressEmitter,
    ) -> FailureDecision {
        let step = &mut task.steps[idx];

        // Tools tried on the last attempt
        let failed: Vec<ToolId> = step
            .executions
            .iter()
            .filter(|r| r.attempt == step.attempts && !r.success)
            .map(|r| r.tool_id.clone())
            .collect();

        if !step.required_capabilities.is_empty() {
            let caps = &step.required_capabilities;
            let pick = self
                .registry
                .select_best_excluding(caps, SelectionStrategy::BestFit, &failed)
                .or_else(|| self.registry.select_best(caps, SelectionStrategy::BestFit));
            if let Some(tool) = pick {
                step.required_tools = vec![tool.id];
            }
        }

        step.reset_to_pending();
        step.error_message = None;
        step.retry_count = 0;
        let tools = step.required_tools.clone();
        let step_id = step.id.clone();

        task.rebuild_graph();
        task.replan_count += 1;
        task.touch();

        info!(
            task_id = %task.id,
            step_id = %step_id,
            replan = task.replan_count,
            max_replans = task.max_replans,
            tools = ?tools,
            "Replanned step"
        );
        let detail = json!({
            "step_id": step_id,
            "tools": tools,
            "replan_count": task.replan_count,
            "error": error.to_string(),
        });
        emitter.task(EventType::TaskReplanned, task, Some(detail));
        FailureDecision::Replanned { tools }
    }
}

fn step_failed(task: &mut Task, idx: usize, error: &ToolError, emitter: &ProgressEmitter) {
    let step = &mut task.steps[idx];
    step.fail(error.to_string());
    warn!(
        task_id = %task.id,
        step_id = %step.id,
        retries = step.retry_count,
        error = %error,
        "Step failed"
    );
    let detail = json!({
        "error": error.to_string(),
        "retry_count": step.retry_count,
    });
    task.touch();

    let task: &Task = task;
    emitter.step(EventType::StepFailed, task, &task.steps[idx], Some(detail));
}
