//! Step execution - resolve tools for a step, invoke them, record outcomes.
//!
//! Execution is split in three so the driver keeps sole ownership of the
//! task: [`StepExecutor::begin`] activates the step and snapshots what the
//! worker needs, [`StepExecutor::run`] only talks to tools, and
//! [`StepExecutor::finish`] folds the worker's records back into the task.

use crate::config::EngineConfig;
use crate::emitter::ProgressEmitter;
use std::sync::Arc;
use taskpilot_core::{EventType, Step, StepId, Task, TaskId, ToolExecutionRecord, ToolId};
use taskpilot_tools::{InvocationContext, ToolError, ToolInput, ToolParams, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a worker needs to run one step attempt.
#[derive(Debug, Clone)]
pub struct StepJob {
    /// Owning task
    pub task_id: TaskId,
    /// Step being run
    pub step_id: StepId,
    /// Attempt number, 1-based
    pub attempt: u32,
    /// Tools to invoke in order, or why none could be resolved
    pub tools: Result<Vec<ToolId>, ToolError>,
    /// Step parameters
    pub params: ToolParams,
}

/// What a worker brings back.
#[derive(Debug, Clone)]
pub struct StepRun {
    /// Step that ran
    pub step_id: StepId,
    /// One record per invocation
    pub records: Vec<ToolExecutionRecord>,
    /// Aggregated `{tool_id: result}` or the first failure
    pub result: Result<serde_json::Value, ToolError>,
    /// Whether the task was cancelled while the step ran
    pub cancelled: bool,
}

/// Outcome of one step attempt after it was folded into the task.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The step is COMPLETED
    Completed,
    /// The attempt failed; the step is still ACTIVE awaiting a retry decision
    Failed(ToolError),
    /// Cancellation interrupted the attempt; the step is PENDING again
    Interrupted,
}

/// Runs single steps against the tool registry.
#[derive(Clone)]
pub struct StepExecutor {
    registry: Arc<ToolRegistry>,
    config: EngineConfig,
}

impl StepExecutor {
    /// Create an executor.
    pub fn new(registry: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// The registry tools are resolved from.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Tools a step will invoke: its explicit list, otherwise the registry's
    /// pick for its capabilities.
    pub fn resolve_tools(&self, step: &Step) -> Result<Vec<ToolId>, ToolError> {
        if !step.required_tools.is_empty() {
            return Ok(step.required_tools.clone());
        }
        self.registry
            .select_best(&step.required_capabilities, self.config.selection_strategy)
            .map(|tool| vec![tool.id])
            .ok_or_else(|| ToolError::NoToolAvailable(step.required_capabilities.clone()))
    }

    /// Activate a PENDING step, emit `step_started` and snapshot a job.
    ///
    /// Returns `None` if the step does not exist.
    pub fn begin(&self, task: &mut Task, step_id: &StepId, emitter: &ProgressEmitter) -> Option<StepJob> {
        let idx = task.step_index(step_id)?;
        let tools = self.resolve_tools(&task.steps[idx]);

        let step = &mut task.steps[idx];
        step.activate();
        let job = StepJob {
            task_id: task.id.clone(),
            step_id: step.id.clone(),
            attempt: step.attempts,
            tools,
            params: step.parameters.clone(),
        };
        task.touch();

        debug!(task_id = %job.task_id, step_id = %job.step_id, attempt = job.attempt, "Step started");
        let task: &Task = task;
        emitter.step(EventType::StepStarted, task, &task.steps[idx], None);
        Some(job)
    }

    /// Invoke the job's tools in order, stopping at the first failure.
    pub async fn run(&self, job: StepJob, cancel: CancellationToken) -> StepRun {
        let tools = match job.tools {
            Ok(tools) => tools,
            Err(e) => {
                return StepRun {
                    step_id: job.step_id,
                    records: Vec::new(),
                    result: Err(e),
                    cancelled: cancel.is_cancelled(),
                }
            }
        };

        let mut records = Vec::with_capacity(tools.len());
        let mut results = serde_json::Map::new();

        for tool_id in tools {
            let record = ToolExecutionRecord::start(
                tool_id.clone(),
                job.task_id.clone(),
                job.step_id.clone(),
                job.attempt,
            );
            let context = InvocationContext {
                task_id: job.task_id.clone(),
                step_id: job.step_id.clone(),
                attempt: job.attempt,
                cancellation: cancel.clone(),
            };

            match self.invoke(&tool_id, job.params.clone(), context).await {
                Ok(value) => {
                    records.push(record.succeed(value.clone()));
                    results.insert(tool_id.to_string(), value);
                }
                Err(e) => {
                    debug!(step_id = %job.step_id, tool_id = %tool_id, error = %e, "Tool invocation failed");
                    records.push(record.fail(e.to_string()));
                    return StepRun {
                        step_id: job.step_id,
                        records,
                        result: Err(e),
                        cancelled: cancel.is_cancelled(),
                    };
                }
            }
        }

        StepRun {
            step_id: job.step_id,
            records,
            result: Ok(serde_json::Value::Object(results)),
            cancelled: cancel.is_cancelled(),
        }
    }

    async fn invoke(
        &self,
        tool_id: &ToolId,
        params: ToolParams,
        context: InvocationContext,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .registry
            .get(tool_id)
            .ok_or_else(|| ToolError::UnknownTool(tool_id.clone()))?;

        tool.schema().validate(&params).map_err(|reason| ToolError::InvalidParams {
            tool: tool_id.clone(),
            reason,
        })?;

        let timeout = self.config.tool_timeout(tool.descriptor().time_estimate_ms);
        let cancel = context.cancellation.clone();
        let input = ToolInput { params, context };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled(tool_id.clone())),
            outcome = tokio::time::timeout(timeout, tool.invoke(input)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout { tool: tool_id.clone(), after: timeout }),
            },
        }
    }

    /// Fold a worker's run into the task.
    ///
    /// On success the step is COMPLETED and `step_completed` is emitted with
    /// the aggregated result. On failure the step stays ACTIVE with the error
    /// recorded; the retry controller decides what happens next.
    pub fn finish(&self, task: &mut Task, run: StepRun, emitter: &ProgressEmitter) -> ExecutionOutcome {
        let Some(idx) = task.step_index(&run.step_id) else {
            warn!(task_id = %task.id, step_id = %run.step_id, "Run for unknown step discarded");
            return ExecutionOutcome::Interrupted;
        };

        let step = &mut task.steps[idx];
        step.executions.extend(run.records);

        let outcome = match run.result {
            Ok(result) => {
                step.complete(result.clone());
                info!(task_id = %task.id, step_id = %step.id, "Step completed");
                ExecutionOutcome::Completed
            }
            Err(_) if run.cancelled => {
                step.reset_to_pending();
                ExecutionOutcome::Interrupted
            }
            Err(e) => {
                step.error_message = Some(e.to_string());
                ExecutionOutcome::Failed(e)
            }
        };
        task.touch();

        if outcome == ExecutionOutcome::Completed {
            let task: &Task = task;
            let step = &task.steps[idx];
            emitter.step(EventType::StepCompleted, task, step, step.result.clone());
        }
        outcome
    }

    /// Run one step attempt start to finish on the current task.
    pub async fn execute(
        &self,
        task: &mut Task,
        step_id: &StepId,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Option<ExecutionOutcome> {
        let job = self.begin(task, step_id, emitter)?;
        let run = self.run(job, cancel.clone()).await;
        Some(self.finish(task, run, emitter))
    }
}
