//! The execution engine - drives one task from PENDING to a terminal status.
//!
//! Runs the driver loop:
//! ```text
//! Schedule runnable steps → Run parallel batch → Run sequential steps → Settle failures
//! ```
//! The loop owns the task. Workers only see [`StepJob`](crate::StepJob)
//! snapshots, and the store and subscribers only see copies.

use std::collections::HashMap;
use std::sync::Arc;
use serde_json::json;
use taskpilot_core::{EventType, Plan, PlanError, StepId, StepStatus, Task, TaskStatus};
use taskpilot_storage::TaskStore;
use taskpilot_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::config::EngineConfig;
use crate::emitter::{EventChannel, ProgressEmitter, TracingTelemetrySink};
use crate::executor::{ExecutionOutcome, StepExecutor, StepRun};
use crate::parallel::ParallelExecutionManager;
use crate::retry::RetryController;
use crate::scheduler::Scheduler;

/// How a driver run ended.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Final task snapshot
    pub task: Task,
    /// Whether the run stopped because of cancellation
    pub cancelled: bool,
    /// Driver loop iterations used
    pub iterations: usize,
}

impl RunSummary {
    /// Final task status.
    pub fn status(&self) -> TaskStatus {
        self.task.status
    }
}

/// Why the driver loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Drained,
    Cancelled,
    IterationLimit,
}

/// The execution engine.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn TaskStore>,
    scheduler: Scheduler,
    executor: StepExecutor,
    retry: RetryController,
    parallel: ParallelExecutionManager,
    emitter: ProgressEmitter,
    config: EngineConfig,
}

impl ExecutionEngine {
    /// Create an engine. Events go to a fresh channel and to the log.
    pub fn new(registry: Arc<ToolRegistry>, store: Arc<dyn TaskStore>, config: EngineConfig) -> Self {
        let emitter = ProgressEmitter::new(EventChannel::new(config.event_capacity))
            .with_sink(Arc::new(TracingTelemetrySink));
        Self {
            scheduler: Scheduler::new(),
            executor: StepExecutor::new(registry.clone(), config.clone()),
            retry: RetryController::new(registry.clone()),
            parallel: ParallelExecutionManager::new(config.max_parallel),
            registry,
            store,
            emitter,
            config,
        }
    }

    /// Replace the progress emitter.
    pub fn with_emitter(mut self, emitter: ProgressEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Task store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Progress emitter.
    pub fn emitter(&self) -> &ProgressEmitter {
        &self.emitter
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to progress events of every task this engine runs.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<taskpilot_core::Event> {
        self.emitter.subscribe()
    }

    /// Turn a plan into a pending task with its duration estimated.
    pub fn prepare(&self, plan: Plan) -> Result<Task, PlanError> {
        let mut task = plan.into_task(self.config.plan_defaults())?;
        for warning in &task.dependency_graph.warnings {
            warn!(task_id = %task.id, "{}", warning);
        }
        task.estimated_duration_ms = estimate_duration_ms(&task, &self.registry, &self.config);
        info!(
            task_id = %task.id,
            steps = task.steps.len(),
            estimated_ms = task.estimated_duration_ms,
            "Prepared task"
        );
        Ok(task)
    }

    /// Drive `task` until no step can run, or until `cancel` fires.
    ///
    /// Steps left ACTIVE by an earlier, interrupted run are put back to
    /// PENDING before the loop starts.
    pub async fn run(&self, mut task: Task, cancel: CancellationToken) -> RunSummary {
        for step in task.steps.iter_mut().filter(|s| s.status == StepStatus::Active) {
            debug!(task_id = %task.id, step_id = %step.id, "Resuming interrupted step");
            step.reset_to_pending();
        }
        task.rebuild_graph();
        for warning in &task.dependency_graph.warnings {
            warn!(task_id = %task.id, "{}", warning);
        }

        info!(task_id = %task.id, title = %task.title, "Executing task");
        task.status = TaskStatus::Executing;
        task.touch();
        self.persist(&task).await;

        let mut iterations = 0;
        let stop = loop {
            if cancel.is_cancelled() {
                break Stop::Cancelled;
            }
            if iterations >= self.config.max_iterations {
                break Stop::IterationLimit;
            }
            iterations += 1;

            let runnable = self.scheduler.next_runnable(&task);
            if runnable.is_empty() {
                break Stop::Drained;
            }
            let (parallel, sequential) = self.scheduler.partition(&runnable);
            debug!(
                task_id = %task.id,
                iteration = iterations,
                parallel = parallel.len(),
                sequential = sequential.len(),
                "Runnable steps"
            );

            for batch in self.parallel.batches(&parallel) {
                if cancel.is_cancelled() {
                    break;
                }
                let jobs: Vec<_> = batch
                    .iter()
                    .filter_map(|id| self.executor.begin(&mut task, id, &self.emitter))
                    .collect();
                self.persist(&task).await;

                for run in self.parallel.run_batch(&self.executor, jobs, &cancel).await {
                    self.settle(&mut task, run).await;
                }
            }

            for id in &sequential {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(job) = self.executor.begin(&mut task, id, &self.emitter) else {
                    continue;
                };
                self.persist(&task).await;

                let run = self.executor.run(job, cancel.clone()).await;
                self.settle(&mut task, run).await;
            }
        };

        self.conclude(&mut task, stop).await;
        RunSummary {
            task,
            cancelled: stop == Stop::Cancelled,
            iterations,
        }
    }

    /// Fold a finished run into the task and hand failures to the controller.
    async fn settle(&self, task: &mut Task, run: StepRun) {
        let step_id = run.step_id.clone();
        if let ExecutionOutcome::Failed(e) = self.executor.finish(task, run, &self.emitter) {
            self.retry.on_failure(task, &step_id, &e, &self.emitter);
        }
        self.persist(task).await;
    }

    /// Set the terminal task status and announce it.
    async fn conclude(&self, task: &mut Task, stop: Stop) {
        if stop == Stop::Drained && task.all_completed() {
            task.status = TaskStatus::Completed;
            task.touch();
            info!(task_id = %task.id, steps = task.steps.len(), "Task completed");
            self.emitter
                .task(EventType::TaskCompleted, task, Some(json!({ "progress": task.progress() })));
            self.persist(task).await;
            return;
        }

        task.status = if task.any_completed() {
            TaskStatus::PartiallyCompleted
        } else {
            TaskStatus::Failed
        };
        task.touch();

        let failed: Vec<&StepId> = task
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| &s.id)
            .collect();
        let stranded: Vec<&StepId> = self.scheduler.stranded(task).into_iter().map(|s| &s.id).collect();
        let reason = match stop {
            Stop::Cancelled => "cancelled",
            Stop::IterationLimit => "iteration_limit",
            Stop::Drained if !failed.is_empty() => "steps_failed",
            Stop::Drained => "blocked",
        };

        warn!(
            task_id = %task.id,
            status = %task.status,
            reason,
            failed = ?failed,
            stranded = ?stranded,
            "Task did not complete"
        );
        let detail = json!({
            "reason": reason,
            "failed_steps": failed,
            "blocked_steps": stranded,
            "progress": task.progress(),
        });
        self.emitter.task(EventType::TaskFailed, task, Some(detail));
        self.persist(task).await;
    }

    /// Save a snapshot. Store failures are logged, never fatal.
    async fn persist(&self, task: &Task) {
        if let Err(e) = self.store.save(task).await {
            error!(task_id = %task.id, error = %e, "Failed to save task snapshot");
        }
    }
}

/// Estimated wall-clock duration of `task`: the heaviest dependency chain of
/// per-step tool time estimates, or the plain sum when the graph is cyclic.
pub fn estimate_duration_ms(task: &Task, registry: &ToolRegistry, config: &EngineConfig) -> u64 {
    let weights: HashMap<&StepId, u64> = task
        .steps
        .iter()
        .map(|step| {
            let weight = if step.required_tools.is_empty() {
                registry
                    .select_best(&step.required_capabilities, config.selection_strategy)
                    .map_or(0, |tool| tool.time_estimate_ms)
            } else {
                step.required_tools
                    .iter()
                    .filter_map(|id| registry.descriptor(id))
                    .fold(0u64, |total, tool| total.saturating_add(tool.time_estimate_ms))
            };
            (&step.id, weight)
        })
        .collect();

    let weight = |id: &StepId| weights.get(id).copied().unwrap_or(0);
    task.dependency_graph
        .critical_path(weight)
        .unwrap_or_else(|| {
            task.steps
                .iter()
                .fold(0u64, |total, s| total.saturating_add(weight(&s.id)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskpilot_core::Step;
    use taskpilot_storage::InMemoryTaskStore;
    use taskpilot_tools::{Tool, ToolDescriptor, ToolError, ToolInput};

    struct Timed(ToolDescriptor);

    #[async_trait]
    impl Tool for Timed {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn invoke(&self, _input: ToolInput) -> Result<serde_json::Value, ToolError> {
            Ok(json!("ok"))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        for (id, cap, ms) in [("search", "search", 100), ("llm", "analysis", 500), ("fs", "file_io", 10)] {
            registry.register(Arc::new(Timed(
                ToolDescriptor::new(id, id).with_capability(cap).with_time_ms(ms),
            )));
        }
        Arc::new(registry)
    }

    #[test]
    fn test_estimate_follows_critical_path() {
        let task = Task::new("t1", "Diamond")
            .with_step(Step::new("a", "A").with_capability("search"))
            .with_step(Step::new("b", "B").depends_on("a").with_capability("analysis"))
            .with_step(Step::new("c", "C").depends_on("a").with_tool("fs"))
            .with_step(Step::new("d", "D").depends_on("b").depends_on("c").with_tool("fs"));

        // a -> b -> d
        assert_eq!(estimate_duration_ms(&task, &registry(), &EngineConfig::default()), 610);
    }

    #[test]
    fn test_estimate_sums_cyclic_tasks() {
        let task = Task::new("t1", "Cycle")
            .with_step(Step::new("a", "A").depends_on("b").with_tool("search"))
            .with_step(Step::new("b", "B").depends_on("a").with_tool("llm"));
        assert_eq!(estimate_duration_ms(&task, &registry(), &EngineConfig::default()), 600);
    }

    #[test]
    fn test_estimate_saturates_huge_tool_times() {
        let registry = ToolRegistry::new();
        for id in ["slow", "slower"] {
            registry.register(Arc::new(Timed(ToolDescriptor::new(id, id).with_time_ms(u64::MAX - 1))));
        }
        let config = EngineConfig::default();

        let chain = Task::new("t1", "Chain")
            .with_step(Step::new("a", "A").with_tool("slow").with_tool("slower"))
            .with_step(Step::new("b", "B").depends_on("a").with_tool("slow"));
        assert_eq!(estimate_duration_ms(&chain, &registry, &config), u64::MAX);

        let cycle = Task::new("t2", "Cycle")
            .with_step(Step::new("a", "A").depends_on("b").with_tool("slow"))
            .with_step(Step::new("b", "B").depends_on("a").with_tool("slower"));
        assert_eq!(estimate_duration_ms(&cycle, &registry, &config), u64::MAX);
    }

    #[test]
    fn test_prepare_fills_estimate() {
        let engine = ExecutionEngine::new(
            registry(),
            Arc::new(InMemoryTaskStore::new()),
            EngineConfig::default(),
        );
        let task = engine.prepare(Plan::fallback("rust")).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.estimated_duration_ms, 610);
    }

    #[tokio::test]
    async fn test_run_saves_terminal_snapshot() {
        let store = Arc::new(InMemoryTaskStore::new());
        let engine = ExecutionEngine::new(registry(), store.clone(), EngineConfig::default());
        let task = engine.prepare(Plan::fallback("rust")).unwrap();
        let id = task.id.clone();

        let summary = engine.run(task, CancellationToken::new()).await;

        assert_eq!(summary.status(), TaskStatus::Completed);
        assert!(!summary.cancelled);
        let saved = store.load(&id).await.unwrap().unwrap();
        assert_eq!(saved.status, TaskStatus::Completed);
        assert!(saved.steps.iter().all(|s| s.result.is_some()));
    }
}
