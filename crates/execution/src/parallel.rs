//! Parallel execution - fan a batch of step jobs out to workers and join.

use crate::executor::{StepExecutor, StepJob, StepRun};
use futures::future::join_all;
use taskpilot_core::StepId;
use taskpilot_tools::ToolError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Runs parallel-safe steps on independent workers with barrier semantics.
#[derive(Debug, Clone, Copy)]
pub struct ParallelExecutionManager {
    max_parallel: usize,
}

impl ParallelExecutionManager {
    /// Create a manager running at most `max_parallel` workers at once.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    /// Worker limit per batch.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Split `steps` into batches no wider than the worker limit.
    pub fn batches<'a>(&self, steps: &'a [StepId]) -> std::slice::Chunks<'a, StepId> {
        steps.chunks(self.max_parallel)
    }

    /// Run every job on its own worker and wait for all of them.
    ///
    /// Runs come back in job order. A worker that panics is reported as a
    /// failed run for its step rather than tearing down the batch.
    pub async fn run_batch(
        &self,
        executor: &StepExecutor,
        jobs: Vec<StepJob>,
        cancel: &CancellationToken,
    ) -> Vec<StepRun> {
        debug!(workers = jobs.len(), "Running parallel batch");

        let mut ids = Vec::with_capacity(jobs.len());
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(job.step_id.clone());
            let executor = executor.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { executor.run(job, cancel).await }));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, step_id)| match joined {
                Ok(run) => run,
                Err(e) => {
                    error!(step_id = %step_id, error = %e, "Step worker died");
                    StepRun {
                        result: Err(ToolError::invocation("worker", e.to_string())),
                        step_id,
                        records: Vec::new(),
                        cancelled: cancel.is_cancelled(),
                    }
                }
            })
            .collect()
    }
}

impl Default for ParallelExecutionManager {
    fn default() -> Self {
        Self::new(8)
    }
}
