//! Execution layer - scheduling, step execution, retries and replanning,
//! parallel batches and progress events.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod emitter;
pub mod executor;
pub mod retry;
pub mod parallel;
pub mod engine;
pub mod manager;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use scheduler::{Scheduler, Resolution};
pub use emitter::{EventChannel, ProgressEmitter, TelemetrySink, TracingTelemetrySink};
pub use executor::{ExecutionOutcome, StepExecutor, StepJob, StepRun};
pub use retry::{FailureDecision, RetryController};
pub use parallel::ParallelExecutionManager;
pub use engine::{estimate_duration_ms, ExecutionEngine, RunSummary};
pub use manager::TaskManager;
