//! Task manager - the command surface for creating, running and cancelling
//! tasks.
//!
//! Each started task gets its own driver on the tokio runtime and its own
//! cancellation token. Drivers share only the engine's tool registry, store
//! and event channel.

use std::collections::HashMap;
use std::sync::Arc;
use taskpilot_core::{Event, Plan, Task, TaskFilter, TaskId};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use crate::engine::{ExecutionEngine, RunSummary};
use crate::error::{EngineError, Result};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<RunSummary>,
}

/// What is kept of a run nobody waited for. The task itself is in the store.
struct Finished {
    cancelled: bool,
    iterations: usize,
}

#[derive(Default)]
struct Drivers {
    running: HashMap<TaskId, Running>,
    finished: HashMap<TaskId, Finished>,
}

impl Drivers {
    fn live(&self, id: &TaskId) -> Option<&Running> {
        self.running.get(id).filter(|r| !r.handle.is_finished())
    }
}

/// Creates, runs and cancels tasks.
pub struct TaskManager {
    engine: ExecutionEngine,
    drivers: Arc<Mutex<Drivers>>,
}

impl TaskManager {
    /// Create a manager on top of `engine`.
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            engine,
            drivers: Arc::new(Mutex::new(Drivers::default())),
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Subscribe to progress events of every task.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.engine.subscribe()
    }

    /// Ingest a plan and store the resulting pending task.
    pub async fn create_task(&self, plan: Plan) -> Result<TaskId> {
        let task = self.engine.prepare(plan)?;
        self.submit(task).await
    }

    /// Store an already built task.
    pub async fn submit(&self, task: Task) -> Result<TaskId> {
        self.engine.store().save(&task).await?;
        debug!(task_id = %task.id, "Task created");
        Ok(task.id)
    }

    /// Start a driver for a stored task.
    ///
    /// A driver drops its own entry when it exits; unless a caller is
    /// already waiting, only the run's cancellation flag and iteration count
    /// are kept for a later `wait`.
    pub async fn start(&self, id: &TaskId) -> Result<()> {
        let mut drivers = self.drivers.lock().await;
        if drivers.live(id).is_some() {
            return Err(EngineError::AlreadyRunning(id.clone()));
        }

        let task = self
            .engine
            .store()
            .load(id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(id.clone()))?;

        let cancel = CancellationToken::new();
        let engine = self.engine.clone();
        let token = cancel.clone();
        let shared = Arc::clone(&self.drivers);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let summary = engine.run(task, token).await;
            let mut drivers = shared.lock().await;
            if drivers.running.remove(&task_id).is_some() {
                drivers.finished.insert(
                    task_id,
                    Finished {
                        cancelled: summary.cancelled,
                        iterations: summary.iterations,
                    },
                );
            }
            summary
        });

        info!(task_id = %id, "Task started");
        drivers.finished.remove(id);
        drivers.running.insert(id.clone(), Running { cancel, handle });
        Ok(())
    }

    /// Ask a running task to stop. The driver finishes its in-flight
    /// attempts and records the outcome before it exits.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let drivers = self.drivers.lock().await;
        let entry = drivers
            .live(id)
            .ok_or_else(|| EngineError::NotRunning(id.clone()))?;
        info!(task_id = %id, "Cancelling task");
        entry.cancel.cancel();
        Ok(())
    }

    /// Wait for a started task's driver to finish.
    ///
    /// A run that already ended is answered from the stored snapshot.
    pub async fn wait(&self, id: &TaskId) -> Result<RunSummary> {
        let mut drivers = self.drivers.lock().await;
        if let Some(entry) = drivers.running.remove(id) {
            drop(drivers);
            return entry.handle.await.map_err(|e| {
                if e.is_cancelled() {
                    EngineError::Cancelled(id.clone())
                } else {
                    EngineError::Worker {
                        task: id.clone(),
                        message: e.to_string(),
                    }
                }
            });
        }

        let done = drivers
            .finished
            .remove(id)
            .ok_or_else(|| EngineError::NotRunning(id.clone()))?;
        drop(drivers);
        Ok(RunSummary {
            task: self.status(id).await?,
            cancelled: done.cancelled,
            iterations: done.iterations,
        })
    }

    /// Create, start and wait for a task.
    pub async fn execute(&self, plan: Plan) -> Result<RunSummary> {
        let id = self.create_task(plan).await?;
        self.start(&id).await?;
        self.wait(&id).await
    }

    /// Whether a driver is currently running for `id`.
    pub async fn is_running(&self, id: &TaskId) -> bool {
        self.drivers.lock().await.live(id).is_some()
    }

    /// Number of drivers still holding a run.
    pub async fn active_drivers(&self) -> usize {
        self.drivers.lock().await.running.len()
    }

    /// Latest snapshot of a task.
    pub async fn status(&self, id: &TaskId) -> Result<Task> {
        self.engine
            .store()
            .load(id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(id.clone()))
    }

    /// Stored tasks matching `filter`.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.engine.store().list(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::sync::Arc;
    use taskpilot_core::TaskStatus;
    use taskpilot_storage::InMemoryTaskStore;
    use taskpilot_tools::{EchoTool, ToolRegistry};

    fn manager() -> TaskManager {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("echo", ["search", "analysis", "file_io"])));
        TaskManager::new(ExecutionEngine::new(
            Arc::new(registry),
            Arc::new(InMemoryTaskStore::new()),
            EngineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_create_start_wait() {
        let manager = manager();
        let id = manager.create_task(Plan::fallback("rust")).await.unwrap();
        assert_eq!(manager.status(&id).await.unwrap().status, TaskStatus::Pending);

        manager.start(&id).await.unwrap();
        let summary = manager.wait(&id).await.unwrap();

        assert_eq!(summary.status(), TaskStatus::Completed);
        assert_eq!(manager.status(&id).await.unwrap().status, TaskStatus::Completed);
        assert!(!manager.is_running(&id).await);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let manager = manager();
        let id = TaskId::from("nope");
        assert!(matches!(manager.start(&id).await, Err(EngineError::TaskNotFound(_))));
        assert!(matches!(manager.status(&id).await, Err(EngineError::TaskNotFound(_))));
        assert!(matches!(manager.cancel(&id).await, Err(EngineError::NotRunning(_))));
        assert!(matches!(manager.wait(&id).await, Err(EngineError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_finished_drivers_are_released() {
        let manager = manager();
        let mut ids = Vec::new();
        for n in 0..20 {
            let id = manager.create_task(Plan::fallback(&format!("topic {n}"))).await.unwrap();
            manager.start(&id).await.unwrap();
            ids.push(id);
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while manager.active_drivers().await > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(manager.cancel(&ids[0]).await, Err(EngineError::NotRunning(_))));
        let summary = manager.wait(&ids[0]).await.unwrap();
        assert_eq!(summary.status(), TaskStatus::Completed);
        assert!(!summary.cancelled);
        assert!(summary.iterations > 0);
        assert!(matches!(manager.wait(&ids[0]).await, Err(EngineError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_empty_plan_is_rejected() {
        let manager = manager();
        let plan = Plan::from_json(r#"{"title": "x", "steps": []}"#).unwrap();
        assert!(matches!(manager.create_task(plan).await, Err(EngineError::Plan(_))));
    }

    #[tokio::test]
    async fn test_list_includes_created_tasks() {
        let manager = manager();
        manager.execute(Plan::fallback("a")).await.unwrap();
        manager.create_task(Plan::fallback("b")).await.unwrap();

        let all = manager.list(&TaskFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let done = manager
            .list(&TaskFilter { status: Some(vec![TaskStatus::Completed]) })
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
    }
}
