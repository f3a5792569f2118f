//! Progress events - fan-out to live subscribers and telemetry.
//!
//! Emission is synchronous with the transition it announces and never fails:
//! a channel without receivers drops the event, and sinks are fire-and-forget.

use std::sync::Arc;
use taskpilot_core::{Event, EventType, Step, Task};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Receives every event the engine emits. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    /// Record an event.
    fn record(&self, event: &Event);
}

/// Telemetry sink that writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: &Event) {
        let step_id = event.step_id.as_ref().map(|s| s.as_str()).unwrap_or("-");
        match event.event_type {
            EventType::StepFailed | EventType::TaskFailed => warn!(
                task_id = %event.task_id,
                step_id,
                status = %event.status,
                "{}",
                event.event_type
            ),
            EventType::StepRetry | EventType::TaskReplanned | EventType::TaskCompleted => info!(
                task_id = %event.task_id,
                step_id,
                status = %event.status,
                "{}",
                event.event_type
            ),
            _ => debug!(
                task_id = %event.task_id,
                step_id,
                status = %event.status,
                "{}",
                event.event_type
            ),
        }
    }
}

/// In-process event channel based on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: broadcast::Sender<Event>,
}

impl EventChannel {
    /// Create a channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. No receivers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Publishes task and step lifecycle events.
#[derive(Clone, Default)]
pub struct ProgressEmitter {
    channel: EventChannel,
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl ProgressEmitter {
    /// Create an emitter on `channel` with no sinks.
    pub fn new(channel: EventChannel) -> Self {
        Self {
            channel,
            sinks: Vec::new(),
        }
    }

    /// Add a telemetry sink.
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// The underlying channel.
    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.channel.subscribe()
    }

    /// Emit a prepared event.
    pub fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.record(&event);
        }
        self.channel.publish(event);
    }

    /// Emit an event about `step`.
    pub fn step(
        &self,
        event_type: EventType,
        task: &Task,
        step: &Step,
        detail: Option<serde_json::Value>,
    ) {
        self.emit(Event::for_step(event_type, &task.id, step, detail));
    }

    /// Emit an event about the task as a whole.
    pub fn task(&self, event_type: EventType, task: &Task, detail: Option<serde_json::Value>) {
        self.emit(Event::for_task(event_type, task, detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<EventType>>);

    impl TelemetrySink for Collect {
        fn record(&self, event: &Event) {
            self.0.lock().unwrap().push(event.event_type);
        }
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers_and_sinks() {
        let sink = Arc::new(Collect::default());
        let emitter = ProgressEmitter::new(EventChannel::new(8)).with_sink(sink.clone());
        let mut rx = emitter.subscribe();

        let task = Task::new("t1", "Research");
        let step = Step::new("s1", "Search");
        emitter.step(EventType::StepStarted, &task, &step, None);
        emitter.task(EventType::TaskCompleted, &task, None);

        assert_eq!(rx.recv().await.unwrap().event_type, EventType::StepStarted);
        let done = rx.recv().await.unwrap();
        assert_eq!(done.event_type, EventType::TaskCompleted);
        assert!(done.step_id.is_none());
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![EventType::StepStarted, EventType::TaskCompleted]
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let emitter = ProgressEmitter::new(EventChannel::new(1)).with_sink(Arc::new(TracingTelemetrySink));
        let task = Task::new("t1", "Research");
        for _ in 0..4 {
            emitter.task(EventType::TaskFailed, &task, None);
        }
    }
}
