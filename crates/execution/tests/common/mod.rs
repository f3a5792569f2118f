//! Scripted tools and helpers shared by the scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskpilot_core::{Event, EventType, StepId};
use taskpilot_execution::{EngineConfig, ExecutionEngine, TaskManager};
use taskpilot_storage::{InMemoryTaskStore, TaskStore};
use taskpilot_tools::{Tool, ToolDescriptor, ToolError, ToolInput, ToolRegistry};
use tokio::sync::broadcast;

/// Fails its first `failures` calls, then succeeds. `u32::MAX` never succeeds.
pub struct Scripted {
    descriptor: ToolDescriptor,
    failures: u32,
    delay: Duration,
    calls: AtomicU32,
}

impl Scripted {
    pub fn new(id: &str, failures: u32) -> Self {
        Self {
            descriptor: ToolDescriptor::new(id, id),
            failures,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_ok(id: &str) -> Self {
        Self::new(id, 0)
    }

    pub fn always_fail(id: &str) -> Self {
        Self::new(id, u32::MAX)
    }

    pub fn capability(mut self, capability: &str) -> Self {
        self.descriptor = self.descriptor.with_capability(capability);
        self
    }

    pub fn reliability(mut self, reliability: f64) -> Self {
        self.descriptor = self.descriptor.with_reliability(reliability);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for Scripted {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<serde_json::Value, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = input.context.cancellation.cancelled() => {
                    return Err(ToolError::Cancelled(self.descriptor.id.clone()));
                }
            }
        }
        if call < self.failures {
            return Err(ToolError::invocation(self.descriptor.id.clone(), format!("scripted failure {}", call + 1)));
        }
        Ok(json!({ "step": input.context.step_id, "call": call + 1 }))
    }
}

pub fn registry(tools: Vec<Arc<Scripted>>) -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

pub fn engine(registry: Arc<ToolRegistry>) -> (ExecutionEngine, Arc<InMemoryTaskStore>) {
    let store = Arc::new(InMemoryTaskStore::new());
    let engine = ExecutionEngine::new(registry, store.clone() as Arc<dyn TaskStore>, EngineConfig::default());
    (engine, store)
}

pub fn manager(registry: Arc<ToolRegistry>) -> TaskManager {
    TaskManager::new(engine(registry).0)
}

/// Everything received so far.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

pub fn count(events: &[Event], event_type: EventType) -> usize {
    events.iter().filter(|e| e.event_type == event_type).count()
}

/// Position of the first `event_type` event for `step`.
pub fn position(events: &[Event], event_type: EventType, step: &str) -> usize {
    let step = StepId::from(step);
    events
        .iter()
        .position(|e| e.event_type == event_type && e.step_id.as_ref() == Some(&step))
        .unwrap_or_else(|| panic!("no {} event for step {}", event_type, step))
}

/// Event types for one step, in emission order.
pub fn step_sequence(events: &[Event], step: &str) -> Vec<EventType> {
    let step = StepId::from(step);
    events
        .iter()
        .filter(|e| e.step_id.as_ref() == Some(&step))
        .map(|e| e.event_type)
        .collect()
}
