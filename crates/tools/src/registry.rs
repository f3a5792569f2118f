//! Tool registry - catalog and selection.
//!
//! Shared by every task driver. Lookups take a read lock; registration and
//! removal take the write lock. Registration order is kept so that ties in
//! selection resolve the same way on every call.

use crate::r#trait::{Tool, ToolDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use taskpilot_core::ToolId;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A tool with this id is already registered
    #[error("Tool already registered: {0}")]
    DuplicateId(ToolId),

    /// No tool with this id
    #[error("Tool not found: {0}")]
    NotFound(ToolId),
}

/// How to choose among tools that match a capability request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStrategy {
    /// Highest `overlap * reliability`
    #[default]
    BestFit,
    /// Lowest time estimate
    Fastest,
    /// Lowest cost estimate
    Cheapest,
}

struct Entry {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

#[derive(Default)]
struct Catalog {
    /// Registration order
    entries: Vec<Entry>,
    /// id -> position in `entries`
    index: HashMap<ToolId, usize>,
}

impl Catalog {
    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.descriptor.id.clone(), i))
            .collect();
    }
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    catalog: RwLock<Catalog>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same id in place.
    ///
    /// Returns the replaced tool, if any.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let descriptor = tool.descriptor().clone();
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);

        let existing = catalog.index.get(&descriptor.id).copied();
        if let Some(pos) = existing {
            info!(tool_id = %descriptor.id, "Replacing registered tool");
            let old = std::mem::replace(&mut catalog.entries[pos], Entry { descriptor, tool });
            return Some(old.tool);
        }

        debug!(tool_id = %descriptor.id, capabilities = ?descriptor.capabilities, "Registering tool");
        let pos = catalog.entries.len();
        catalog.index.insert(descriptor.id.clone(), pos);
        catalog.entries.push(Entry { descriptor, tool });
        None
    }

    /// Register a tool, refusing to replace an existing one.
    pub fn try_register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let descriptor = tool.descriptor().clone();
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        if catalog.index.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateId(descriptor.id));
        }

        debug!(tool_id = %descriptor.id, capabilities = ?descriptor.capabilities, "Registering tool");
        let pos = catalog.entries.len();
        catalog.index.insert(descriptor.id.clone(), pos);
        catalog.entries.push(Entry { descriptor, tool });
        Ok(())
    }

    /// Remove a tool.
    pub fn unregister(&self, id: &ToolId) -> Result<Arc<dyn Tool>, RegistryError> {
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let pos = catalog
            .index
            .get(id)
            .copied()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let entry = catalog.entries.remove(pos);
        catalog.reindex();
        info!(tool_id = %id, "Unregistered tool");
        Ok(entry.tool)
    }

    /// Whether a tool id is registered.
    pub fn contains(&self, id: &ToolId) -> bool {
        self.read().index.contains_key(id)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a tool by id.
    pub fn get(&self, id: &ToolId) -> Option<Arc<dyn Tool>> {
        let catalog = self.read();
        catalog.index.get(id).map(|&pos| catalog.entries[pos].tool.clone())
    }

    /// Get a tool's metadata by id.
    pub fn descriptor(&self, id: &ToolId) -> Option<ToolDescriptor> {
        let catalog = self.read();
        catalog.index.get(id).map(|&pos| catalog.entries[pos].descriptor.clone())
    }

    /// All tools, in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.read().entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Tools offering at least one of `capabilities`; every tool when the
    /// request is empty. Registration order is preserved.
    pub fn query(&self, capabilities: &[String]) -> Vec<ToolDescriptor> {
        self.read()
            .entries
            .iter()
            .filter(|e| capabilities.is_empty() || e.descriptor.capability_overlap(capabilities) > 0)
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Pick the best tool for `capabilities`.
    pub fn select_best(
        &self,
        capabilities: &[String],
        strategy: SelectionStrategy,
    ) -> Option<ToolDescriptor> {
        self.select_best_excluding(capabilities, strategy, &[])
    }

    /// Pick the best tool for `capabilities`, skipping `exclude`.
    pub fn select_best_excluding(
        &self,
        capabilities: &[String],
        strategy: SelectionStrategy,
        exclude: &[ToolId],
    ) -> Option<ToolDescriptor> {
        let candidates: Vec<ToolDescriptor> = self
            .query(capabilities)
            .into_iter()
            .filter(|t| !exclude.contains(&t.id))
            .collect();

        // Strict comparisons keep the earliest registration on ties.
        let mut best: Option<&ToolDescriptor> = None;
        for candidate in &candidates {
            let better = match best {
                None => true,
                Some(current) => match strategy {
                    SelectionStrategy::BestFit => {
                        fit_score(candidate, capabilities) > fit_score(current, capabilities)
                    }
                    SelectionStrategy::Fastest => candidate.time_estimate_ms < current.time_estimate_ms,
                    SelectionStrategy::Cheapest => candidate.cost_estimate < current.cost_estimate,
                },
            };
            if better {
                best = Some(candidate);
            }
        }

        best.cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fit_score(tool: &ToolDescriptor, capabilities: &[String]) -> f64 {
    tool.capability_overlap(capabilities) as f64 * tool.reliability
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#trait::{ToolError, ToolInput};
    use async_trait::async_trait;

    struct Stub(ToolDescriptor);

    #[async_trait]
    impl Tool for Stub {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn invoke(&self, _input: ToolInput) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn stub(id: &str, caps: &[&str], time_ms: u64, cost: f64, reliability: f64) -> Arc<dyn Tool> {
        let mut d = ToolDescriptor::new(id, id)
            .with_time_ms(time_ms)
            .with_cost(cost)
            .with_reliability(reliability);
        for c in caps {
            d = d.with_capability(*c);
        }
        Arc::new(Stub(d))
    }

    fn caps(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn sample_registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(stub("google", &["search", "web"], 800, 2.0, 0.9));
        registry.register(stub("bing", &["search"], 300, 1.0, 0.6));
        registry.register(stub("files", &["file_io"], 50, 0.1, 1.0));
        registry
    }

    #[test]
    fn test_query_by_capability() {
        let registry = sample_registry();
        let ids: Vec<_> = registry
            .query(&caps(&["search"]))
            .into_iter()
            .map(|t| t.id.to_string())
            .collect();
        assert_eq!(ids, vec!["google", "bing"]);
    }

    #[test]
    fn test_empty_query_returns_everything() {
        let registry = sample_registry();
        assert_eq!(registry.query(&[]).len(), 3);
    }

    #[test]
    fn test_select_fastest() {
        let registry = sample_registry();
        let tool = registry.select_best(&caps(&["search"]), SelectionStrategy::Fastest).unwrap();
        assert_eq!(tool.id.as_str(), "bing");
    }

    #[test]
    fn test_select_cheapest() {
        let registry = sample_registry();
        let tool = registry
            .select_best(&caps(&["search", "file_io"]), SelectionStrategy::Cheapest)
            .unwrap();
        assert_eq!(tool.id.as_str(), "files");
    }

    #[test]
    fn test_select_best_fit_weighs_overlap_and_reliability() {
        let registry = sample_registry();
        // google: 2 * 0.9 = 1.8, bing: 1 * 0.6
        let tool = registry
            .select_best(&caps(&["search", "web"]), SelectionStrategy::BestFit)
            .unwrap();
        assert_eq!(tool.id.as_str(), "google");
    }

    #[test]
    fn test_best_fit_ties_keep_registration_order() {
        let registry = ToolRegistry::new();
        registry.register(stub("first", &["search"], 10, 1.0, 0.5));
        registry.register(stub("second", &["search"], 10, 1.0, 0.5));
        for _ in 0..10 {
            let tool = registry.select_best(&caps(&["search"]), SelectionStrategy::BestFit).unwrap();
            assert_eq!(tool.id.as_str(), "first");
        }
    }

    #[test]
    fn test_select_none_found() {
        let registry = sample_registry();
        assert!(registry.select_best(&caps(&["telepathy"]), SelectionStrategy::BestFit).is_none());
    }

    #[test]
    fn test_select_excluding() {
        let registry = sample_registry();
        let tool = registry
            .select_best_excluding(&caps(&["search"]), SelectionStrategy::BestFit, &["google".into()])
            .unwrap();
        assert_eq!(tool.id.as_str(), "bing");
    }

    #[test]
    fn test_register_replaces_in_place() {
        let registry = sample_registry();
        let replaced = registry.register(stub("google", &["search"], 1, 0.0, 0.1));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.list()[0].time_estimate_ms, 1);
    }

    #[test]
    fn test_try_register_rejects_duplicate() {
        let registry = sample_registry();
        let err = registry.try_register(stub("bing", &[], 1, 1.0, 1.0)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("bing".into()));
        assert!(registry.try_register(stub("ddg", &["search"], 1, 1.0, 1.0)).is_ok());
    }

    #[test]
    fn test_concurrent_try_register_admits_one() {
        let registry = ToolRegistry::new();
        let admitted: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..16)
                .map(|n| {
                    let registry = &registry;
                    scope.spawn(move || {
                        registry.try_register(stub("dup", &["search"], n, 1.0, 1.0)).is_ok()
                    })
                })
                .collect();
            workers.into_iter().map(|w| usize::from(w.join().unwrap())).sum()
        });

        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = sample_registry();
        registry.unregister(&"google".into()).unwrap();
        assert!(!registry.contains(&"google".into()));
        assert!(registry.get(&"bing".into()).is_some());
        assert_eq!(registry.descriptor(&"files".into()).unwrap().id.as_str(), "files");

        assert!(matches!(
            registry.unregister(&"google".into()),
            Err(RegistryError::NotFound(id)) if id.as_str() == "google"
        ));
    }
}
