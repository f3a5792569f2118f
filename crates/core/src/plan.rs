//! Plan input - the JSON document produced by plan synthesis.

use std::collections::HashSet;
use serde::{Deserialize, Serialize};
use crate::id::{StepId, TaskId, ToolId};
use crate::step::Step;
use crate::task::Task;

/// Errors raised while turning a plan into a task.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Malformed JSON
    #[error("Invalid plan JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The plan has no steps
    #[error("Plan has no steps")]
    Empty,

    /// Two steps share an id
    #[error("Duplicate step id: {0}")]
    DuplicateStepId(StepId),
}

/// Step ids in plans may be numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStepId {
    /// Numeric id, e.g. `1`
    Number(i64),
    /// Textual id, e.g. `"search"`
    Text(String),
}

impl From<RawStepId> for StepId {
    fn from(raw: RawStepId) -> Self {
        match raw {
            RawStepId::Number(n) => StepId::from(n),
            RawStepId::Text(s) => StepId::from(s),
        }
    }
}

/// A plan as delivered by the plan synthesis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Task id; generated when absent
    #[serde(default)]
    pub task_id: Option<String>,

    /// Task title
    pub title: String,

    /// Optional longer description
    #[serde(default)]
    pub description: String,

    /// Prompt the plan was synthesized from
    #[serde(default)]
    pub goal: String,

    /// Steps, in plan order
    pub steps: Vec<PlanStep>,

    /// Whether exhausted steps may be replanned
    #[serde(default)]
    pub auto_replan: bool,

    /// Replan budget; engine default when absent
    #[serde(default)]
    pub max_replans: Option<u32>,
}

/// One step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step id
    pub id: RawStepId,

    /// Short title
    pub title: String,

    /// What the step should accomplish
    #[serde(default)]
    pub description: String,

    /// Capability tags
    #[serde(default)]
    pub required_capabilities: Vec<String>,

    /// Explicit tool ids
    #[serde(default)]
    pub required_tools: Vec<String>,

    /// Step ids that must complete first
    #[serde(default)]
    pub dependencies: Vec<RawStepId>,

    /// Whether the step may run in a parallel batch
    #[serde(default)]
    pub parallel_execution: bool,

    /// Retry budget; engine default when absent
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Tool parameters
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Budgets applied when a plan leaves them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanDefaults {
    /// Default per-step retry budget
    pub max_retries: u32,
    /// Default per-task replan budget
    pub max_replans: u32,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_replans: 2,
        }
    }
}

impl Plan {
    /// Parse a plan document.
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Canned plan used when synthesis is unavailable: search, analyze,
    /// then write up the findings.
    pub fn fallback(prompt: &str) -> Self {
        let mut query = serde_json::Map::new();
        query.insert("query".to_string(), serde_json::Value::String(prompt.to_string()));

        Self {
            task_id: None,
            title: format!("Research: {}", prompt),
            description: "Fallback plan".to_string(),
            goal: prompt.to_string(),
            steps: vec![
                PlanStep {
                    id: RawStepId::Number(1),
                    title: "Search for information".to_string(),
                    description: format!("Gather sources about: {}", prompt),
                    required_capabilities: vec!["search".to_string()],
                    required_tools: Vec::new(),
                    dependencies: Vec::new(),
                    parallel_execution: false,
                    max_retries: None,
                    parameters: query,
                },
                PlanStep {
                    id: RawStepId::Number(2),
                    title: "Analyze findings".to_string(),
                    description: "Extract the key points from the gathered sources".to_string(),
                    required_capabilities: vec!["analysis".to_string()],
                    required_tools: Vec::new(),
                    dependencies: vec![RawStepId::Number(1)],
                    parallel_execution: false,
                    max_retries: None,
                    parameters: serde_json::Map::new(),
                },
                PlanStep {
                    id: RawStepId::Number(3),
                    title: "Write report".to_string(),
                    description: "Write the analysis to a report".to_string(),
                    required_capabilities: vec!["file_io".to_string()],
                    required_tools: Vec::new(),
                    dependencies: vec![RawStepId::Number(2)],
                    parallel_execution: false,
                    max_retries: None,
                    parameters: serde_json::Map::new(),
                },
            ],
            auto_replan: true,
            max_replans: None,
        }
    }

    /// Turn the plan into a pending task with its dependency graph built.
    pub fn into_task(self, defaults: PlanDefaults) -> Result<Task, PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        let task_id = self.task_id.map(TaskId::from).unwrap_or_default();
        let mut task = Task::new(task_id, self.title)
            .with_description(self.description)
            .with_goal(self.goal);
        task.auto_replan = self.auto_replan;
        task.max_replans = self.max_replans.unwrap_or(defaults.max_replans);

        let mut seen = HashSet::new();
        for raw in self.steps {
            let mut step = Step::new(raw.id, raw.title).with_description(raw.description);
            if !seen.insert(step.id.clone()) {
                return Err(PlanError::DuplicateStepId(step.id));
            }
            step.required_capabilities = raw.required_capabilities;
            step.required_tools = raw.required_tools.into_iter().map(ToolId::from).collect();
            step.dependencies = raw.dependencies.into_iter().map(StepId::from).collect();
            step.parallel_safe = raw.parallel_execution;
            step.max_retries = raw.max_retries.unwrap_or(defaults.max_retries);
            step.parameters = raw.parameters;
            task.steps.push(step);
        }

        task.rebuild_graph();
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{
        "task_id": "t-42",
        "title": "Compare runtimes",
        "steps": [
            {"id": 1, "title": "Search", "description": "find docs",
             "required_capabilities": ["search"], "required_tools": [],
             "dependencies": [], "parallel_execution": false, "max_retries": 1},
            {"id": "2", "title": "Analyze", "required_tools": ["llm"],
             "dependencies": [1], "parallel_execution": true}
        ],
        "auto_replan": true
    }"#;

    #[test]
    fn test_parse_mixed_step_ids() {
        let plan = Plan::from_json(PLAN).unwrap();
        let task = plan.into_task(PlanDefaults::default()).unwrap();

        assert_eq!(task.id, TaskId::from("t-42"));
        assert_eq!(task.steps.len(), 2);
        assert_eq!(task.steps[0].id, StepId::from("1"));
        assert_eq!(task.steps[1].dependencies, vec![StepId::from("1")]);
        assert_eq!(task.steps[1].required_tools, vec![ToolId::from("llm")]);
        assert!(task.steps[1].parallel_safe);
        assert!(task.auto_replan);
        assert_eq!(task.dependency_graph.topological_order.len(), 2);
    }

    #[test]
    fn test_defaults_fill_missing_budgets() {
        let task = Plan::from_json(PLAN)
            .unwrap()
            .into_task(PlanDefaults { max_retries: 5, max_replans: 4 })
            .unwrap();

        assert_eq!(task.steps[0].max_retries, 1);
        assert_eq!(task.steps[1].max_retries, 5);
        assert_eq!(task.max_replans, 4);
    }

    #[test]
    fn test_missing_task_id_is_generated() {
        let json = r#"{"title": "x", "steps": [{"id": "a", "title": "A"}]}"#;
        let task = Plan::from_json(json).unwrap().into_task(PlanDefaults::default()).unwrap();
        assert!(task.id.as_str().starts_with("task_"));
        assert!(!task.auto_replan);
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let json = r#"{"title": "x", "steps": []}"#;
        let err = Plan::from_json(json).unwrap().into_task(PlanDefaults::default());
        assert!(matches!(err, Err(PlanError::Empty)));
    }

    #[test]
    fn test_duplicate_step_ids_are_rejected() {
        let json = r#"{"title": "x", "steps": [{"id": 1, "title": "A"}, {"id": "1", "title": "B"}]}"#;
        let err = Plan::from_json(json).unwrap().into_task(PlanDefaults::default());
        assert!(matches!(err, Err(PlanError::DuplicateStepId(id)) if id.as_str() == "1"));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(Plan::from_json("{"), Err(PlanError::Json(_))));
    }

    #[test]
    fn test_fallback_plan_is_a_chain() {
        let task = Plan::fallback("rust async")
            .into_task(PlanDefaults::default())
            .unwrap();

        assert_eq!(task.steps.len(), 3);
        assert_eq!(task.goal, "rust async");
        assert_eq!(task.steps[0].parameters["query"], "rust async");
        assert_eq!(
            task.dependency_graph.topological_order,
            vec![StepId::from("1"), StepId::from("2"), StepId::from("3")]
        );
    }
}
