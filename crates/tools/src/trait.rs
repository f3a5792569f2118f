//! Tool abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use taskpilot_core::{StepId, TaskId, ToolId};
use tokio_util::sync::CancellationToken;

/// Tool parameters, by name.
pub type ToolParams = serde_json::Map<String, serde_json::Value>;

/// Errors a tool invocation can end with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// The step named a tool the registry does not know
    #[error("Unknown tool: {0}")]
    UnknownTool(ToolId),

    /// No registered tool offers the requested capabilities
    #[error("No tool available for capabilities {0:?}")]
    NoToolAvailable(Vec<String>),

    /// Parameters failed schema validation
    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidParams {
        /// Tool that rejected the parameters
        tool: ToolId,
        /// What was wrong
        reason: String,
    },

    /// The tool ran and reported failure
    #[error("Tool {tool} failed: {message}")]
    Invocation {
        /// Failing tool
        tool: ToolId,
        /// Tool-provided message
        message: String,
    },

    /// The tool did not return in time
    #[error("Tool {tool} timed out after {after:?}")]
    Timeout {
        /// Slow tool
        tool: ToolId,
        /// Timeout that elapsed
        after: Duration,
    },

    /// The invocation was cancelled
    #[error("Tool {0} cancelled")]
    Cancelled(ToolId),
}

impl ToolError {
    /// Build an invocation failure.
    pub fn invocation(tool: impl Into<ToolId>, message: impl Into<String>) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether the failure stems from tool resolution rather than a run.
    pub fn is_resolution_error(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::NoToolAvailable(_))
    }
}

/// Registry metadata for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique id
    pub id: ToolId,

    /// Display name
    pub name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Capability tags
    pub capabilities: BTreeSet<String>,

    /// Relative cost of one invocation
    pub cost_estimate: f64,

    /// Typical run time in milliseconds
    pub time_estimate_ms: u64,

    /// Probability of success, 0.0-1.0
    pub reliability: f64,
}

impl ToolDescriptor {
    /// Create a descriptor with neutral estimates.
    pub fn new(id: impl Into<ToolId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            capabilities: BTreeSet::new(),
            cost_estimate: 0.0,
            time_estimate_ms: 0,
            reliability: 1.0,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a capability tag.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Set the cost estimate.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_estimate = cost;
        self
    }

    /// Set the time estimate.
    pub fn with_time_ms(mut self, time_ms: u64) -> Self {
        self.time_estimate_ms = time_ms;
        self
    }

    /// Set reliability, clamped to 0.0-1.0.
    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }

    /// Number of requested capabilities this tool offers.
    pub fn capability_overlap(&self, requested: &[String]) -> usize {
        requested
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|c| self.capabilities.contains(*c))
            .count()
    }
}

/// Per-invocation context handed to a tool.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Task on whose behalf the tool runs
    pub task_id: TaskId,

    /// Step on whose behalf the tool runs
    pub step_id: StepId,

    /// Step attempt number, 1-based
    pub attempt: u32,

    /// Fires when the task is cancelled; tools should stop promptly
    pub cancellation: CancellationToken,
}

/// Input to a tool.
#[derive(Debug, Clone)]
pub struct ToolInput {
    /// Validated parameters
    pub params: ToolParams,

    /// Invocation context
    pub context: InvocationContext,
}

/// A tool that can be executed.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry metadata.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Declared parameters. The default accepts anything.
    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }

    /// Run the tool.
    async fn invoke(&self, input: ToolInput) -> Result<serde_json::Value, ToolError>;
}

/// Declared parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// JSON string
    String,
    /// Any JSON number
    Number,
    /// Integral JSON number
    Integer,
    /// JSON boolean
    Boolean,
    /// JSON array
    Array,
    /// JSON object
    Object,
}

impl ParamType {
    /// Whether `value` has this type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// A tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,

    /// Description
    pub description: String,

    /// Type
    pub param_type: ParamType,

    /// Required
    pub required: bool,
}

/// Tool parameter schema. Undeclared parameters pass through unchecked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Parameters
    pub parameters: Vec<Parameter>,
}

impl ToolSchema {
    /// Declare a required parameter.
    pub fn required(mut self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            description: String::new(),
            param_type,
            required: true,
        });
        self
    }

    /// Declare an optional parameter.
    pub fn optional(mut self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            description: String::new(),
            param_type,
            required: false,
        });
        self
    }

    /// Check `params` against the declared parameters.
    pub fn validate(&self, params: &ToolParams) -> Result<(), String> {
        for param in &self.parameters {
            match params.get(&param.name) {
                None | Some(serde_json::Value::Null) if param.required => {
                    return Err(format!("missing required parameter '{}'", param.name));
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) if !param.param_type.accepts(value) => {
                    return Err(format!(
                        "parameter '{}' should be {:?}, got {}",
                        param.name, param.param_type, value
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
