//! CLI configuration file: engine settings plus the tools to register.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use taskpilot_execution::EngineConfig;
use taskpilot_tools::{CommandTool, EchoTool, ToolDescriptor, ToolRegistry};
use tracing::debug;

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Engine settings
    pub engine: EngineConfig,
    /// Tools to register, in order
    pub tools: Vec<ToolConfig>,
}

/// How a configured tool runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Echo the parameters back
    #[default]
    Echo,
    /// Spawn an external program
    Command,
}

/// One tool entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: ToolKind,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub time_ms: u64,
    #[serde(default = "default_reliability")]
    pub reliability: f64,
}

fn default_reliability() -> f64 {
    1.0
}

impl CliConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Build the tool registry. With no tools configured, a single echo
    /// tool covering the fallback plan's capabilities is registered.
    pub fn registry(&self) -> Result<ToolRegistry> {
        let registry = ToolRegistry::new();
        if self.tools.is_empty() {
            registry.register(Arc::new(EchoTool::new("echo", ["search", "analysis", "file_io"])));
            return Ok(registry);
        }

        for tool in &self.tools {
            let mut descriptor = ToolDescriptor::new(tool.id.as_str(), tool.name.clone().unwrap_or_else(|| tool.id.clone()))
                .with_cost(tool.cost)
                .with_time_ms(tool.time_ms)
                .with_reliability(tool.reliability);
            for capability in &tool.capabilities {
                descriptor = descriptor.with_capability(capability.as_str());
            }

            debug!(tool_id = %tool.id, kind = ?tool.kind, "Configuring tool");
            match tool.kind {
                ToolKind::Echo => {
                    registry.register(Arc::new(EchoTool::with_descriptor(descriptor)));
                }
                ToolKind::Command => {
                    let Some(program) = &tool.program else {
                        bail!("command tool '{}' needs a program", tool.id);
                    };
                    let command = CommandTool::new(descriptor, program.as_str()).with_args(tool.args.clone());
                    registry.register(Arc::new(command));
                }
            }
        }
        Ok(registry)
    }
}
