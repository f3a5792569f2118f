//! Built-in tools (echo, external command).

use super::r#trait::*;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Returns its parameters and invocation context. Useful as a dry-run
/// stand-in for any capability.
pub struct EchoTool {
    descriptor: ToolDescriptor,
}

impl EchoTool {
    /// Create an echo tool advertising `capabilities`.
    pub fn new<I, S>(id: &str, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut descriptor = ToolDescriptor::new(id, "Echo")
            .with_description("Echoes its parameters back")
            .with_time_ms(1);
        for capability in capabilities {
            descriptor = descriptor.with_capability(capability);
        }
        Self { descriptor }
    }

    /// Use a custom descriptor.
    pub fn with_descriptor(descriptor: ToolDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<serde_json::Value, ToolError> {
        if input.context.cancellation.is_cancelled() {
            return Err(ToolError::Cancelled(self.descriptor.id.clone()));
        }
        Ok(serde_json::json!({
            "tool": self.descriptor.id,
            "task_id": input.context.task_id,
            "step_id": input.context.step_id,
            "attempt": input.context.attempt,
            "params": input.params,
        }))
    }
}

/// Runs an external program. Extra arguments come from the `args`
/// parameter; a non-zero exit status is a failure.
pub struct CommandTool {
    descriptor: ToolDescriptor,
    program: String,
    base_args: Vec<String>,
}

impl CommandTool {
    /// Create a command tool.
    pub fn new(descriptor: ToolDescriptor, program: impl Into<String>) -> Self {
        Self {
            descriptor,
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    /// Arguments passed before the per-invocation `args`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
            .optional("args", ParamType::Array)
            .optional("stdin", ParamType::String)
    }

    async fn invoke(&self, input: ToolInput) -> Result<serde_json::Value, ToolError> {
        let start = std::time::Instant::now();
        let id = self.descriptor.id.clone();

        let extra: Vec<String> = input
            .params
            .get("args")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(&extra)
            .env("TASKPILOT_TASK_ID", input.context.task_id.as_str())
            .env("TASKPILOT_STEP_ID", input.context.step_id.as_str())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        debug!(tool_id = %id, program = %self.program, args = ?extra, "Spawning command");
        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::invocation(id.clone(), e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(text) = input.params.get("stdin").and_then(|v| v.as_str()) {
                use tokio::io::AsyncWriteExt;
                stdin
                    .write_all(text.as_bytes())
                    .await
                    .map_err(|e| ToolError::invocation(id.clone(), e.to_string()))?;
            }
        }

        let output = tokio::select! {
            out = child.wait_with_output() => {
                out.map_err(|e| ToolError::invocation(id.clone(), e.to_string()))?
            }
            _ = input.context.cancellation.cancelled() => {
                return Err(ToolError::Cancelled(id));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ToolError::invocation(
                id,
                format!("exit code {}: {}", exit_code, stderr.trim()),
            ));
        }

        Ok(serde_json::json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
            "duration_ms": start.elapsed().as_millis() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn input(params: serde_json::Value) -> ToolInput {
        ToolInput {
            params: params.as_object().cloned().unwrap_or_default(),
            context: InvocationContext {
                task_id: "t1".into(),
                step_id: "s1".into(),
                attempt: 1,
                cancellation: CancellationToken::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_echo_returns_params() {
        let tool = EchoTool::new("echo", ["search", "analysis"]);
        assert_eq!(tool.descriptor().capabilities.len(), 2);

        let out = tool.invoke(input(serde_json::json!({"query": "rust"}))).await.unwrap();
        assert_eq!(out["params"]["query"], "rust");
        assert_eq!(out["step_id"], "s1");
    }

    #[tokio::test]
    async fn test_echo_honours_cancellation() {
        let tool = EchoTool::new("echo", ["search"]);
        let input = input(serde_json::json!({}));
        input.context.cancellation.cancel();
        let err = tool.invoke(input).await.unwrap_err();
        assert_eq!(err, ToolError::Cancelled("echo".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_success_and_failure() {
        let ok = CommandTool::new(ToolDescriptor::new("true", "true"), "true");
        let out = ok.invoke(input(serde_json::json!({}))).await.unwrap();
        assert_eq!(out["exit_code"], 0);

        let bad = CommandTool::new(ToolDescriptor::new("false", "false"), "false");
        let err = bad.invoke(input(serde_json::json!({}))).await.unwrap_err();
        assert!(matches!(err, ToolError::Invocation { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_passes_args() {
        let tool = CommandTool::new(ToolDescriptor::new("echo-cmd", "echo"), "echo")
            .with_args(vec!["hello".to_string()]);
        let out = tool
            .invoke(input(serde_json::json!({"args": ["world"]})))
            .await
            .unwrap();
        assert_eq!(out["stdout"].as_str().unwrap().trim(), "hello world");
    }

    #[test]
    fn test_command_schema() {
        let tool = CommandTool::new(ToolDescriptor::new("c", "c"), "true");
        let bad = serde_json::json!({"args": "not-an-array"});
        assert!(tool.schema().validate(bad.as_object().unwrap()).is_err());
    }
}
