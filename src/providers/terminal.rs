//! Process executor toolkit (`terminal` server).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::dispatch::{CallContext, CapabilityProvider, ProviderError, ToolBinding};
use crate::tools::{Arguments, ParamKind, ParameterSpec, ToolDescriptor};
use crate::types::TerminalConfig;

/// Runs `<shell> -c <command>` inside the workspace directory.
#[derive(Debug)]
struct RunCommand {
    config: TerminalConfig,
}

#[async_trait]
impl CapabilityProvider for RunCommand {
    async fn invoke(&self, args: Arguments, ctx: CallContext) -> Result<Value, ProviderError> {
        let command = args.str("command")?;
        if command.trim().is_empty() {
            return Err(ProviderError::permanent("command is required"));
        }

        let workspace = &self.config.workspace;
        tokio::fs::create_dir_all(workspace).await.map_err(|e| {
            ProviderError::permanent(format!("cannot create workspace {}: {}", workspace.display(), e))
        })?;

        let child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // dropping the output future (cancellation) kills the child
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::permanent(format!("failed to spawn {}: {}", self.config.shell, e)))?;

        let output = ctx
            .guard(child.wait_with_output())
            .await?
            .map_err(|e| ProviderError::retryable(format!("failed to collect output: {}", e)))?;

        let exit_code = output.status.code();
        tracing::debug!(?exit_code, "command finished");
        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exit_code": exit_code,
            "success": output.status.success(),
        }))
    }
}

/// Tool bindings for the process executor.
pub fn toolkit(config: TerminalConfig) -> Vec<ToolBinding> {
    vec![ToolBinding::new(
        ToolDescriptor::new(
            "run_command",
            "Run a terminal command inside the workspace directory",
        )
        .param(ParameterSpec::required("command", ParamKind::String, "The shell command to run")),
        Arc::new(RunCommand { config }),
    )]
}
