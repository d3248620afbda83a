//! Code runner — write scripts into the workspace and run them in a
//! separate interpreter process.
//!
//! Writes and executions are confined to the workspace directory. Every
//! run is bounded by a timeout; the child is killed when it expires.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Params, Tool};
use kestrel_security::resolve_within;
use tokio::process::Command;
use tracing::{debug, warn};

const TOOL_NAME: &str = "code_runner";
/// Scratch file used when code arrives without an action.
const SCRATCH_FILE: &str = "scratch.py";

pub struct CodeRunnerTool {
    workspace: PathBuf,
    interpreter: String,
    timeout: Duration,
}

impl CodeRunnerTool {
    pub fn new(workspace: impl Into<PathBuf>, interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            workspace: workspace.into(),
            interpreter: interpreter.into(),
            timeout,
        }
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: reason.into(),
        }
    }

    async fn resolve(&self, file: &str) -> Result<PathBuf, ToolError> {
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| Self::failed(format!("cannot create workspace: {e}")))?;
        resolve_within(&self.workspace, file).map_err(|e| ToolError::PermissionDenied {
            tool_name: TOOL_NAME.into(),
            reason: e.to_string(),
        })
    }

    async fn write(&self, file: &str, content: &str) -> Result<String, ToolError> {
        let path = self.resolve(file).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::failed(e.to_string()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Self::failed(format!("writing '{file}' failed: {e}")))?;
        debug!(file = %file, bytes = content.len(), "Script written");
        Ok(format!("Saved {} bytes to {file}", content.len()))
    }

    async fn run(&self, file: &str) -> Result<String, ToolError> {
        let path = self.resolve(file).await?;
        if !path.is_file() {
            return Err(Self::failed(format!(
                "'{file}' does not exist; write it first"
            )));
        }

        let child = Command::new(&self.interpreter)
            .arg(&path)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Self::failed(format!("cannot start {}: {e}", self.interpreter)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| Self::failed(e.to_string()))?,
            Err(_) => {
                warn!(file = %file, timeout_secs = self.timeout.as_secs(), "Script timed out");
                return Err(ToolError::Timeout {
                    tool_name: TOOL_NAME.into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let mut report = String::new();
        if !stdout.is_empty() {
            report.push_str(&format!("[stdout]\n{stdout}\n"));
        }
        if !stderr.is_empty() {
            report.push_str(&format!("[stderr]\n{stderr}\n"));
        }

        if output.status.success() {
            if report.is_empty() {
                report.push_str("Finished with no output.");
            }
            Ok(report.trim_end().to_string())
        } else {
            let code = output.status.code().unwrap_or(-1);
            Err(Self::failed(format!("exit code {code}\n{}", report.trim_end())))
        }
    }
}

#[async_trait]
impl Tool for CodeRunnerTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Write a script into the sandbox workspace (action=\"write\" with `file_path` and `content`) or run one (action=\"execute\" with `file_path`). Runs are killed after a timeout."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["write", "execute"] },
                "file_path": {
                    "type": "string",
                    "description": "Path relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Script source (write)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Params) -> Result<String, ToolError> {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| params.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string)
        };
        let action = get(&["action"]);
        let file = get(&["file_path", "file", "filename"]);
        let content = get(&["content", "code", "code_lines"]);

        match (action.as_deref(), file, content) {
            (Some("write"), Some(f), Some(c)) => self.write(&f, &c).await,
            (Some("write"), _, _) => Err(ToolError::InvalidArguments(
                "write requires `file_path` and `content`".into(),
            )),
            (Some("execute" | "run"), Some(f), _) => self.run(&f).await,
            (Some("execute" | "run"), None, _) => Err(ToolError::InvalidArguments(
                "execute requires `file_path`".into(),
            )),
            (_, file, Some(c)) => {
                let f = file.unwrap_or_else(|| SCRATCH_FILE.into());
                self.write(&f, &c).await?;
                self.run(&f).await
            }
            (_, _, None) => Err(ToolError::InvalidArguments(
                "unsupported action or missing `content`".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect()
    }

    fn runner(dir: &tempfile::TempDir, timeout_secs: u64) -> CodeRunnerTool {
        CodeRunnerTool::new(dir.path().join("ws"), "sh", Duration::from_secs(timeout_secs))
    }

    #[tokio::test]
    async fn write_then_execute() {
        let dir = tempfile::tempdir().unwrap();
        let tool = runner(&dir, 5);
        tool.execute(params(&[
            ("action", "write"),
            ("file", "jobs/hello.sh"),
            ("code", "echo hello from the sandbox"),
        ]))
        .await
        .unwrap();
        assert!(dir.path().join("ws/jobs/hello.sh").is_file());

        let out = tool
            .execute(params(&[("action", "execute"), ("file_path", "jobs/hello.sh")]))
            .await
            .unwrap();
        assert!(out.contains("hello from the sandbox"));
    }

    #[tokio::test]
    async fn content_without_action_runs_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner(&dir, 5)
            .execute(params(&[("content", "echo 42")]))
            .await
            .unwrap();
        assert!(out.contains("42"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(&dir, 5)
            .execute(params(&[("content", "echo boom >&2; exit 3")]))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("exit code 3"));
        assert!(text.contains("boom"));
    }

    #[tokio::test]
    async fn escaping_workspace_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(&dir, 5)
            .execute(params(&[
                ("action", "write"),
                ("file_path", "../escape.sh"),
                ("content", "echo no"),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert!(!dir.path().join("escape.sh").exists());
    }

    #[tokio::test]
    async fn runaway_script_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(&dir, 1)
            .execute(params(&[("content", "sleep 10")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn execute_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(&dir, 5)
            .execute(params(&[("action", "execute"), ("file_path", "nope.sh")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
