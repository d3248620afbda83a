//! External command plugins — tools described by manifest files.
//!
//! Each `*.tool.json` file in the module directory describes one tool:
//!
//! ```json
//! {
//!   "name": "arxiv_lookup",
//!   "description": "Fetch an arXiv abstract by id",
//!   "parameters": { "type": "object", "properties": { "id": { "type": "string" } } },
//!   "command": "./arxiv_lookup.py",
//!   "args": [],
//!   "timeout_secs": 30
//! }
//! ```
//!
//! The command receives the call parameters as one JSON object on stdin and
//! answers on stdout. A non-zero exit status is a tool failure carrying
//! stderr. Discovery happens here, at startup; the registry only ever sees
//! [`Tool`] values.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Params, Tool};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Parsed `*.tool.json` manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandToolManifest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,

    /// Program to run. Relative paths containing a separator resolve
    /// against the manifest's directory.
    pub command: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn default_timeout() -> u64 {
    30
}

pub struct CommandTool {
    manifest: CommandToolManifest,
}

impl CommandTool {
    pub fn new(manifest: CommandToolManifest) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &CommandToolManifest {
        &self.manifest
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.manifest.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.manifest.parameters.clone()
    }

    async fn execute(&self, params: Params) -> Result<String, ToolError> {
        let input = serde_json::to_vec(&params)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        debug!(tool = %self.manifest.name, command = %self.manifest.command.display(), "Running plugin");
        let mut child = Command::new(&self.manifest.command)
            .args(&self.manifest.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(format!("cannot start plugin: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // a plugin that ignores its input may exit before reading it
            if let Err(e) = stdin.write_all(&input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(self.failed(format!("writing parameters failed: {e}")));
                }
            }
        }

        let timeout = Duration::from_secs(self.manifest.timeout_secs);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: self.manifest.name.clone(),
                timeout_secs: self.manifest.timeout_secs,
            })?
            .map_err(|e| self.failed(e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(self.failed(format!("exit code {code}: {}", stderr.trim())))
        }
    }
}

/// Load every `*.tool.json` manifest in `dir`. Unreadable or invalid
/// manifests are logged and skipped; a missing directory yields nothing.
pub fn load_command_tools_from_dir(dir: &Path) -> Vec<CommandTool> {
    let mut tools = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "No plugin directory");
            return tools;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".tool.json"))
        })
        .collect();
    paths.sort();

    for path in paths {
        match load_manifest(&path) {
            Ok(manifest) => {
                info!(name = %manifest.name, "Loaded plugin tool");
                tools.push(CommandTool::new(manifest));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load plugin tool"),
        }
    }

    tools
}

fn load_manifest(path: &Path) -> Result<CommandToolManifest, ToolError> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolError::ExecutionFailed {
        tool_name: "plugin".into(),
        reason: format!("Failed to read manifest: {e}"),
    })?;

    let mut manifest: CommandToolManifest = serde_json::from_str(&content)
        .map_err(|e| ToolError::InvalidArguments(format!("Invalid tool manifest: {e}")))?;

    if manifest.name.trim().is_empty() {
        return Err(ToolError::InvalidArguments("manifest has an empty name".into()));
    }

    let has_separator = manifest.command.components().count() > 1;
    if manifest.command.is_relative() && has_separator {
        if let Some(dir) = path.parent() {
            manifest.command = dir.join(&manifest.command);
        }
    }

    Ok(manifest)
}
