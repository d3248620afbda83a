//! Tool trait and registry — the dispatch protocol for agent capabilities.
//!
//! Tools are registered once and looked up by name. Execution never raises:
//! every outcome, including unknown names and panics inside a tool, comes
//! back as a [`ToolResult`] with a typed [`FailureKind`].

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::ui::{UiConstructor, UiDescriptor, UiManifest};

/// The reserved clarification pseudo-tool. Handled by the orchestrator.
pub const CLARIFY_TOOL: &str = "clarify";

/// Parameter mapping for a tool call.
pub type Params = serde_json::Map<String, Value>;

/// Whether a registered entry is callable by the model or only a UI extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Tool,
    UiExtension,
}

/// Immutable description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub kind: ToolKind,
    #[serde(default)]
    pub is_primary_ui: bool,
}

/// A request to execute a tool, as extracted from generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// First string value under any of `keys`.
    pub fn str_param(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.params.get(*k).and_then(Value::as_str))
    }
}

/// Why a tool call did not produce a usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    InvalidArguments,
    ExecutionFailed,
    PolicyViolation,
    AlreadyVisited,
    Timeout,
    Panicked,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::UnknownTool => "unknown tool",
            FailureKind::InvalidArguments => "invalid arguments",
            FailureKind::ExecutionFailed => "execution failed",
            FailureKind::PolicyViolation => "policy violation",
            FailureKind::AlreadyVisited => "already visited",
            FailureKind::Timeout => "timeout",
            FailureKind::Panicked => "tool crashed",
        }
    }
}

impl From<&ToolError> for FailureKind {
    fn from(err: &ToolError) -> Self {
        match err {
            ToolError::NotFound(_) => FailureKind::UnknownTool,
            ToolError::ExecutionFailed { .. } => FailureKind::ExecutionFailed,
            ToolError::Timeout { .. } => FailureKind::Timeout,
            ToolError::PermissionDenied { .. } => FailureKind::PolicyViolation,
            ToolError::InvalidArguments(_) => FailureKind::InvalidArguments,
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The tool this result is for
    pub tool: String,

    /// Output text on success, failure detail otherwise
    pub output: String,

    /// `None` on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ToolResult {
    pub fn ok(tool: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            output: output.into(),
            failure: None,
        }
    }

    pub fn failed(tool: impl Into<String>, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            output: detail.into(),
            failure: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// One-line rendering suitable for feeding back to the model.
    pub fn describe(&self) -> String {
        match self.failure {
            None => self.output.clone(),
            Some(kind) => format!("Error ({}) in `{}`: {}", kind.label(), self.tool, self.output),
        }
    }
}

/// The core Tool trait.
///
/// Each capability (web browsing, code inspection, sandboxed execution, ...)
/// implements this trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_browser").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    fn kind(&self) -> ToolKind {
        ToolKind::Tool
    }

    fn is_primary_ui(&self) -> bool {
        false
    }

    /// Panel constructor for UI extensions.
    fn ui_constructor(&self) -> Option<UiConstructor> {
        None
    }

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: Params) -> std::result::Result<String, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            kind: self.kind(),
            is_primary_ui: self.is_primary_ui(),
        }
    }
}

/// A registry of available tools, ordered by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Replaced previously registered tool");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Bullet manifest of every callable tool for the system prompt.
    pub fn describe_all(&self) -> String {
        let mut out = String::new();
        for tool in self.tools.values().filter(|t| t.kind() == ToolKind::Tool) {
            let schema = serde_json::to_string(&tool.parameters_schema())
                .unwrap_or_else(|_| "{}".into());
            out.push_str(&format!(
                "- `{}`: {}\n  parameters: {}\n  If any parameter value is uncertain, do not invent it; call `{}` with a `reason` instead.\n",
                tool.name(),
                tool.description(),
                schema,
                CLARIFY_TOOL,
            ));
        }
        out
    }

    /// Execute a tool call. Never fails; failures are reported in the result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::failed(
                &call.name,
                FailureKind::UnknownTool,
                format!(
                    "no tool named `{}` is registered; available tools: {}",
                    call.name,
                    self.names().join(", ")
                ),
            );
        };
        if tool.kind() == ToolKind::UiExtension {
            return ToolResult::failed(
                &call.name,
                FailureKind::UnknownTool,
                format!("`{}` is a UI extension and cannot be called", call.name),
            );
        }

        debug!(tool = %call.name, "Executing tool");
        match AssertUnwindSafe(tool.execute(call.params.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => ToolResult::ok(&call.name, output),
            Ok(Err(e)) => ToolResult::failed(&call.name, FailureKind::from(&e), e.to_string()),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                warn!(tool = %call.name, detail = %detail, "Tool panicked");
                ToolResult::failed(&call.name, FailureKind::Panicked, detail)
            }
        }
    }

    /// `(primary, secondaries)` UI descriptors for the front-end.
    pub fn ui_manifest(&self) -> UiManifest {
        let mut primary = None;
        let mut secondaries = Vec::new();
        for tool in self.tools.values() {
            if tool.kind() != ToolKind::UiExtension {
                continue;
            }
            let Some(constructor) = tool.ui_constructor() else {
                continue;
            };
            let descriptor = UiDescriptor {
                name: tool.name().to_string(),
                constructor,
            };
            if tool.is_primary_ui() && primary.is_none() {
                primary = Some(descriptor);
            } else {
                secondaries.push(descriptor);
            }
        }
        (primary, secondaries)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
