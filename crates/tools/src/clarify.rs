//! Clarification pseudo-tool.
//!
//! Registered so the manifest advertises it; the orchestrator intercepts
//! calls by name and surfaces the reason to the user instead of dispatching.

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{CLARIFY_TOOL, Params, Tool};

pub struct ClarifyTool;

#[async_trait]
impl Tool for ClarifyTool {
    fn name(&self) -> &str {
        CLARIFY_TOOL
    }

    fn description(&self) -> &str {
        "Ask the user for missing information. Call this whenever a URL, file name, keyword or other parameter of another tool is uncertain instead of guessing it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "What is unclear, or which context is missing"
                }
            },
            "required": ["reason"]
        })
    }

    async fn execute(&self, params: Params) -> Result<String, ToolError> {
        let reason = params
            .get("reason")
            .and_then(|v| v.as_str())
            .filter(|r| !r.trim().is_empty())
            .unwrap_or("The next step is unclear.");
        Ok(format!("Clarification requested: {reason}"))
    }
}
