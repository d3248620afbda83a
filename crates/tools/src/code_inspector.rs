//! Code inspector — read-only introspection of the project tree.
//!
//! Two actions: `structure` lists the tree down to a bounded depth, `read`
//! returns one file's source. Every path is fenced to the project root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Params, Tool};
use kestrel_security::resolve_within;

const TOOL_NAME: &str = "code_inspector";
pub const DEFAULT_MAX_DEPTH: usize = 2;
/// Reads beyond this many characters are truncated.
pub const MAX_READ_CHARS: usize = 10_000;

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "models",
    "data",
    "logs",
    ".idea",
    ".vscode",
];

const LISTED_EXTENSIONS: &[&str] = &["rs", "toml", "md", "json", "txt", "yaml", "yml", "py"];

pub struct CodeInspectorTool {
    root: PathBuf,
}

impl CodeInspectorTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn sorted_entries(dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else {
                files.push(path);
            }
        }
    }
    dirs.sort();
    files.sort();
    (dirs, files)
}

fn walk(dir: &Path, level: usize, max_depth: usize, out: &mut Vec<String>) {
    if level >= max_depth {
        return;
    }
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".into());
    out.push(format!("{}{}/", "  ".repeat(level), name));

    let (dirs, files) = sorted_entries(dir);
    for file in files {
        let listed = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| LISTED_EXTENSIONS.contains(&e));
        if listed {
            if let Some(name) = file.file_name() {
                out.push(format!("{}{}", "  ".repeat(level + 1), name.to_string_lossy()));
            }
        }
    }
    for sub in dirs {
        let excluded = sub
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| EXCLUDED_DIRS.contains(&n));
        if !excluded {
            walk(&sub, level + 1, max_depth, out);
        }
    }
}

/// Indented listing of `root` down to `max_depth` directory levels.
pub fn project_structure(root: &Path, max_depth: usize) -> String {
    let mut out = Vec::new();
    walk(root, 0, max_depth.max(1), &mut out);
    out.join("\n")
}

fn truncate_chars(content: &str, limit: usize) -> String {
    match content.char_indices().nth(limit) {
        Some((cut, _)) => format!(
            "{}\n... (truncated after {limit} characters)",
            &content[..cut]
        ),
        None => content.to_string(),
    }
}

impl CodeInspectorTool {
    async fn read(&self, filename: &str) -> Result<String, ToolError> {
        let path = resolve_within(&self.root, filename).map_err(|e| ToolError::PermissionDenied {
            tool_name: TOOL_NAME.into(),
            reason: e.to_string(),
        })?;
        if !path.is_file() {
            return Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("file '{filename}' not found"),
            });
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("reading '{filename}' failed: {e}"),
            })?;
        Ok(truncate_chars(&String::from_utf8_lossy(&bytes), MAX_READ_CHARS))
    }
}

#[async_trait]
impl Tool for CodeInspectorTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Inspect this project's own source. action=\"structure\" lists the file tree (optional `max_depth`), action=\"read\" returns a file given its relative `filename`."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["structure", "read"] },
                "filename": {
                    "type": "string",
                    "description": "Path relative to the project root (read)"
                },
                "max_depth": {
                    "type": "integer",
                    "description": "Directory depth to list (structure)",
                    "default": DEFAULT_MAX_DEPTH
                }
            }
        })
    }

    async fn execute(&self, params: Params) -> Result<String, ToolError> {
        let action = params.get("action").and_then(|v| v.as_str());
        let filename = ["filename", "file", "path"]
            .iter()
            .find_map(|k| params.get(*k).and_then(|v| v.as_str()));

        match (action, filename) {
            (Some("read"), Some(f)) | (None, Some(f)) => self.read(f).await,
            (Some("read"), None) => Err(ToolError::InvalidArguments(
                "read requires a `filename` parameter".into(),
            )),
            (Some("structure"), _) | (None, None) => {
                let depth = params
                    .get("max_depth")
                    .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
                    .map_or(DEFAULT_MAX_DEPTH, |d| d as usize);
                let root = self.root.clone();
                tokio::task::spawn_blocking(move || project_structure(&root, depth))
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        tool_name: TOOL_NAME.into(),
                        reason: e.to_string(),
                    })
            }
            (Some(other), _) => Err(ToolError::InvalidArguments(format!(
                "unsupported action `{other}`; use structure or read"
            ))),
        }
    }
}
