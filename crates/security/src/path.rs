//! Path validation — filesystem sandboxing to a root directory.
//!
//! Tools receive paths from generated text. Every such path is resolved
//! relative to a fixed root and must stay inside it after symlinks and
//! relative components are resolved.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is empty")]
    Empty { path: String },

    #[error("Path '{path}' is outside {root}")]
    OutsideRoot { path: String, root: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Resolve `requested` against `root` and verify it stays inside it.
///
/// Checks:
/// 1. No `..` components in the raw input
/// 2. Absolute inputs are accepted only if they already point inside `root`
/// 3. The deepest existing ancestor is canonicalized so symlinks cannot escape
///
/// The target itself need not exist (writes create it). Returns the resolved
/// path on success.
pub fn resolve_within(root: &Path, requested: &str) -> Result<PathBuf, PathValidationError> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(PathValidationError::Empty { path: requested.into() });
    }

    let normalized = trimmed.replace('\\', "/");
    let input = Path::new(&normalized);
    if input.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PathValidationError::PathTraversal { path: requested.into() });
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|e| PathValidationError::CanonicalizeFailed {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        canonical_root.join(input)
    };

    // Canonicalize the deepest ancestor that exists, then re-append the rest.
    let mut existing = joined.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|e| PathValidationError::CanonicalizeFailed {
            path: requested.into(),
            reason: e.to_string(),
        })?;
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }

    if !resolved.starts_with(&canonical_root) {
        return Err(PathValidationError::OutsideRoot {
            path: requested.into(),
            root: canonical_root.display().to_string(),
        });
    }

    Ok(resolved)
}
