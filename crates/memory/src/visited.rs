//! Visited-resource set — persisted footprint of fetched locators.
//!
//! Append-only. A locator in this set is never dispatched to its tool
//! again; the dispatch policy short-circuits instead.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::persist::{self, PersistError};

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    seen: HashSet<String>,
}

pub struct VisitedSet {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

/// Canonical form used for membership: trimmed, fragment dropped, no
/// trailing slash.
pub fn normalize_locator(locator: &str) -> String {
    let trimmed = locator.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    without_fragment.trim_end_matches('/').to_string()
}

impl VisitedSet {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Load the visited list at `path`; a missing or corrupted file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let order: Vec<String> = match persist::read_json(&path) {
            Ok(list) => list.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Visited list unreadable, starting empty");
                Vec::new()
            }
        };
        let mut inner = Inner::default();
        for locator in order {
            let key = normalize_locator(&locator);
            if inner.seen.insert(key.clone()) {
                inner.order.push(key);
            }
        }
        debug!(path = %path.display(), count = inner.order.len(), "Visited set loaded");
        Self {
            path: Some(path),
            inner: Mutex::new(inner),
        }
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seen
            .contains(&normalize_locator(locator))
    }

    /// Record a locator. Returns `false` if it was already present.
    pub fn insert(&self, locator: &str) -> Result<bool, PersistError> {
        let key = normalize_locator(locator);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.seen.insert(key.clone()) {
            return Ok(false);
        }
        inner.order.push(key);
        if let Some(path) = &self.path {
            persist::write_json_atomic(path, &inner.order)?;
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize_locator(" https://arxiv.org/abs/1/#intro "), "https://arxiv.org/abs/1");
    }

    #[test]
    fn insert_is_idempotent() {
        let set = VisitedSet::in_memory();
        assert!(set.insert("https://example.org/a").unwrap());
        assert!(!set.insert("https://example.org/a/").unwrap());
        assert!(set.contains("https://example.org/a#top"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visited.json");
        {
            let set = VisitedSet::open(&path);
            set.insert("https://docs.rs/petgraph").unwrap();
            set.insert("https://docs.rs/tokio").unwrap();
        }
        let set = VisitedSet::open(&path);
        assert_eq!(set.len(), 2);
        assert!(set.contains("https://docs.rs/tokio"));
    }

    #[test]
    fn corrupted_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visited.json");
        std::fs::write(&path, "[\"unterminated").unwrap();
        assert!(VisitedSet::open(&path).is_empty());
    }
}
