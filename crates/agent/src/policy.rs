//! Policies applied to every tool call before it reaches the registry.
//!
//! Search-style parameters get the domain exclusion operators appended.
//! Calls carrying a locator already in the [`VisitedSet`] are answered with
//! an `AlreadyVisited` failure instead of being dispatched; a successful
//! call records its locator.

use std::sync::Arc;

use kestrel_core::tool::{FailureKind, ToolCall, ToolRegistry, ToolResult};
use kestrel_memory::VisitedSet;
use kestrel_security::DomainPolicy;
use serde_json::Value;
use tracing::{debug, warn};

const SEARCH_KEYS: &[&str] = &["query", "q", "search", "keywords"];
const LOCATOR_KEYS: &[&str] = &["url", "link", "href", "locator"];

pub struct DispatchPolicy {
    domains: DomainPolicy,
    visited: Arc<VisitedSet>,
}

impl DispatchPolicy {
    pub fn new(domains: DomainPolicy, visited: Arc<VisitedSet>) -> Self {
        Self { domains, visited }
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    /// Append domain exclusions to every search-style string parameter.
    pub fn prepare(&self, call: &mut ToolCall) {
        for key in SEARCH_KEYS {
            if let Some(Value::String(query)) = call.params.get_mut(*key) {
                *query = self.domains.apply_to_query(query);
            }
        }
    }

    /// Dispatch `call` through `registry` under both policies.
    pub async fn dispatch(&self, registry: &ToolRegistry, mut call: ToolCall) -> ToolResult {
        self.prepare(&mut call);

        let locator = locator_of(&call);
        if let Some(loc) = &locator
            && self.visited.contains(loc)
        {
            warn!(tool = %call.name, locator = %loc, "Locator already visited, not dispatching");
            return ToolResult::failed(
                &call.name,
                FailureKind::AlreadyVisited,
                format!("{loc} was already visited; choose a different source"),
            );
        }

        let result = registry.execute(&call).await;

        if result.is_success()
            && let Some(loc) = locator
        {
            match self.visited.insert(&loc) {
                Ok(_) => debug!(locator = %loc, "Locator recorded"),
                Err(e) => warn!(error = %e, "Failed to persist visited locator"),
            }
        }
        result
    }
}

/// The external locator a call targets: a locator-named parameter, or any
/// string parameter holding an http(s) URL.
pub fn locator_of(call: &ToolCall) -> Option<String> {
    if let Some(loc) = call.str_param(LOCATOR_KEYS) {
        return Some(loc.trim().to_string());
    }
    call.params.values().find_map(|v| {
        v.as_str()
            .map(str::trim)
            .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{params, CountingTool};

    fn policy() -> DispatchPolicy {
        DispatchPolicy::new(
            DomainPolicy::new(vec!["csdn.net".into()], vec![]),
            Arc::new(VisitedSet::in_memory()),
        )
    }

    #[test]
    fn search_parameters_get_exclusions() {
        let policy = policy();
        let mut call = ToolCall::new("web_browser", params(&[("query", "tokio runtime")]));
        policy.prepare(&mut call);
        let query = call.str_param(&["query"]).unwrap();
        assert!(query.starts_with("tokio runtime"));
        assert!(query.contains("-site:csdn.net"));
    }

    #[test]
    fn locator_detection() {
        let named = ToolCall::new("t", params(&[("url", " https://a.org/x ")]));
        assert_eq!(locator_of(&named).as_deref(), Some("https://a.org/x"));
        let by_value = ToolCall::new("t", params(&[("target", "http://b.org")]));
        assert_eq!(locator_of(&by_value).as_deref(), Some("http://b.org"));
        let none = ToolCall::new("t", params(&[("query", "rust")]));
        assert!(locator_of(&none).is_none());
    }

    #[tokio::test]
    async fn visited_locator_is_never_dispatched_twice() {
        let policy = policy();
        let tool = CountingTool::new("web_browser");
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone());

        let call = ToolCall::new("web_browser", params(&[("url", "https://arxiv.org/abs/1")]));
        let first = policy.dispatch(&registry, call.clone()).await;
        assert!(first.is_success());

        let second = policy.dispatch(&registry, call).await;
        assert_eq!(second.failure, Some(FailureKind::AlreadyVisited));
        assert_eq!(tool.calls(), 1);
        assert!(policy.visited().contains("https://arxiv.org/abs/1"));
    }

    #[tokio::test]
    async fn failed_fetch_is_not_recorded() {
        let policy = policy();
        let tool = CountingTool::failing("web_browser");
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone());

        let call = ToolCall::new("web_browser", params(&[("url", "https://arxiv.org/abs/2")]));
        assert!(!policy.dispatch(&registry, call.clone()).await.is_success());
        assert!(!policy.dispatch(&registry, call).await.is_success());
        assert_eq!(tool.calls(), 2);
        assert!(policy.visited().is_empty());
    }
}
