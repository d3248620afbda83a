//! Web browser tool — search and page extraction.
//!
//! `search` queries an HTML search endpoint, drops blocked domains and
//! ranks preferred domains first. `browse` fetches a page and strips it to
//! readable text. Blocked hosts are refused even if a search lets one
//! through.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Params, Tool};
use kestrel_security::DomainPolicy;
use regex_lite::Regex;
use tracing::{debug, warn};

const TOOL_NAME: &str = "web_browser";
const MAX_RESULTS: usize = 5;
/// Lines shorter than this are navigation noise.
const MIN_LINE_CHARS: usize = 20;
const MAX_PAGE_LINES: usize = 100;
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) kestrel/0.1";

static RE_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).expect("anchor pattern is valid")
});

static RE_NOISE_BLOCK: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "nav", "footer", "header", "aside", "noscript"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}>")).expect("block pattern is valid")
        })
        .collect()
});

static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub preferred: bool,
}

pub struct WebBrowserTool {
    client: reqwest::Client,
    policy: DomainPolicy,
    search_url: String,
}

impl WebBrowserTool {
    pub fn new(policy: DomainPolicy, search_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(45))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            policy,
            search_url: search_url.into(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failure(format!("request to {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(failure(format!("{url} answered {}", response.status())));
        }
        response
            .text()
            .await
            .map_err(|e| failure(format!("reading {url} failed: {e}")))
    }

    async fn search(&self, query: &str) -> Result<String, ToolError> {
        debug!(query = %query, "Web search");
        let url = format!("{}?q={}", self.search_url, urlencoding::encode(query));
        let html = self.fetch(&url).await?;
        let hits = rank_hits(extract_hits(&html), &self.policy);
        Ok(render_hits(&hits))
    }

    async fn browse(&self, url: &str) -> Result<String, ToolError> {
        if self.policy.is_blocked(url) {
            return Err(ToolError::PermissionDenied {
                tool_name: TOOL_NAME.into(),
                reason: format!("{url} is on a blocked domain"),
            });
        }
        debug!(url = %url, "Fetching page");
        let html = self.fetch(url).await?;
        Ok(format!("Page content from {url}:\n\n{}", page_text(&html)))
    }
}

fn failure(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: TOOL_NAME.into(),
        reason,
    }
}

fn param<'a>(params: &'a Params, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| params.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve search-engine redirect links (`/l/?uddg=<target>`) to their target.
fn resolve_link(href: &str) -> Option<String> {
    let href = href.replace("&amp;", "&");
    if let Some(pos) = href.find("uddg=") {
        let encoded = href[pos + 5..].split('&').next().unwrap_or_default();
        return urlencoding::decode(encoded).ok().map(|s| s.into_owned());
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href);
    }
    None
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Every external link on a result page, deduplicated in page order.
pub fn extract_hits(html: &str) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    RE_ANCHOR
        .captures_iter(html)
        .filter_map(|caps| {
            let url = resolve_link(caps.get(1)?.as_str())?;
            let title = decode_entities(RE_TAG.replace_all(caps.get(2)?.as_str(), "").trim());
            (!title.is_empty() && seen.insert(url.clone())).then_some(SearchHit {
                title,
                url,
                preferred: false,
            })
        })
        .collect()
}

/// Drop blocked hits, mark preferred ones and move them to the front.
pub fn rank_hits(hits: Vec<SearchHit>, policy: &DomainPolicy) -> Vec<SearchHit> {
    let mut ranked: Vec<SearchHit> = hits
        .into_iter()
        .filter(|h| !policy.is_blocked(&h.url))
        .map(|mut h| {
            h.preferred = policy.is_preferred(&h.url);
            h
        })
        .collect();
    // stable: page order survives within each group
    ranked.sort_by_key(|h| !h.preferred);
    ranked.truncate(MAX_RESULTS);
    ranked
}

fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results passed the domain filter. Try different keywords.".into();
    }
    let mut out = String::from("Search results (filtered):\n");
    for (i, hit) in hits.iter().enumerate() {
        let tag = if hit.preferred { "[preferred] " } else { "" };
        out.push_str(&format!("{}. {}{}\n   {}\n", i + 1, tag, hit.title, hit.url));
    }
    out
}

/// Readable text of an HTML page: noise blocks and tags removed, short
/// lines dropped, capped at a fixed line count.
pub fn page_text(html: &str) -> String {
    let mut text = html.to_string();
    for re in RE_NOISE_BLOCK.iter() {
        text = re.replace_all(&text, "\n").into_owned();
    }
    let text = decode_entities(&RE_TAG.replace_all(&text, "\n"));
    text.lines()
        .map(str::trim)
        .filter(|l| l.chars().count() > MIN_LINE_CHARS)
        .take(MAX_PAGE_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for WebBrowserTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web or read a page. action=\"search\" with `query`, or action=\"browse\" with `url`. Results from reputable technical sources are listed first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["search", "browse"]
                },
                "query": {
                    "type": "string",
                    "description": "Search keywords (search)"
                },
                "url": {
                    "type": "string",
                    "description": "Absolute page URL (browse)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Params) -> Result<String, ToolError> {
        let action = param(&params, &["action"]);
        let query = param(&params, &["query", "Query", "q"]);
        let url = param(&params, &["url", "URL", "link"]);

        match (action, query, url) {
            (Some("search"), Some(q), _) | (None, Some(q), _) => self.search(q).await,
            (Some("browse"), _, Some(u)) | (None, None, Some(u)) => self.browse(u).await,
            (Some("search"), None, _) => Err(ToolError::InvalidArguments(
                "search requires a `query` parameter".into(),
            )),
            (Some("browse"), _, None) => Err(ToolError::InvalidArguments(
                "browse requires a `url` parameter".into(),
            )),
            (Some(other), _, _) => Err(ToolError::InvalidArguments(format!(
                "unsupported action `{other}`; use search or browse"
            ))),
            (None, None, None) => Err(ToolError::InvalidArguments(
                "provide `query` to search or `url` to browse".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DomainPolicy {
        DomainPolicy::new(
            vec!["csdn.net".into(), "zhihu.com".into()],
            vec!["arxiv.org".into(), "github.com".into()],
        )
    }

    const RESULTS: &str = r#"
        <div><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fblog.csdn.net%2Fpost&amp;rut=1">Blocked &amp; noisy</a></div>
        <div><a class="result__a" href="https://example.com/intro">Intro to <b>transformers</b></a></div>
        <div><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Farxiv.org%2Fabs%2F1706.03762">Attention Is All You Need</a></div>
        <div><a href="https://example.com/intro">duplicate</a></div>
        <div><a href="/settings">Settings</a></div>
    "#;

    #[test]
    fn extracts_and_resolves_links() {
        let hits = extract_hits(RESULTS);
        let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://blog.csdn.net/post",
                "https://example.com/intro",
                "https://arxiv.org/abs/1706.03762"
            ]
        );
        assert_eq!(hits[1].title, "Intro to transformers");
        assert_eq!(hits[0].title, "Blocked & noisy");
    }

    #[test]
    fn ranking_filters_blocked_and_prefers_allowlisted() {
        let ranked = rank_hits(extract_hits(RESULTS), &policy());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].url, "https://arxiv.org/abs/1706.03762");
        assert!(ranked[0].preferred);
        assert!(!ranked[1].preferred);
        assert!(render_hits(&ranked).contains("1. [preferred] Attention"));
    }

    #[test]
    fn ranking_caps_results() {
        let hits = (0..9)
            .map(|i| SearchHit {
                title: format!("hit {i}"),
                url: format!("https://example.com/{i}"),
                preferred: false,
            })
            .collect();
        assert_eq!(rank_hits(hits, &policy()).len(), MAX_RESULTS);
    }

    #[test]
    fn page_text_strips_noise() {
        let html = r#"<html><head><style>body { color: red; }</style></head>
            <body><nav>Home | About | A very long navigation line here</nav>
            <p>Transformers replace recurrence with self-attention layers.</p>
            <script>var tracking = "a very long tracking script line";</script>
            <p>short</p></body></html>"#;
        let text = page_text(html);
        assert_eq!(text, "Transformers replace recurrence with self-attention layers.");
    }

    #[tokio::test]
    async fn browse_refuses_blocked_domain() {
        let tool = WebBrowserTool::new(policy(), "http://127.0.0.1:1/html");
        let mut params = Params::new();
        params.insert("action".into(), "browse".into());
        params.insert("url".into(), "https://www.zhihu.com/question/1".into());
        let err = tool.execute(params).await.unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn missing_parameters_are_invalid() {
        let tool = WebBrowserTool::new(policy(), "http://127.0.0.1:1/html");
        let mut params = Params::new();
        params.insert("action".into(), "search".into());
        assert!(matches!(
            tool.execute(params).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            tool.execute(Params::new()).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
