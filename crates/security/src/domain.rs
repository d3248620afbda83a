//! Domain policy — blocked and preferred web domains.
//!
//! The blocklist is applied twice: the orchestrator appends `-site:`
//! exclusions to outgoing searches, and the browser refuses to fetch a
//! blocked host even if one slips through.

/// Extract the lowercase host from a URL string.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    parsed.host_str().map(|h| h.to_lowercase())
}

/// True if `host` is `domain` or a subdomain of it.
fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches("*.").to_lowercase();
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
}

#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    blocked: Vec<String>,
    preferred: Vec<String>,
}

impl DomainPolicy {
    pub fn new(blocked: Vec<String>, preferred: Vec<String>) -> Self {
        Self { blocked, preferred }
    }

    pub fn blocked(&self) -> &[String] {
        &self.blocked
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.blocked.iter().any(|d| host_matches(&host, d)))
    }

    pub fn is_preferred(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.preferred.iter().any(|d| host_matches(&host, d)))
    }

    /// ` -site:a -site:b ...` for every blocked domain.
    pub fn exclusion_operators(&self) -> String {
        self.blocked
            .iter()
            .map(|d| format!(" -site:{}", d.trim()))
            .collect()
    }

    /// Append exclusion operators to a search query, once.
    pub fn apply_to_query(&self, query: &str) -> String {
        let ops = self.exclusion_operators();
        if ops.is_empty() || query.ends_with(&ops) {
            return query.to_string();
        }
        format!("{}{}", query.trim_end(), ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DomainPolicy {
        DomainPolicy::new(
            vec!["csdn.net".into(), "zhihu.com".into()],
            vec!["arxiv.org".into()],
        )
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://Blog.CSDN.net/a/b?c=1").as_deref(), Some("blog.csdn.net"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn subdomains_are_blocked() {
        let p = policy();
        assert!(p.is_blocked("https://blog.csdn.net/article/1"));
        assert!(p.is_blocked("https://zhihu.com/question/2"));
        assert!(!p.is_blocked("https://notcsdn.net/"));
        assert!(!p.is_blocked("https://arxiv.org/abs/1706.03762"));
    }

    #[test]
    fn preferred_domains() {
        assert!(policy().is_preferred("https://export.arxiv.org/abs/1"));
    }

    #[test]
    fn query_gets_exclusions_once() {
        let p = policy();
        let q = p.apply_to_query("transformer attention");
        assert_eq!(q, "transformer attention -site:csdn.net -site:zhihu.com");
        assert_eq!(p.apply_to_query(&q), q);
    }

    #[test]
    fn empty_blocklist_leaves_query_untouched() {
        assert_eq!(DomainPolicy::default().apply_to_query("rust"), "rust");
    }
}
