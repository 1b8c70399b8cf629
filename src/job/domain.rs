//! Wildcard allow-list for the hosts a job may talk to.
//!
//! Patterns come from `security.allowed_domains` (or `VALID_URL_DOMAINS`). `*` matches any run of
//! characters and `?` matches exactly one, so `*.example.com` admits `cdn.example.com` and `*`
//! admits every host. Matching is case-insensitive and runs against the URL host plus an explicit
//! port when one is present (`localhost:9000`).

use regex::RegexSet;
use url::Url;

#[derive(Debug, Clone)]
pub struct DomainMatcher {
    patterns: Vec<String>,
    set: RegexSet,
}

impl DomainMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns: Vec<String> = patterns
            .iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let set = RegexSet::new(patterns.iter().map(|p| wildcard_to_regex(p)))?;

        Ok(Self { patterns, set })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.set.is_match(host)
    }

    pub fn is_url_allowed(&self, url: &Url) -> bool {
        match url_host(url) {
            Some(host) => self.is_host_allowed(&host),
            None => false,
        }
    }
}

/// Host as a browser would print it: `example.com` or `example.com:8443`.
fn url_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_star_allows_everything() {
        let matcher = DomainMatcher::new(&["*"]).unwrap();
        assert!(matcher.is_url_allowed(&url("https://anything.example.org/a.wav")));
        assert!(matcher.is_url_allowed(&url("http://127.0.0.1:9000/a.wav")));
    }

    #[test]
    fn test_subdomain_wildcard() {
        let matcher = DomainMatcher::new(&["*.example.com"]).unwrap();
        assert!(matcher.is_host_allowed("cdn.example.com"));
        assert!(matcher.is_host_allowed("CDN.Example.COM"));
        assert!(!matcher.is_host_allowed("example.com"));
        assert!(!matcher.is_host_allowed("cdn.example.com.evil.net"));
        assert!(!matcher.is_host_allowed("evilexample.org"));
    }

    #[test]
    fn test_dots_are_literal() {
        let matcher = DomainMatcher::new(&["files.example.com"]).unwrap();
        assert!(!matcher.is_host_allowed("filesXexample.com"));
    }

    #[test]
    fn test_explicit_port_is_part_of_host() {
        let matcher = DomainMatcher::new(&["localhost:*"]).unwrap();
        assert!(matcher.is_url_allowed(&url("http://localhost:9000/x")));
        assert!(!matcher.is_url_allowed(&url("http://localhost/x")));
    }

    #[test]
    fn test_any_of_several_patterns() {
        let matcher = DomainMatcher::new(&["a.test", " b.test ", ""]).unwrap();
        assert_eq!(matcher.patterns(), &["a.test".to_string(), "b.test".to_string()]);
        assert!(matcher.is_host_allowed("b.test"));
        assert!(!matcher.is_host_allowed("c.test"));
    }
}
