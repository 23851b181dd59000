//! Structural matchers that refine a rule's pattern.

use reconkit_core::canon::{canonicalize, parse_url};
use regex::Regex;
use std::collections::BTreeSet;

/// The parts of a URL the matchers look at, computed once per URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFacts {
    /// Canonical key; what rule patterns are tested against.
    pub key: String,
    pub host: String,
    pub path: String,
    pub query_keys: BTreeSet<String>,
    pub extension: Option<String>,
    /// False when the line did not parse as a URL. Such lines match nothing.
    pub parsed: bool,
}

impl UrlFacts {
    pub fn from_line(raw: &str) -> Self {
        match parse_url(raw) {
            Some(p) => UrlFacts {
                key: p.key(),
                host: p.bare_host().to_string(),
                extension: p.extension(),
                query_keys: p.query_keys(),
                path: p.path,
                parsed: true,
            },
            None => UrlFacts {
                key: canonicalize(raw),
                host: String::new(),
                path: String::new(),
                query_keys: BTreeSet::new(),
                extension: None,
                parsed: false,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Matcher {
    /// Host starts with any of the prefixes.
    HostPrefix(Vec<String>),
    HostPattern(Regex),
    PathPattern(Regex),
    /// Query carries at least one of the keys.
    QueryKeys(BTreeSet<String>),
    /// Last path segment has one of the extensions.
    Extensions(BTreeSet<String>),
    /// Every inner matcher must match. Empty matches everything.
    All(Vec<Matcher>),
}

impl Matcher {
    pub fn matches(&self, f: &UrlFacts) -> bool {
        match self {
            Matcher::HostPrefix(prefixes) => prefixes.iter().any(|p| f.host.starts_with(p.as_str())),
            Matcher::HostPattern(re) => re.is_match(&f.host),
            Matcher::PathPattern(re) => re.is_match(&f.path),
            Matcher::QueryKeys(keys) => keys.iter().any(|k| f.query_keys.contains(k)),
            Matcher::Extensions(exts) => f.extension.as_ref().map(|e| exts.contains(e)).unwrap_or(false),
            Matcher::All(ms) => ms.iter().all(|m| m.matches(f)),
        }
    }

    /// Collapse a list into one matcher, or `None` when empty.
    pub fn all(mut ms: Vec<Matcher>) -> Option<Matcher> {
        match ms.len() {
            0 => None,
            1 => ms.pop(),
            _ => Some(Matcher::All(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn facts_from_lines() {
        let f = UrlFacts::from_line("HTTPS://Dev.Example.com/a/b.PHP?Id=1&x");
        assert!(f.parsed);
        assert_eq!(f.host, "dev.example.com");
        assert_eq!(f.path, "/a/b.PHP");
        assert_eq!(f.extension.as_deref(), Some("php"));
        assert_eq!(f.query_keys, set(&["id", "x"]));

        let bad = UrlFacts::from_line("http://exa mple.com/#frag");
        assert!(!bad.parsed);
        assert_eq!(bad.key, "http://exa mple.com/");
    }

    #[test]
    fn combinators() {
        let f = UrlFacts::from_line("https://dev-api.example.com/backup.sql?token=1");
        let m = Matcher::all(vec![
            Matcher::HostPrefix(vec!["dev".into(), "staging".into()]),
            Matcher::Extensions(set(&["sql", "zip"])),
            Matcher::QueryKeys(set(&["token"])),
            Matcher::PathPattern(Regex::new("(?i)^/backup").unwrap()),
        ])
        .unwrap();
        assert!(m.matches(&f));

        let g = UrlFacts::from_line("https://www.example.com/backup.sql");
        assert!(!m.matches(&g));
        assert!(Matcher::HostPattern(Regex::new("^www\\.").unwrap()).matches(&g));
        assert!(Matcher::All(vec![]).matches(&g));
        assert!(Matcher::all(vec![]).is_none());
    }
}
