//! Scope decisions for hosts.
//!
//! Precedence is fixed: a deny match always excludes, an allow match always
//! includes, and otherwise the host must sit under the root domain (or the
//! filter must admit external hosts).

use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("invalid scope pattern {pattern:?}: {source}")]
    Pattern { pattern: String, source: regex::Error },
}

/// Why a host was admitted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDecision {
    Denied,
    Allowed,
    InScope,
    External,
    OutOfScope,
}

impl ScopeDecision {
    pub fn admits(self) -> bool {
        matches!(self, ScopeDecision::Allowed | ScopeDecision::InScope | ScopeDecision::External)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeDecision::Denied => "denied",
            ScopeDecision::Allowed => "allowed",
            ScopeDecision::InScope => "in-scope",
            ScopeDecision::External => "external",
            ScopeDecision::OutOfScope => "out-of-scope",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScopeFilter {
    root: String,
    allow: Vec<Regex>,
    deny: Vec<Regex>,
    include_external: bool,
}

impl ScopeFilter {
    pub fn new(root: &str) -> Self {
        ScopeFilter { root: normalize_host(root), allow: Vec::new(), deny: Vec::new(), include_external: false }
    }

    pub fn with_allow<I, S>(mut self, patterns: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in patterns {
            self.allow.push(compile_glob(p.as_ref())?);
        }
        Ok(self)
    }

    pub fn with_deny<I, S>(mut self, patterns: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in patterns {
            self.deny.push(compile_glob(p.as_ref())?);
        }
        Ok(self)
    }

    pub fn include_external(mut self, yes: bool) -> Self {
        self.include_external = yes;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Classify a host. Userinfo, port and a trailing dot are ignored.
    pub fn decide(&self, host: &str) -> ScopeDecision {
        let h = normalize_host(host);
        if h.is_empty() {
            return ScopeDecision::OutOfScope;
        }
        if self.deny.iter().any(|re| re.is_match(&h)) {
            return ScopeDecision::Denied;
        }
        if self.allow.iter().any(|re| re.is_match(&h)) {
            return ScopeDecision::Allowed;
        }
        if host_in_root(&h, &self.root) {
            return ScopeDecision::InScope;
        }
        // An allow list acts as the whitelist for hosts outside the root.
        if self.include_external && self.allow.is_empty() {
            return ScopeDecision::External;
        }
        ScopeDecision::OutOfScope
    }

    pub fn admits(&self, host: &str) -> bool {
        self.decide(host).admits()
    }
}

/// True when `host` equals `root` or is a subdomain of it.
pub fn host_in_root(host: &str, root: &str) -> bool {
    if host.is_empty() || root.is_empty() {
        return false;
    }
    host == root || (host.len() > root.len() && host.ends_with(root) && host[..host.len() - root.len()].ends_with('.'))
}

fn normalize_host(raw: &str) -> String {
    let s = raw.trim();
    let s = s.rsplit_once('@').map(|(_, h)| h).unwrap_or(s);
    let s = if let Some(inner) = s.strip_prefix('[') {
        inner.split(']').next().unwrap_or(inner)
    } else if s.matches(':').count() == 1 {
        s.split(':').next().unwrap_or(s)
    } else {
        s
    };
    s.trim_end_matches('.').to_ascii_lowercase()
}

/// Translate a shell-style glob into an anchored case-insensitive regex.
fn compile_glob(glob: &str) -> Result<Regex, ScopeError> {
    let mut re = String::from("^");
    let mut chars = glob.trim().chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == ']' {
                        closed = true;
                        break;
                    }
                    if n == '\\' || n == '[' {
                        class.push('\\');
                    }
                    class.push(n);
                }
                if closed {
                    class.push(']');
                    re.push_str(&class);
                } else {
                    re.push_str(&regex::escape(&class));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    RegexBuilder::new(&re)
        .case_insensitive(true)
        .build()
        .map_err(|source| ScopeError::Pattern { pattern: glob.to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_membership() {
        let f = ScopeFilter::new("example.com");
        assert_eq!(f.decide("api.example.com"), ScopeDecision::InScope);
        assert_eq!(f.decide("Example.COM."), ScopeDecision::InScope);
        assert_eq!(f.decide("example.com.evil.com"), ScopeDecision::OutOfScope);
        assert_eq!(f.decide("badexample.com"), ScopeDecision::OutOfScope);
        assert!(f.admits("user@deep.api.example.com:8443"));
    }

    #[test]
    fn external_hosts_need_the_flag() {
        let f = ScopeFilter::new("example.com").include_external(true);
        assert_eq!(f.decide("cdn.other.net"), ScopeDecision::External);
        assert_eq!(f.decide("www.example.com"), ScopeDecision::InScope);
        assert_eq!(f.decide("cdn.other.net").as_str(), "external");
    }

    #[test]
    fn deny_beats_allow_beats_suffix() {
        let f = ScopeFilter::new("example.com")
            .with_allow(["*.partner.net", "admin.example.com"])
            .unwrap()
            .with_deny(["admin.*", "*.internal.example.com"])
            .unwrap();
        assert_eq!(f.decide("admin.example.com"), ScopeDecision::Denied);
        assert_eq!(f.decide("db.internal.example.com"), ScopeDecision::Denied);
        assert_eq!(f.decide("api.partner.net"), ScopeDecision::Allowed);
        assert_eq!(f.decide("www.example.com"), ScopeDecision::InScope);
        assert_eq!(f.decide("random.org"), ScopeDecision::OutOfScope);
    }

    #[test]
    fn allow_list_limits_external() {
        let f = ScopeFilter::new("example.com").with_allow(["*.partner.net"]).unwrap().include_external(true);
        assert!(f.admits("x.partner.net"));
        assert!(!f.admits("x.other.net"));
    }

    #[test]
    fn glob_classes_and_escaping() {
        let f = ScopeFilter::new("example.com").with_deny(["dev[0-9].example.com", "a+b.example.com"]).unwrap();
        assert!(!f.admits("DEV3.example.com"));
        assert!(f.admits("devx.example.com"));
        assert!(!f.admits("a+b.example.com"));
        assert!(f.admits("aab.example.com"));
    }
}
