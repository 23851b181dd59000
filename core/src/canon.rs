//! Canonical URL keys.
//!
//! Every producer and consumer of enrichment data goes through [`canonicalize`]
//! so that cache lookups hit regardless of the surface form a tool emitted.

use std::collections::BTreeSet;

/// Extensions treated as static assets by the matchers.
pub const STATIC_EXT: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf", "otf", "eot", "css",
    "js", "map", "mp4", "webm", "mov", "avi", "mp3", "wav", "flac",
];

/// A URL split into the parts the pipeline cares about.
///
/// `scheme` is `None` for bare hosts (`example.com/path`). The port is only kept
/// when it differs from the scheme default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: Option<String>,
    pub userinfo: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
}

impl ParsedUrl {
    /// The canonical key for this URL.
    pub fn key(&self) -> String {
        let mut out = String::with_capacity(self.host.len() + self.path.len() + 16);
        if let Some(s) = &self.scheme {
            out.push_str(s);
            out.push_str("://");
        }
        if let Some(u) = &self.userinfo {
            out.push_str(u);
            out.push('@');
        }
        out.push_str(&self.host);
        if let Some(p) = self.port {
            out.push(':');
            out.push_str(&p.to_string());
        }
        out.push_str(&self.path);
        if let Some(q) = &self.query {
            out.push('?');
            out.push_str(q);
        }
        out
    }

    /// Host without IPv6 brackets, suitable for scope checks and DNS.
    pub fn bare_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn is_bare(&self) -> bool {
        self.scheme.is_none()
    }

    /// Lowercased extension of the last path segment, if any.
    pub fn extension(&self) -> Option<String> {
        extension(&self.path)
    }

    pub fn query_keys(&self) -> BTreeSet<String> {
        self.query.as_deref().map(query_keys).unwrap_or_default()
    }
}

/// Canonicalize a raw URL or bare host. Never fails: input that does not parse
/// comes back trimmed with its fragment removed.
pub fn canonicalize(raw: &str) -> String {
    match parse_url(raw) {
        Some(p) => p.key(),
        None => strip_fragment(raw.trim()).trim().to_string(),
    }
}

/// Parse a raw URL or bare host into its canonical parts.
pub fn parse_url(raw: &str) -> Option<ParsedUrl> {
    let s = strip_fragment(raw.trim()).trim();
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return None;
    }

    // A `://` after the first `/` or `?` belongs to the path or query.
    let sep = s.find("://").filter(|&i| !s[..i].contains(|c: char| c == '/' || c == '?'));
    let (scheme, rest) = match sep {
        Some(i) if valid_scheme(&s[..i]) => (Some(s[..i].to_ascii_lowercase()), &s[i + 3..]),
        Some(_) => return None,
        None => (None, s.strip_prefix("//").unwrap_or(s)),
    };

    let auth_end = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(auth_end);
    let (path_raw, query_raw) = match tail.find('?') {
        Some(i) => (&tail[..i], Some(&tail[i + 1..])),
        None => (tail, None),
    };

    let (userinfo, hostport) = match authority.rfind('@') {
        Some(_) if scheme.is_none() => return None,
        Some(i) => (Some(authority[..i].to_string()), &authority[i + 1..]),
        None => (None, authority),
    };
    let (host, port) = split_host_port(hostport)?;
    let port = port.filter(|p| Some(*p) != scheme.as_deref().and_then(default_port));

    let query = query_raw.filter(|q| !q.is_empty()).map(str::to_string);
    let path = if scheme.is_none() && path_raw.is_empty() && query.is_none() {
        String::new()
    } else {
        normalize_path(path_raw)
    };

    Some(ParsedUrl { scheme, userinfo, host, port, path, query })
}

/// Collapse repeated separators and ensure a leading one. Case and
/// percent-encoding are left alone.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Lowercased extension of the last segment of `path`.
pub fn extension(path: &str) -> Option<String> {
    let seg = path.rsplit('/').next()?;
    let (stem, ext) = seg.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Lowercased parameter names of a query string.
pub fn query_keys(query: &str) -> BTreeSet<String> {
    query
        .split('&')
        .filter_map(|kv| {
            let k = kv.split('=').next().unwrap_or("").trim();
            (!k.is_empty()).then(|| k.to_ascii_lowercase())
        })
        .collect()
}

pub fn is_static_asset(path: &str) -> bool {
    extension(path).map(|e| STATIC_EXT.contains(&e.as_str())).unwrap_or(false)
}

pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

fn strip_fragment(s: &str) -> &str {
    s.split_once('#').map(|(a, _)| a).unwrap_or(s)
}

fn valid_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_host_port(hostport: &str) -> Option<(String, Option<u16>)> {
    let (host, port) = if let Some(inner) = hostport.strip_prefix('[') {
        let close = inner.find(']')?;
        let after = &inner[close + 1..];
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':')?),
        };
        (format!("[{}]", inner[..close].to_ascii_lowercase()), port)
    } else {
        match hostport.rsplit_once(':') {
            Some((h, p)) => (h.to_ascii_lowercase(), Some(p)),
            None => (hostport.to_ascii_lowercase(), None),
        }
    };
    let host = host.strip_suffix('.').map(str::to_string).unwrap_or(host);
    if host.is_empty() || host == "[]" || !host.chars().all(valid_host_char) {
        return None;
    }
    let port = match port {
        None | Some("") => None,
        Some(p) if p.chars().all(|c| c.is_ascii_digit()) => Some(p.parse::<u16>().ok()?),
        Some(_) => return None,
    };
    Some((host, port))
}

fn valid_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '*' | '[' | ']' | ':' | '%')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host_but_not_path() {
        assert_eq!(canonicalize("HTTP://Example.COM/Admin/Login"), "http://example.com/Admin/Login");
    }

    #[test]
    fn default_port_and_fragment_collapse() {
        let a = canonicalize("http://example.com:80/a?x=1#top");
        let b = canonicalize("http://example.com/a?x=1");
        assert_eq!(a, b);
        assert_eq!(canonicalize("https://example.com:443/"), canonicalize("https://example.com/#frag"));
        assert_eq!(canonicalize("https://example.com:8443/"), "https://example.com:8443/");
        assert_eq!(canonicalize("http://example.com:443/"), "http://example.com:443/");
    }

    #[test]
    fn end_to_end_admin_login() {
        let p = parse_url("http://Example.com:80/Admin/login#x").unwrap();
        assert_eq!(p.scheme.as_deref(), Some("http"));
        assert_eq!(p.host, "example.com");
        assert_eq!(p.port, None);
        assert_eq!(p.path, "/Admin/login");
        assert_eq!(p.key(), "http://example.com/Admin/login");
    }

    #[test]
    fn collapses_separators_and_adds_root() {
        assert_eq!(canonicalize("https://example.com//a///b/"), "https://example.com/a/b/");
        assert_eq!(canonicalize("https://example.com"), "https://example.com/");
        assert_eq!(canonicalize("https://example.com?q=1"), "https://example.com/?q=1");
    }

    #[test]
    fn keeps_query_case_and_encoding() {
        assert_eq!(
            canonicalize("https://example.com/Search?Q=A%20B&x=Y"),
            "https://example.com/Search?Q=A%20B&x=Y"
        );
        assert_eq!(canonicalize("https://example.com/a?"), "https://example.com/a");
    }

    #[test]
    fn bare_hosts() {
        assert_eq!(canonicalize("  API.Example.com. "), "api.example.com");
        assert_eq!(canonicalize("api.example.com//v1//users"), "api.example.com/v1/users");
        assert_eq!(canonicalize("//cdn.example.com/x.js"), "cdn.example.com/x.js");
        assert!(parse_url("api.example.com").unwrap().is_bare());
    }

    #[test]
    fn embedded_url_in_query_is_not_a_scheme() {
        assert_eq!(canonicalize("Example.COM/redirect?to=https://x.io"), "example.com/redirect?to=https://x.io");
        let p = parse_url("Example.COM//go?next=http://evil.test/").unwrap();
        assert!(p.is_bare());
        assert_eq!(p.host, "example.com");
        assert_eq!(p.query.as_deref(), Some("next=http://evil.test/"));
        assert_eq!(
            canonicalize("HTTPS://Example.COM/r?u=https://x.io"),
            "https://example.com/r?u=https://x.io"
        );
    }

    #[test]
    fn ipv6_literals_keep_brackets() {
        assert_eq!(canonicalize("http://[::1]:80/x"), "http://[::1]/x");
        assert_eq!(canonicalize("https://[FE80::1]:8443"), "https://[fe80::1]:8443/");
        assert_eq!(parse_url("http://[::1]/").unwrap().bare_host(), "::1");
    }

    #[test]
    fn malformed_input_is_best_effort() {
        assert_eq!(canonicalize("not a url#frag"), "not a url");
        assert_eq!(canonicalize("http://example.com:99999/"), "http://example.com:99999/");
        assert!(parse_url("").is_none());
        assert!(parse_url("http:///nohost").is_none());
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let samples = [
            "HTTP://Example.com:80/Admin/login#x",
            "https://a.b.c:443//x//y?z=1#f",
            "example.com.",
            "weird input  #x",
            "https://user:pw@Example.com:8080/a",
            "http://[::1]:8080",
            "",
            "ftp://Files.example.com/pub//",
        ];
        for s in samples {
            let once = canonicalize(s);
            assert_eq!(canonicalize(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn helpers() {
        assert_eq!(extension("/backup/site.TAR"), Some("tar".into()));
        assert_eq!(extension("/.git/"), None);
        assert_eq!(extension("/.env"), None);
        assert!(is_static_asset("/static/app.min.js"));
        assert!(!is_static_asset("/api/users"));
        let keys = query_keys("Redirect_URI=x&code=&state");
        assert!(keys.contains("redirect_uri") && keys.contains("code") && keys.contains("state"));
    }
}
