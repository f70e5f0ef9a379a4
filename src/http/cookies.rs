//! Cookie jar shared by every request of a client.
//!
//! Parses a practical subset of `Set-Cookie` (RFC 6265): `Domain`, `Path`,
//! `Secure`, `HttpOnly`, `Expires` (kept, not enforced) and `Max-Age <= 0`
//! (deletes the cookie). Cookies are bucketed by domain and matched with the
//! usual host-suffix and path-prefix rules. A `Domain` that does not cover the
//! responding host rejects the cookie. There is no eviction.

use dashmap::DashMap;
use url::Url;

use crate::http::headers::HeaderSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie has no name=value pair: {0:?}")]
    MissingPair(String),
    #[error("cookie name is empty")]
    EmptyName,
    #[error("request url has no host")]
    NoHost,
    #[error("cookie domain {domain:?} does not cover host {host:?}")]
    ForeignDomain { domain: String, host: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Domain the cookie applies to, without a leading dot.
    pub domain: String,
    /// True when the cookie came with an explicit `Domain` and covers subdomains.
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub expires: Option<String>,
    /// `Max-Age <= 0` asks for removal.
    pub expired: bool,
}

impl Cookie {
    /// Parse one `Set-Cookie` value received from `url`.
    pub fn parse(header: &str, url: &Url) -> Result<Self, CookieError> {
        let host = url.host_str().ok_or(CookieError::NoHost)?.to_ascii_lowercase();
        let mut parts = header.split(';');
        let pair = parts.next().unwrap_or("");
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| CookieError::MissingPair(header.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CookieError::EmptyName);
        }

        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            domain: host.clone(),
            include_subdomains: false,
            path: default_path(url),
            secure: false,
            http_only: false,
            expires: None,
            expired: false,
        };

        for attribute in parts {
            let attribute = attribute.trim();
            let (key, val) = match attribute.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attribute, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "domain" if !val.is_empty() => {
                    cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                    cookie.include_subdomains = true;
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => cookie.expires = Some(val.to_string()),
                "max-age" => {
                    if val.parse::<i64>().map(|age| age <= 0).unwrap_or(false) {
                        cookie.expired = true;
                    }
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }

        if !domain_matches(&host, &cookie.domain) {
            return Err(CookieError::ForeignDomain {
                domain: cookie.domain,
                host,
            });
        }

        Ok(cookie)
    }

    fn matches(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return false,
        };
        let domain_ok = host == self.domain || (self.include_subdomains && domain_matches(&host, &self.domain));
        let path = url.path();
        let path_ok = path == self.path
            || (path.starts_with(&self.path)
                && (self.path.ends_with('/') || path[self.path.len()..].starts_with('/')));
        let scheme_ok = !self.secure || matches!(url.scheme(), "https" | "wss");
        domain_ok && path_ok && scheme_ok
    }
}

/// True when `host` is `domain` or one of its subdomains.
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.strip_suffix(domain).is_some_and(|prefix| prefix.ends_with('.'))
}

/// Directory of the request path, per RFC 6265 section 5.1.4.
fn default_path(url: &Url) -> String {
    match url.path().rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_string(),
        _ => "/".to_string(),
    }
}

/// Concurrent cookie store keyed by domain.
#[derive(Debug, Default)]
pub struct CookieJar {
    entries: DashMap<String, Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cookie (same domain, path and name), or delete it when expired.
    pub fn insert(&self, cookie: Cookie) {
        let mut bucket = self.entries.entry(cookie.domain.clone()).or_default();
        bucket.retain(|c| !(c.name == cookie.name && c.path == cookie.path));
        if !cookie.expired {
            bucket.push(cookie);
        }
    }

    /// Store every `Set-Cookie` header of a response from `url`.
    ///
    /// Malformed or rejected cookies are skipped and returned so the caller can log them;
    /// they never fail the request.
    pub fn store_response_cookies(&self, url: &Url, headers: &HeaderSet) -> Vec<CookieError> {
        let mut errors = Vec::new();
        for header in headers.get_all("Set-Cookie") {
            match Cookie::parse(header, url) {
                Ok(cookie) => self.insert(cookie),
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    /// `Cookie` header value for a request to `url`, if any cookie matches.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let mut matched: Vec<Cookie> = self
            .entries
            .iter()
            .flat_map(|bucket| bucket.value().iter().filter(|c| c.matches(url)).cloned().collect::<Vec<_>>())
            .collect();
        if matched.is_empty() {
            return None;
        }
        // Longer paths first.
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matched
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|bucket| bucket.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
