//! Proxy resolution.
//!
//! Order: explicit override, then the system proxy from the environment
//! (`HTTP_PROXY` / `ALL_PROXY`, minus `NO_PROXY` hosts), then direct.
//! Only plain-text targets (`http`, `ws`) are proxied; requests are sent in
//! absolute form. TLS targets always connect directly since CONNECT tunnelling
//! is not supported. A proxy that cannot be resolved falls back to direct.

use url::Url;

/// Resolve the proxy for `target` using the process environment.
pub fn resolve(target: &Url, explicit: Option<&Url>, use_system_proxy: bool) -> Option<Url> {
    resolve_with(target, explicit, use_system_proxy, |key| std::env::var(key).ok())
}

/// Resolve the proxy for `target`, reading variables through `env`.
pub fn resolve_with<F>(target: &Url, explicit: Option<&Url>, use_system_proxy: bool, env: F) -> Option<Url>
where
    F: Fn(&str) -> Option<String>,
{
    if !matches!(target.scheme(), "http" | "ws") {
        return None;
    }

    if let Some(proxy) = explicit {
        return usable(proxy.clone());
    }

    if !use_system_proxy {
        return None;
    }

    let lookup = |name: &str| {
        env(name)
            .or_else(|| env(&name.to_ascii_lowercase()))
            .filter(|v| !v.trim().is_empty())
    };

    if let (Some(no_proxy), Some(host)) = (lookup("NO_PROXY"), target.host_str()) {
        if bypasses(&no_proxy, host) {
            tracing::trace!(host = %host, "Proxy bypassed by NO_PROXY");
            return None;
        }
    }

    let raw = lookup("HTTP_PROXY").or_else(|| lookup("ALL_PROXY"))?;
    // Bare `host:port` values are common in the environment.
    let with_scheme = if raw.contains("://") { raw.clone() } else { format!("http://{}", raw) };
    match Url::parse(&with_scheme) {
        Ok(proxy) => usable(proxy),
        Err(e) => {
            tracing::warn!(proxy = %raw, error = %e, "Ignoring unparseable system proxy");
            None
        }
    }
}

fn usable(proxy: Url) -> Option<Url> {
    if proxy.host_str().is_none() || proxy.port_or_known_default().is_none() {
        tracing::warn!(proxy = %proxy, "Proxy has no host or port; connecting directly");
        return None;
    }
    Some(proxy)
}

/// True when `host` is covered by a `NO_PROXY` list.
fn bypasses(no_proxy: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    no_proxy.split(',').map(str::trim).filter(|e| !e.is_empty()).any(|entry| {
        if entry == "*" {
            return true;
        }
        let entry = entry.trim_start_matches('.').to_ascii_lowercase();
        host == entry || host.ends_with(&format!(".{}", entry))
    })
}
