//! Cache key derivation.

use std::sync::Arc;

use http::Uri;

use crate::request::Request;

pub type CacheKey = String;

/// Pluggable request → key function.
pub type KeyFn = Arc<dyn Fn(&Request) -> CacheKey + Send + Sync>;

/// Method followed by the normalized URI, e.g. `GEThttp://example.com/a?b=1`.
pub fn default_cache_key(request: &Request) -> CacheKey {
    let mut key = request.method().as_str().to_string();
    key.push_str(&normalize_uri(request.uri()));
    key
}

/// Lowercase scheme and host, drop default-empty paths to `/`, keep the
/// query verbatim. Relative URIs keep only path and query.
pub fn normalize_uri(uri: &Uri) -> String {
    let path = match uri.path() {
        "" => "/",
        p => p,
    };
    let mut out = String::new();
    if let Some(scheme) = uri.scheme_str() {
        out.push_str(&scheme.to_ascii_lowercase());
        out.push_str("://");
    }
    if let Some(authority) = uri.authority() {
        out.push_str(&authority.host().to_ascii_lowercase());
        if let Some(port) = authority.port_u16() {
            out.push(':');
            out.push_str(&port.to_string());
        }
    }
    out.push_str(path);
    if let Some(query) = uri.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

pub(crate) fn default_key_fn() -> KeyFn {
    Arc::new(default_cache_key)
}
