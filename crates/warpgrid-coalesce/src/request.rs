use http::{Method, Uri};

use crate::error::{CoalesceError, CoalesceResult};
use crate::header::HeaderMap;

/// Identity of an outbound request: what the cache key is derived from and
/// what the request executor is asked to perform.
///
/// Cheap to clone; the executor receives a clone per fetch and every
/// coalesced response carries one back as its originating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }

    /// Parse a method and URI string.
    pub fn parse(method: &str, uri: &str) -> CoalesceResult<Self> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| CoalesceError::InvalidUri(format!("{method}: {e}")))?;
        let uri = uri
            .parse::<Uri>()
            .map_err(|e| CoalesceError::InvalidUri(format!("{uri}: {e}")))?;
        Ok(Self::new(method, uri))
    }

    /// A `GET` for `uri`.
    pub fn get(uri: &str) -> CoalesceResult<Self> {
        Self::parse("GET", uri)
    }

    /// Builder method: append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_parses_uri() {
        let req = Request::get("http://example.com/users?page=1").unwrap();
        assert_eq!(*req.method(), Method::GET);
        assert_eq!(req.uri().host(), Some("example.com"));
        assert_eq!(req.uri().query(), Some("page=1"));
        assert!(req.headers().is_empty());
    }

    #[test]
    fn parse_accepts_custom_methods() {
        let req = Request::parse("PURGE", "/cache/entry").unwrap();
        assert_eq!(req.method().as_str(), "PURGE");
        assert_eq!(req.uri().path(), "/cache/entry");
    }

    #[test]
    fn parse_rejects_invalid_uri() {
        let err = Request::get("http://exa mple.com").unwrap_err();
        assert!(matches!(err, CoalesceError::InvalidUri(_)));
    }

    #[test]
    fn with_header_appends() {
        let req = Request::get("/")
            .unwrap()
            .with_header("Accept", "*/*")
            .with_header("Accept", "text/plain");
        assert_eq!(req.headers().get_all("accept"), vec!["*/*", "text/plain"]);
    }
}
