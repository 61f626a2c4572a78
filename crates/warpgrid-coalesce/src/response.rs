use bytes::Bytes;
use tracing::debug;
use warpgrid_fanout::{ByteStream, FanoutConfig, StreamError};

use crate::body::{Body, SharedBody};
use crate::header::HeaderMap;
use crate::request::Request;

/// A response as produced by a request executor or delivered by push.
///
/// Responses handed out by the coalescing client always carry a
/// [`Body::Fork`]: every caller reads and closes its own copy while the
/// underlying body was fetched once.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    request: Option<Request>,
    body: Body,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: Body) -> Self {
        Self {
            status,
            headers,
            request: None,
            body,
        }
    }

    pub fn empty(status: u16, headers: HeaderMap) -> Self {
        Self::new(status, headers, Body::Empty)
    }

    /// Builder method: record the request this response answers. Pushed
    /// responses need it to find their cache entry.
    pub fn with_request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Consume the response and collect the body into a single buffer.
    pub async fn into_bytes(self) -> Result<Bytes, StreamError> {
        let mut body = self.body;
        body.read_to_end().await
    }

    /// Consume the response into a stream of body chunks.
    pub fn into_body_stream(self) -> ByteStream {
        self.body.into_stream()
    }

    /// Replicate the body so the response can be handed to many callers.
    pub(crate) fn into_shared(self, config: &FanoutConfig) -> SharedResponse {
        let status = self.status;
        let body = self.body.into_shared(config).map(|body| {
            body.with_drained_callback(move |bytes, cause| {
                debug!(status, bytes = bytes.len(), %cause, "replicated body drained");
            })
        });
        SharedResponse {
            status,
            headers: self.headers,
            request: self.request,
            body,
        }
    }
}

/// The resolved form of a response held by a cache item.
pub(crate) struct SharedResponse {
    status: u16,
    headers: HeaderMap,
    request: Option<Request>,
    body: Option<SharedBody>,
}

impl SharedResponse {
    /// A caller's own copy: metadata deep-copied, body a fresh fork.
    pub(crate) fn fork(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            request: self.request.clone(),
            body: self
                .body
                .as_ref()
                .map(|body| Body::Fork(body.fork()))
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(body: Body) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "text/plain");
        Response::new(200, headers, body).with_request(Request::get("http://example.com/").unwrap())
    }

    #[tokio::test]
    async fn buffered_response_into_bytes() {
        let resp = sample(Body::from_bytes("hello world"));
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.into_bytes().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn empty_response_into_bytes() {
        let resp = Response::empty(204, HeaderMap::new());
        assert!(resp.body().is_empty());
        assert!(resp.into_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forks_are_independent_copies() {
        let shared = sample(Body::from_bytes("payload")).into_shared(&FanoutConfig::default());
        let mut first = shared.fork();
        let second = shared.fork();
        first.headers_mut().set("Content-Type", "application/json");

        assert_eq!(second.headers().get("content-type"), Some("text/plain"));
        assert_eq!(second.request().unwrap().uri().host(), Some("example.com"));
        assert!(first.body().is_replicated());

        // Closing one copy early does not disturb the other.
        drop(first);
        assert_eq!(second.into_bytes().await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn empty_body_stays_empty_when_shared() {
        let shared = Response::empty(404, HeaderMap::new()).into_shared(&FanoutConfig::default());
        let copy = shared.fork();
        assert_eq!(copy.status(), 404);
        assert!(copy.body().is_empty());
    }
}
