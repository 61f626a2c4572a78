//! WarpGrid request coalescing.
//!
//! Collapses concurrent identical outbound requests into a single call to
//! an injected [`RequestExecutor`], and hands every caller its own
//! [`Response`] whose body is an independent fork of the one fetched body
//! (see [`warpgrid_fanout`]).
//!
//! Coalescing is scoped to overlap: an entry exists only while some caller
//! is waiting on it. Responses can also be pushed in from outside with
//! [`CoalescingClient::receive_push`], satisfying waiting and future
//! callers without a fetch.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warpgrid_coalesce::{
//!     Body, ClientConfig, CoalescingClient, ExecuteFuture, HeaderMap, Request, RequestExecutor,
//!     Response,
//! };
//!
//! struct Static;
//!
//! impl RequestExecutor for Static {
//!     fn execute<'a>(&'a self, _request: &'a Request) -> ExecuteFuture<'a> {
//!         Box::pin(async { Ok(Response::new(200, HeaderMap::new(), Body::from_bytes("hi"))) })
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
//! let client = CoalescingClient::new(Arc::new(Static), ClientConfig::default());
//! let resp = client.send(Request::get("http://example.com/").unwrap()).await.unwrap();
//! assert_eq!(&resp.into_bytes().await.unwrap()[..], b"hi");
//! # });
//! ```

pub mod body;
pub mod client;
mod config;
mod error;
mod header;
pub mod item;
mod key;
pub mod registry;
mod request;
mod response;

pub use body::{Body, BoxedReader, DEFAULT_CHUNK_SIZE};
pub use client::{ClientStats, CoalescingClient, ExecuteFuture, RequestExecutor};
pub use config::ClientConfig;
pub use error::{CoalesceError, CoalesceResult};
pub use header::{Header, HeaderMap};
pub use item::{CacheItem, CacheItemWaiter};
pub use key::{CacheKey, KeyFn, default_cache_key, normalize_uri};
pub use registry::CacheRegistry;
pub use request::Request;
pub use response::Response;
pub use warpgrid_fanout::{ByteStream, FanoutConfig, StreamError};
