//! Response bodies and their replicated form.
//!
//! A freshly fetched body is a single-pass reader. Before a response is
//! handed to more than one caller its body is moved behind a
//! [`StreamMultiplexer`] and every caller gets its own [`StreamFork`], so
//! the fetch happens once while each caller reads (and closes) its copy
//! independently.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use warpgrid_fanout::{ByteStream, FanoutConfig, StreamError, StreamFork, StreamMultiplexer};

/// Default chunk size when turning a body into a stream (64 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A boxed single-pass body reader.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// The body of a [`Response`](crate::Response).
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    /// A single-pass reader, as produced by a request executor.
    Reader(BoxedReader),
    /// One independent copy of a replicated body.
    Fork(StreamFork),
}

impl Body {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Body::Reader(Box::new(reader))
    }

    /// A body that yields `bytes` once.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Body::Empty;
        }
        Body::from_reader(std::io::Cursor::new(bytes))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Whether this body is already a fork of a multiplexed stream.
    pub fn is_replicated(&self) -> bool {
        matches!(self, Body::Fork(_))
    }

    /// Read the next bytes. `Ok(0)` means end of body.
    pub async fn read(&mut self, dest: &mut [u8]) -> Result<usize, StreamError> {
        match self {
            Body::Empty => Ok(0),
            Body::Reader(reader) => Ok(reader.read(dest).await?),
            Body::Fork(fork) => fork.read(dest).await,
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes, StreamError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Reader(reader) => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).await?;
                Ok(Bytes::from(out))
            }
            Body::Fork(fork) => fork.read_to_end().await,
        }
    }

    /// Consume the body as a stream of chunks.
    pub fn into_stream(self) -> ByteStream {
        match self {
            Body::Empty => Box::pin(EmptyStream),
            Body::Reader(reader) => Box::pin(ReaderStream::new(reader, DEFAULT_CHUNK_SIZE)),
            Body::Fork(fork) => fork.into_stream(),
        }
    }

    /// Move the body behind a multiplexer so it can be forked. A body that
    /// is already a fork is kept as is.
    pub(crate) fn into_shared(self, config: &FanoutConfig) -> Option<SharedBody> {
        match self {
            Body::Empty => None,
            Body::Reader(reader) => Some(SharedBody::Multiplexed(StreamMultiplexer::with_config(
                reader, config,
            ))),
            Body::Fork(fork) => Some(SharedBody::Forked(fork)),
        }
    }
}

impl From<StreamFork> for Body {
    fn from(fork: StreamFork) -> Self {
        Body::Fork(fork)
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Reader(_) => f.write_str("Body::Reader(..)"),
            Body::Fork(fork) => f.debug_tuple("Body::Fork").field(fork).finish(),
        }
    }
}

/// A replicated body held by a resolved cache item.
pub(crate) enum SharedBody {
    Multiplexed(StreamMultiplexer),
    Forked(StreamFork),
}

impl SharedBody {
    pub(crate) fn with_drained_callback<F>(self, callback: F) -> Self
    where
        F: FnOnce(Bytes, &warpgrid_fanout::Termination) + Send + 'static,
    {
        match self {
            SharedBody::Multiplexed(mux) => {
                SharedBody::Multiplexed(mux.with_drained_callback(callback))
            }
            forked => forked,
        }
    }

    /// A fresh, independently readable copy starting at the beginning.
    pub(crate) fn fork(&self) -> StreamFork {
        match self {
            SharedBody::Multiplexed(mux) => mux.fork(),
            SharedBody::Forked(fork) => fork.fork(),
        }
    }
}

// ── Minimal stream helpers ──────────────────────────────────────────

struct EmptyStream;

impl Stream for EmptyStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(None)
    }
}

/// Yields a reader's bytes in chunks of at most `chunk_size`, ending after
/// end of stream or the first error.
struct ReaderStream {
    reader: Option<BoxedReader>,
    chunk_size: usize,
}

impl ReaderStream {
    fn new(reader: BoxedReader, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be > 0");
        Self {
            reader: Some(reader),
            chunk_size,
        }
    }
}

impl Stream for ReaderStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(None);
        };
        let mut chunk = vec![0u8; this.chunk_size];
        let mut buf = ReadBuf::new(&mut chunk);
        let polled = Pin::new(reader).poll_read(cx, &mut buf);
        let n = buf.filled().len();
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) if n == 0 => {
                this.reader = None;
                Poll::Ready(None)
            }
            Poll::Ready(Ok(())) => {
                chunk.truncate(n);
                Poll::Ready(Some(Ok(Bytes::from(chunk))))
            }
            Poll::Ready(Err(err)) => {
                this.reader = None;
                Poll::Ready(Some(Err(err.into())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn bytes_body_reads_once() {
        let mut body = Body::from_bytes("hello");
        assert_eq!(body.read_to_end().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(body.read(&mut [0u8; 4]).await.unwrap(), 0);
    }

    #[test]
    fn empty_bytes_make_an_empty_body() {
        assert!(Body::from_bytes(Bytes::new()).is_empty());
        assert!(Body::default().is_empty());
    }

    #[tokio::test]
    async fn reader_stream_chunks_in_order() {
        let data: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        let stream = ReaderStream::new(Box::new(std::io::Cursor::new(data.clone())), 1024);
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 952);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn empty_body_stream_ends_immediately() {
        let mut stream = Body::Empty.into_stream();
        assert!(stream.next().await.is_none());
    }

    #[test]
    #[should_panic(expected = "chunk_size must be > 0")]
    fn reader_stream_zero_chunk_size_panics() {
        let _ = ReaderStream::new(Box::new(tokio::io::empty()), 0);
    }

    #[tokio::test]
    async fn shared_body_forks_read_the_full_body() {
        let shared = Body::from_bytes("replicated")
            .into_shared(&FanoutConfig::default())
            .unwrap();
        let mut a = Body::from(shared.fork());
        let mut b = Body::from(shared.fork());
        assert!(a.is_replicated());

        assert_eq!(a.read_to_end().await.unwrap(), Bytes::from_static(b"replicated"));
        assert_eq!(b.read_to_end().await.unwrap(), Bytes::from_static(b"replicated"));
    }

    #[tokio::test]
    async fn already_forked_body_is_not_rewrapped() {
        let mux = StreamMultiplexer::new(std::io::Cursor::new(b"abc".to_vec()));
        let shared = Body::from(mux.fork())
            .into_shared(&FanoutConfig::default())
            .unwrap();
        assert!(matches!(shared, SharedBody::Forked(_)));

        let mut copy = shared.fork();
        assert_eq!(copy.read_to_end().await.unwrap(), Bytes::from_static(b"abc"));
        // The underlying multiplexer sees the same history.
        assert_eq!(mux.buffered_len(), 3);
    }
}
