//! Reader wrapper that reports how a stream ended.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Why an [`EofSignal`] fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EofCause {
    /// A read returned no bytes into a non-empty buffer.
    Eof,
    /// A read failed.
    Error(io::ErrorKind),
    /// The reader was dropped before reaching either of the above.
    Closed,
}

type Callback = Box<dyn FnOnce(EofCause) + Send>;

/// Passes reads through to `R` and runs a callback the first time the
/// stream ends, fails, or is dropped.
pub struct EofSignal<R> {
    inner: R,
    callback: Option<Callback>,
}

impl<R> EofSignal<R> {
    pub fn new<F>(inner: R, callback: F) -> Self
    where
        F: FnOnce(EofCause) + Send + 'static,
    {
        Self {
            inner,
            callback: Some(Box::new(callback)),
        }
    }

    /// Whether the callback has already run.
    pub fn fired(&self) -> bool {
        self.callback.is_none()
    }

    fn fire(&mut self, cause: EofCause) {
        if let Some(callback) = self.callback.take() {
            callback(cause);
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for EofSignal<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let had_room = buf.remaining() > 0;
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if had_room && buf.filled().len() == before {
                    this.fire(EofCause::Eof);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.fire(EofCause::Error(err.kind()));
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R> Drop for EofSignal<R> {
    fn drop(&mut self) {
        self.fire(EofCause::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio::io::AsyncReadExt;

    fn recorder() -> (Arc<Mutex<Vec<EofCause>>>, impl FnOnce(EofCause) + Send + 'static) {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&causes);
        (causes, move |cause| seen.lock().unwrap().push(cause))
    }

    #[tokio::test]
    async fn fires_once_at_end_of_stream() {
        let (causes, callback) = recorder();
        let mut reader = EofSignal::new(&b"data"[..], callback);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"data");
        assert!(reader.fired());

        drop(reader);
        assert_eq!(*causes.lock().unwrap(), vec![EofCause::Eof]);
    }

    #[tokio::test]
    async fn empty_buffer_read_is_not_eof() {
        let (causes, callback) = recorder();
        let mut reader = EofSignal::new(&b"data"[..], callback);

        assert_eq!(reader.read(&mut []).await.unwrap(), 0);
        assert!(!reader.fired());
        drop(reader);
        assert_eq!(*causes.lock().unwrap(), vec![EofCause::Closed]);
    }

    #[tokio::test]
    async fn reports_read_errors() {
        struct Broken;
        impl AsyncRead for Broken {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
            }
        }

        let (causes, callback) = recorder();
        let mut reader = EofSignal::new(Broken, callback);
        assert!(reader.read(&mut [0u8; 4]).await.is_err());
        drop(reader);
        assert_eq!(
            *causes.lock().unwrap(),
            vec![EofCause::Error(io::ErrorKind::BrokenPipe)]
        );
    }
}
