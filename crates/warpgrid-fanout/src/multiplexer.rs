//! Many independent readers over one non-repeatable upstream reader.
//!
//! # Pull protocol
//!
//! Every byte read from the upstream is appended to a [`SharedBuffer`] and
//! each [`StreamFork`] reads through its own cursor. Readers serve already
//! buffered bytes without coordination. When a fork runs dry it races
//! three events:
//!
//! - its own close signal (end of stream for that fork),
//! - the pull token, a `tokio::sync::Mutex` that owns the upstream reader
//!   (the holder performs exactly one upstream read, appends, then wakes
//!   everybody),
//! - a wake from the broadcaster after some other fork pulled.
//!
//! So at most one upstream read is in flight, any fork that is actively
//! reading makes progress, and forks that never read never hold anybody
//! up.
//!
//! # Termination
//!
//! The terminal state is write-once. The first setter closes the
//! broadcaster (waking every blocked fork), drops the upstream reader and
//! runs the drained callback. Closing the last live fork forces
//! [`Termination::Cancelled`] so the upstream is released even when
//! nobody reads to the end.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, watch};
use tracing::{debug, trace};

use crate::ByteStream;
use crate::broadcast::{Broadcaster, Subscription};
use crate::buffer::{BufferCursor, SharedBuffer};
use crate::config::FanoutConfig;
use crate::error::{StreamError, Termination};

/// A boxed upstream reader.
pub type Upstream = Box<dyn AsyncRead + Send + Unpin>;

/// Invoked once with the full buffered history when the stream terminates.
pub type DrainedCallback = Box<dyn FnOnce(Bytes, &Termination) + Send>;

/// Owned by whoever holds the pull token.
struct PullToken {
    upstream: Option<Upstream>,
    staging: Vec<u8>,
}

struct Shared {
    buffer: SharedBuffer,
    broadcaster: Broadcaster,
    terminal: OnceLock<Termination>,
    token: Mutex<PullToken>,
    live_forks: AtomicUsize,
    on_drained: StdMutex<Option<DrainedCallback>>,
    /// Staging buffer size, also used for whole-fork reads.
    chunk_size: usize,
}

impl Shared {
    fn fork(self: &Arc<Self>) -> StreamFork {
        self.live_forks.fetch_add(1, Ordering::AcqRel);
        let (close_tx, closed_rx) = watch::channel(false);
        StreamFork {
            state: Arc::new(ForkState {
                shared: Arc::clone(self),
                closed: AtomicBool::new(false),
                close_tx,
            }),
            cursor: self.buffer.fork(),
            wake: self.broadcaster.register(),
            closed_rx,
        }
    }

    /// Set the terminal state. Only the first caller runs teardown.
    fn terminate(&self, termination: Termination) -> bool {
        if self.terminal.set(termination).is_err() {
            return false;
        }
        let Some(termination) = self.terminal.get() else {
            return false;
        };
        debug!(
            cause = %termination,
            buffered = self.buffer.len(),
            "fan-out stream terminated"
        );
        self.broadcaster.close_all();
        self.release_upstream();

        let callback = self.on_drained.lock().expect("drained callback lock").take();
        if let Some(callback) = callback {
            callback(self.buffer.snapshot(), termination);
        }
        true
    }

    /// Drop the upstream once terminated, unless a pull currently holds the
    /// token. The holder drops it instead before letting go.
    fn release_upstream(&self) {
        if self.terminal.get().is_none() {
            return;
        }
        if let Ok(mut token) = self.token.try_lock() {
            if token.upstream.take().is_some() {
                trace!("upstream released");
            }
        }
    }

    /// One upstream read into the shared buffer.
    async fn pull(&self, token: &mut PullToken) {
        if self.terminal.get().is_some() {
            token.upstream = None;
            return;
        }
        let PullToken { upstream, staging } = token;
        let Some(reader) = upstream.as_mut() else {
            return;
        };

        match reader.read(staging).await {
            Ok(0) => {
                self.terminate(Termination::Eof);
            }
            Ok(n) => {
                self.buffer.write(&staging[..n]);
                trace!(pulled = n, buffered = self.buffer.len(), "pulled from upstream");
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                self.terminate(Termination::Failed(Arc::new(err)));
            }
        }

        if self.terminal.get().is_some() {
            token.upstream = None;
        }
    }
}

/// Resolves once the fork's close flag is set. Holds no borrow afterwards.
async fn closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

struct ForkState {
    shared: Arc<Shared>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl ForkState {
    fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.close_tx.send_replace(true);
        if self.shared.live_forks.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("last fork closed, cancelling upstream");
            self.shared.terminate(Termination::Cancelled);
        }
        true
    }
}

/// Wraps one upstream reader and hands out independent [`StreamFork`]s.
///
/// The multiplexer reads through a primary fork of its own, which counts
/// as a live reader until [`StreamMultiplexer::close`] is called or the
/// multiplexer is dropped.
pub struct StreamMultiplexer {
    primary: StreamFork,
}

impl StreamMultiplexer {
    pub fn new<R>(upstream: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::with_config(upstream, &FanoutConfig::default())
    }

    pub fn with_config<R>(upstream: R, config: &FanoutConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunk_size = config.effective_chunk_size();
        let shared = Arc::new(Shared {
            buffer: SharedBuffer::new(),
            broadcaster: Broadcaster::new(config.notify_capacity),
            terminal: OnceLock::new(),
            token: Mutex::new(PullToken {
                upstream: Some(Box::new(upstream)),
                staging: vec![0u8; chunk_size],
            }),
            live_forks: AtomicUsize::new(0),
            on_drained: StdMutex::new(None),
            chunk_size,
        });
        Self {
            primary: shared.fork(),
        }
    }

    /// Run `callback` with the buffered history and the cause when the
    /// stream terminates. Has no effect if it already terminated.
    pub fn with_drained_callback<F>(self, callback: F) -> Self
    where
        F: FnOnce(Bytes, &Termination) + Send + 'static,
    {
        *self.shared().on_drained.lock().expect("drained callback lock") = Some(Box::new(callback));
        self
    }

    /// A new reader starting at the beginning of the buffered history.
    pub fn fork(&self) -> StreamFork {
        self.primary.fork()
    }

    /// Read through the primary fork.
    pub async fn read(&mut self, dest: &mut [u8]) -> Result<usize, StreamError> {
        self.primary.read(dest).await
    }

    /// Close the primary fork.
    pub fn close(&self) -> bool {
        self.primary.close()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.primary.termination()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared().terminal.get().is_some()
    }

    /// Forks (including the primary) that have not been closed.
    pub fn live_forks(&self) -> usize {
        self.shared().live_forks.load(Ordering::Acquire)
    }

    pub fn buffered_len(&self) -> usize {
        self.shared().buffer.len()
    }

    fn shared(&self) -> &Shared {
        &self.primary.state.shared
    }
}

impl std::fmt::Debug for StreamMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("buffered", &self.buffered_len())
            .field("live_forks", &self.live_forks())
            .field("termination", &self.shared().terminal.get())
            .finish()
    }
}

/// An independent reader over a [`StreamMultiplexer`].
///
/// Dropping a fork closes it.
pub struct StreamFork {
    state: Arc<ForkState>,
    cursor: BufferCursor,
    wake: Subscription,
    closed_rx: watch::Receiver<bool>,
}

impl StreamFork {
    /// Read the next bytes for this fork.
    ///
    /// Returns `Ok(0)` at end of stream, after the fork was closed, or when
    /// `dest` is empty. Blocks until upstream progress, termination or
    /// close; impose a timeout by wrapping the future.
    pub async fn read(&mut self, dest: &mut [u8]) -> Result<usize, StreamError> {
        if dest.is_empty() {
            return Ok(0);
        }
        let shared = Arc::clone(&self.state.shared);
        loop {
            if self.is_closed() {
                return Ok(0);
            }
            let n = self.cursor.read_into(dest);
            if n > 0 {
                return Ok(n);
            }
            if let Some(termination) = shared.terminal.get() {
                // Bytes appended just before the terminal state was set.
                let n = self.cursor.read_into(dest);
                if n > 0 {
                    return Ok(n);
                }
                return termination.read_result();
            }

            tokio::select! {
                _ = closed(&mut self.closed_rx) => return Ok(0),
                mut token = shared.token.lock() => {
                    // Another fork may have pulled while we queued for the token.
                    if self.cursor.remaining() == 0 {
                        tokio::select! {
                            _ = shared.pull(&mut token) => {}
                            _ = closed(&mut self.closed_rx) => {}
                        }
                    }
                    drop(token);
                    shared.release_upstream();
                    shared.broadcaster.notify();
                }
                _ = self.wake.recv() => {}
            }
        }
    }

    /// Read until end of stream and return everything this fork had left.
    pub async fn read_to_end(&mut self) -> Result<Bytes, StreamError> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; self.state.shared.chunk_size];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(Bytes::from(out));
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Consume the fork as a stream of chunks. The stream ends after the
    /// first error.
    pub fn into_stream(self) -> ByteStream {
        let chunk_size = self.state.shared.chunk_size;
        Box::pin(futures_util::stream::unfold(Some(self), move |state| async move {
            let mut fork = state?;
            let mut chunk = vec![0u8; chunk_size];
            match fork.read(&mut chunk).await {
                Ok(0) => None,
                Ok(n) => {
                    chunk.truncate(n);
                    Some((Ok(Bytes::from(chunk)), Some(fork)))
                }
                Err(err) => Some((Err(err), None)),
            }
        }))
    }

    /// Another fork of the same multiplexer, starting from the beginning.
    pub fn fork(&self) -> StreamFork {
        self.state.shared.fork()
    }

    /// Close this fork. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.state.close()
    }

    /// A handle that can close this fork from elsewhere, including while a
    /// read is blocked.
    pub fn closer(&self) -> ForkCloser {
        ForkCloser {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn termination(&self) -> Option<Termination> {
        self.state.shared.terminal.get().cloned()
    }

    /// Bytes buffered so far across the whole multiplexer.
    pub fn buffered_len(&self) -> usize {
        self.state.shared.buffer.len()
    }
}

impl Drop for StreamFork {
    fn drop(&mut self) {
        self.state.close();
    }
}

impl std::fmt::Debug for StreamFork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFork")
            .field("offset", &self.cursor.offset())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes a [`StreamFork`] from outside the task reading it.
#[derive(Clone)]
pub struct ForkCloser {
    state: Arc<ForkState>,
}

impl ForkCloser {
    pub fn close(&self) -> bool {
        self.state.close()
    }
}
