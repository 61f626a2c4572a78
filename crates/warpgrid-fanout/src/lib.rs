//! WarpGrid stream fan-out.
//!
//! Lets many independent consumers read one non-repeatable upstream byte
//! stream (typically a response body) at their own pace. Bytes are pulled
//! from the upstream lazily, by whichever reader needs them next, and kept
//! in one append-only buffer that every reader walks with its own cursor.
//!
//! # Components
//!
//! - **[`SharedBuffer`] / [`BufferCursor`]**: append-only storage with
//!   independent read offsets.
//! - **[`Broadcaster`]**: lossy wake-up fan-out between readers.
//! - **[`StreamMultiplexer`] / [`StreamFork`]**: the cooperative pull
//!   protocol and reference-counted teardown of the upstream.
//! - **[`EofSignal`]**: reader wrapper reporting how a stream ended.
//!
//! # Example
//!
//! ```
//! use warpgrid_fanout::StreamMultiplexer;
//!
//! # tokio_test_block_on(async {
//! let mux = StreamMultiplexer::new(&b"shared body"[..]);
//! let mut a = mux.fork();
//! let mut b = mux.fork();
//!
//! assert_eq!(&a.read_to_end().await.unwrap()[..], b"shared body");
//! assert_eq!(&b.read_to_end().await.unwrap()[..], b"shared body");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod broadcast;
pub mod buffer;
mod config;
mod error;
pub mod multiplexer;
pub mod signal;

use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;

pub use broadcast::{Broadcaster, Subscription};
pub use buffer::{BufferCursor, SharedBuffer};
pub use config::FanoutConfig;
pub use error::{StreamError, Termination};
pub use multiplexer::{DrainedCallback, ForkCloser, StreamFork, StreamMultiplexer, Upstream};
pub use signal::{EofCause, EofSignal};

/// A type-erased async stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;
