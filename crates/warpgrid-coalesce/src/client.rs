//! The coalescing client.
//!
//! ```text
//! send(request)
//!   → registry.try_register(request)
//!     → item is new      → spawn executor.execute(request) → item.resolve(result)
//!     → item in flight   → join it
//!   → waiter.wait_for_resolved(timeout) → own copy of the response
//!   → waiter closes; last one out evicts the item
//!
//! receive_push(response)
//!   → registry.get_item(response.request) → item.resolve(Ok(response))
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;

use crate::config::ClientConfig;
use crate::error::{CoalesceError, CoalesceResult};
use crate::key::KeyFn;
use crate::registry::CacheRegistry;
use crate::request::Request;
use crate::response::Response;

/// Boxed future returned by [`RequestExecutor::execute`].
pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Response>> + Send + 'a>>;

/// Performs the real request. Injected so the transport stays outside the
/// client (and so tests can count invocations).
pub trait RequestExecutor: Send + Sync {
    fn execute<'a>(&'a self, request: &'a Request) -> ExecuteFuture<'a>;
}

/// Point-in-time client counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Calls to `send`.
    pub requests: u64,
    /// Calls that joined an item already in flight.
    pub coalesced: u64,
    /// Executor invocations.
    pub fetches: u64,
    /// Calls to `receive_push`.
    pub pushes: u64,
    /// Resolutions that lost the race (late fetches or late pushes).
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    pushes: AtomicU64,
    discarded: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            requests: self.requests.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Collapses concurrent identical requests into one executor call.
///
/// Every caller receives its own [`Response`] whose body is an independent
/// fork of the single fetched body. Entries are dropped as soon as nobody
/// is waiting, so this is not a response cache.
///
/// Must be used from within a tokio runtime: fetches run on spawned tasks.
pub struct CoalescingClient {
    registry: CacheRegistry,
    executor: Arc<dyn RequestExecutor>,
    config: ClientConfig,
    stats: Arc<StatsCounters>,
}

impl CoalescingClient {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: ClientConfig) -> Self {
        Self {
            registry: CacheRegistry::new(config.fanout.clone()),
            executor,
            config,
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Like [`new`](Self::new) but grouping requests with a custom key.
    pub fn with_key_fn(
        executor: Arc<dyn RequestExecutor>,
        config: ClientConfig,
        key_fn: KeyFn,
    ) -> Self {
        Self {
            registry: CacheRegistry::with_key_fn(config.fanout.clone(), key_fn),
            executor,
            config,
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Send `request`, joining an identical request already in flight.
    ///
    /// Waits up to the configured default timeout.
    pub async fn send(&self, request: Request) -> CoalesceResult<Response> {
        self.send_with_timeout(request, self.config.wait_timeout())
            .await
    }

    /// Send `request` with an explicit deadline for this caller only.
    /// `None` waits until the item resolves.
    pub async fn send_with_timeout(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> CoalesceResult<Response> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let (item, waiter, existed) = self.registry.try_register(&request);

        if existed {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = %item.key(), "joined in-flight request");
        } else {
            self.stats.fetches.fetch_add(1, Ordering::Relaxed);
            let executor = Arc::clone(&self.executor);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                let fetch = async { executor.execute(&request).await };
                let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_reason(&*panic);
                        tracing::warn!(key = %item.key(), %reason, "request executor panicked");
                        Err(anyhow::anyhow!("request executor panicked: {reason}"))
                    }
                };
                if !item.resolve(result) {
                    stats.discarded.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        // The waiter closes on drop whatever the outcome.
        waiter.wait_for_resolved(timeout).await
    }

    /// Resolve the entry for `response.request()` with `response`.
    ///
    /// Unblocks callers already waiting and satisfies the next `send` for
    /// the same key without a fetch. Returns `false` if the entry was
    /// already resolved.
    pub fn receive_push(&self, response: Response) -> CoalesceResult<bool> {
        let Some(request) = response.request() else {
            return Err(CoalesceError::MissingRequest);
        };
        self.stats.pushes.fetch_add(1, Ordering::Relaxed);

        let (item, existed) = self.registry.get_item(request);
        let status = response.status();
        let accepted = item.resolve(Ok(response));
        if accepted {
            tracing::info!(key = %item.key(), status, existed, "pushed response accepted");
        } else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                key = %item.key(),
                status,
                "pushed response discarded, already resolved"
            );
        }
        Ok(accepted)
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl std::fmt::Debug for CoalescingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescingClient")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
