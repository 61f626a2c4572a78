//! Cache items and their waiters.
//!
//! A [`CacheItem`] is the rendezvous point for every caller interested in
//! one key. It starts pending, is resolved exactly once (by the fetch task
//! or by a pushed response) and hands each [`CacheItemWaiter`] its own copy
//! of the result. When the last waiter closes, the item asks its owner to
//! forget it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use warpgrid_fanout::FanoutConfig;

use crate::error::{CoalesceError, CoalesceResult};
use crate::key::CacheKey;
use crate::response::{Response, SharedResponse};

/// Invoked each time the waiter count drops to zero. Returns whether the
/// item is now out of its owner's table. The owner must re-check
/// [`CacheItem::waiter_count`] under the same lock that guards joining.
pub(crate) type EvictFn = Box<dyn Fn(&CacheItem) -> bool + Send + Sync>;

type Resolution = Result<SharedResponse, Arc<anyhow::Error>>;

pub struct CacheItem {
    key: CacheKey,
    fanout: FanoutConfig,
    /// `None` while pending. Written once.
    resolution: Mutex<Option<Resolution>>,
    /// Latch released on resolution.
    resolved: watch::Sender<bool>,
    waiters: AtomicUsize,
    evicted: AtomicBool,
    on_evict: Option<EvictFn>,
}

impl CacheItem {
    /// A standalone item with no eviction hook.
    pub fn new(key: impl Into<CacheKey>, fanout: FanoutConfig) -> Arc<Self> {
        Arc::new(Self::build(key.into(), fanout, None))
    }

    pub(crate) fn with_eviction(
        key: CacheKey,
        fanout: FanoutConfig,
        on_evict: EvictFn,
    ) -> Arc<Self> {
        Arc::new(Self::build(key, fanout, Some(on_evict)))
    }

    fn build(key: CacheKey, fanout: FanoutConfig, on_evict: Option<EvictFn>) -> Self {
        let (resolved, _) = watch::channel(false);
        Self {
            key,
            fanout,
            resolution: Mutex::new(None),
            resolved,
            waiters: AtomicUsize::new(0),
            evicted: AtomicBool::new(false),
            on_evict,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store the outcome of a fetch or push.
    ///
    /// Returns `false` if the item was already resolved; the first
    /// resolution wins and `result` is dropped, which closes its body.
    pub fn resolve(&self, result: anyhow::Result<Response>) -> bool {
        let mut resolution = self.resolution.lock().expect("cache item lock");
        if resolution.is_some() {
            drop(resolution);
            tracing::debug!(key = %self.key, "cache item already resolved, discarding result");
            return false;
        }

        let ok = result.is_ok();
        *resolution = Some(
            result
                .map(|response| response.into_shared(&self.fanout))
                .map_err(Arc::new),
        );
        drop(resolution);

        self.resolved.send_replace(true);
        tracing::debug!(key = %self.key, ok, "cache item resolved");
        true
    }

    pub fn is_resolved(&self) -> bool {
        *self.resolved.borrow()
    }

    /// Register interest in this item.
    pub fn new_waiter(self: &Arc<Self>) -> CacheItemWaiter {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        CacheItemWaiter {
            item: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    fn release_waiter(&self) {
        if self.waiters.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        // A new waiter may join before the owner takes its lock, in which
        // case the hook leaves the item in place.
        let removed = match &self.on_evict {
            Some(on_evict) => on_evict(self),
            None => true,
        };
        if removed && !self.evicted.swap(true, Ordering::AcqRel) {
            tracing::debug!(key = %self.key, "last waiter closed, cache item evicted");
        }
    }

    /// A fresh copy of the stored result, if resolved.
    fn snapshot(&self) -> Option<CoalesceResult<Response>> {
        let resolution = self.resolution.lock().expect("cache item lock");
        resolution.as_ref().map(|resolution| match resolution {
            Ok(shared) => Ok(shared.fork()),
            Err(err) => Err(CoalesceError::Fetch(Arc::clone(err))),
        })
    }
}

impl std::fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheItem")
            .field("key", &self.key)
            .field("resolved", &self.is_resolved())
            .field("waiters", &self.waiter_count())
            .field("evicted", &self.is_evicted())
            .finish()
    }
}

/// One caller's interest in a [`CacheItem`]. Closing (or dropping) the
/// last waiter evicts the item.
#[derive(Debug)]
pub struct CacheItemWaiter {
    item: Arc<CacheItem>,
    closed: AtomicBool,
}

impl CacheItemWaiter {
    pub fn item(&self) -> &Arc<CacheItem> {
        &self.item
    }

    /// Wait until the item resolves and return this waiter's own copy of
    /// the response.
    ///
    /// `timeout` bounds only this call: on expiry the item stays pending
    /// for everyone else. Dropping the future cancels the wait.
    pub async fn wait_for_resolved(&self, timeout: Option<Duration>) -> CoalesceResult<Response> {
        let mut latch = self.item.resolved.subscribe();
        let wait = async {
            // The sender lives as long as the item, so this cannot fail.
            let _ = latch.wait_for(|resolved| *resolved).await;
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| CoalesceError::DeadlineExceeded(limit))?,
            None => wait.await,
        }

        self.item.snapshot().unwrap_or_else(|| {
            Err(CoalesceError::Fetch(Arc::new(anyhow::anyhow!(
                "cache item {} released without a result",
                self.item.key
            ))))
        })
    }

    /// Idempotent. Returns `true` on the call that actually closed.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.item.release_waiter();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for CacheItemWaiter {
    fn drop(&mut self) {
        self.close();
    }
}
