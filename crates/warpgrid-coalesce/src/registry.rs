//! The table of in-flight cache items.
//!
//! Entries live only while someone is waiting on them: an item removes
//! itself when its last waiter closes, so the registry coalesces
//! overlapping requests rather than caching responses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use warpgrid_fanout::FanoutConfig;

use crate::item::{CacheItem, CacheItemWaiter};
use crate::key::{CacheKey, KeyFn, default_key_fn};
use crate::request::Request;

struct RegistryInner {
    items: Mutex<HashMap<CacheKey, Arc<CacheItem>>>,
    key_fn: KeyFn,
    fanout: FanoutConfig,
}

impl RegistryInner {
    /// Look up or create the item for `key`. Caller holds the table lock.
    fn lookup_or_create(
        self: &Arc<Self>,
        items: &mut HashMap<CacheKey, Arc<CacheItem>>,
        key: CacheKey,
    ) -> (Arc<CacheItem>, bool) {
        if let Some(item) = items.get(&key) {
            return (Arc::clone(item), true);
        }

        let registry = Arc::downgrade(self);
        let evict_key = key.clone();
        let item = CacheItem::with_eviction(
            key.clone(),
            self.fanout.clone(),
            Box::new(move |item| evict(&registry, &evict_key, item)),
        );
        tracing::debug!(key = %key, "created cache item");
        items.insert(key, Arc::clone(&item));
        (item, false)
    }
}

/// Remove `key` if it still maps to `item` and nobody joined `item` since
/// its waiter count hit zero. Joining happens under the same lock, so an
/// item is never removed while it has waiters. A newer item registered
/// under the same key is left alone.
///
/// Returns whether `item` is out of the table.
fn evict(registry: &Weak<RegistryInner>, key: &str, item: &CacheItem) -> bool {
    let Some(inner) = registry.upgrade() else {
        return true;
    };
    let removed = {
        let mut items = inner.items.lock().expect("registry lock");
        match items.get(key) {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), item) => {
                if item.waiter_count() > 0 {
                    return false;
                }
                items.remove(key)
            }
            _ => None,
        }
    };
    if removed.is_some() {
        tracing::debug!(key = %key, "removed evicted cache item");
    }
    true
}

/// Maps cache keys to in-flight [`CacheItem`]s.
///
/// Cloning is cheap and clones share one table.
#[derive(Clone)]
pub struct CacheRegistry {
    inner: Arc<RegistryInner>,
}

impl CacheRegistry {
    pub fn new(fanout: FanoutConfig) -> Self {
        Self::with_key_fn(fanout, default_key_fn())
    }

    pub fn with_key_fn(fanout: FanoutConfig, key_fn: KeyFn) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                items: Mutex::new(HashMap::new()),
                key_fn,
                fanout,
            }),
        }
    }

    pub fn key_for(&self, request: &Request) -> CacheKey {
        (self.inner.key_fn)(request)
    }

    /// Find or create the item for `request` and register a waiter on it,
    /// atomically. The flag reports whether the item already existed.
    pub fn try_register(&self, request: &Request) -> (Arc<CacheItem>, CacheItemWaiter, bool) {
        let key = self.key_for(request);
        let mut items = self.inner.items.lock().expect("registry lock");
        let (item, existed) = self.inner.lookup_or_create(&mut items, key);
        let waiter = item.new_waiter();
        (item, waiter, existed)
    }

    /// Find or create the item for `request` without waiting on it.
    ///
    /// An item created here and never waited on stays registered until a
    /// waiter comes and goes.
    pub fn get_item(&self, request: &Request) -> (Arc<CacheItem>, bool) {
        let key = self.key_for(request);
        let mut items = self.inner.items.lock().expect("registry lock");
        self.inner.lookup_or_create(&mut items, key)
    }

    /// Remove `key` unconditionally.
    pub fn delete_item(&self, key: &str) -> bool {
        let removed = self
            .inner
            .items
            .lock()
            .expect("registry lock")
            .remove(key);
        removed.is_some()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner
            .items
            .lock()
            .expect("registry lock")
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(FanoutConfig::default())
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("items", &self.len())
            .field("fanout", &self.inner.fanout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str) -> Request {
        Request::get(uri).unwrap()
    }

    #[test]
    fn same_key_shares_one_item() {
        let registry = CacheRegistry::default();
        let (first, _w1, existed1) = registry.try_register(&get("http://example.com/a"));
        let (second, _w2, existed2) = registry.try_register(&get("HTTP://EXAMPLE.com/a"));

        assert!(!existed1);
        assert!(existed2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.waiter_count(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_keys_get_different_items() {
        let registry = CacheRegistry::default();
        let (a, _wa, _) = registry.try_register(&get("http://example.com/a"));
        let (b, _wb, _) = registry.try_register(&get("http://example.com/b"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn last_waiter_removes_the_entry() {
        let registry = CacheRegistry::default();
        let req = get("http://example.com/");
        let key = registry.key_for(&req);

        let (_, w1, _) = registry.try_register(&req);
        let (_, w2, _) = registry.try_register(&req);
        drop(w1);
        assert!(registry.contains_key(&key));
        w2.close();
        assert!(!registry.contains_key(&key));
        assert!(registry.is_empty());
    }

    #[test]
    fn get_item_does_not_register_a_waiter() {
        let registry = CacheRegistry::default();
        let req = get("http://example.com/pushed");
        let (item, existed) = registry.get_item(&req);
        assert!(!existed);
        assert_eq!(item.waiter_count(), 0);

        let (same, waiter, existed) = registry.try_register(&req);
        assert!(existed);
        assert!(Arc::ptr_eq(&item, &same));
        drop(waiter);
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_eviction_leaves_newer_item() {
        let registry = CacheRegistry::default();
        let req = get("http://example.com/");
        let key = registry.key_for(&req);

        let (old, old_waiter, _) = registry.try_register(&req);
        assert!(registry.delete_item(&key));
        let (new, _new_waiter, existed) = registry.try_register(&req);
        assert!(!existed);
        assert!(!Arc::ptr_eq(&old, &new));

        drop(old_waiter);
        assert!(old.is_evicted());
        assert!(registry.contains_key(&key));
    }

    #[test]
    fn delete_item_is_unconditional() {
        let registry = CacheRegistry::default();
        let req = get("http://example.com/");
        let (_, _waiter, _) = registry.try_register(&req);
        assert!(registry.delete_item(&registry.key_for(&req)));
        assert!(!registry.delete_item(&registry.key_for(&req)));
    }

    #[test]
    fn custom_key_fn_groups_requests() {
        let by_path: KeyFn = Arc::new(|req: &Request| req.uri().path().to_string());
        let registry = CacheRegistry::with_key_fn(FanoutConfig::default(), by_path);

        let (_, _w1, _) = registry.try_register(&get("http://a.example/shared"));
        let (_, _w2, existed) = registry.try_register(&get("http://b.example/shared"));
        assert!(existed);
        assert_eq!(registry.key_for(&get("http://c.example/shared")), "/shared");
    }

    #[test]
    fn eviction_after_registry_dropped_is_a_no_op() {
        let registry = CacheRegistry::default();
        let (item, waiter, _) = registry.try_register(&get("http://example.com/"));
        drop(registry);
        drop(waiter);
        assert!(item.is_evicted());
    }

    #[test]
    fn concurrent_registration_creates_one_item() {
        let registry = CacheRegistry::default();
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.try_register(&get("http://example.com/"))
                })
            })
            .collect();
        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(_, _, existed)| !existed).count(), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0].0, &w[1].0)));
        drop(results);
        assert!(registry.is_empty());
    }

    #[test]
    fn held_waiter_keeps_its_item_registered() {
        let registry = CacheRegistry::default();
        let req = get("http://example.com/contended");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let req = req.clone();
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        let (item, waiter, _) = registry.try_register(&req);
                        assert!(!item.is_evicted(), "live waiter on an evicted item");
                        let (current, existed) = registry.get_item(&req);
                        assert!(existed);
                        assert!(Arc::ptr_eq(&item, &current), "key split across two items");
                        drop(waiter);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn eviction_skips_an_item_that_regained_a_waiter() {
        let registry = CacheRegistry::default();
        let req = get("http://example.com/");
        let key = registry.key_for(&req);
        let (item, waiter, _) = registry.try_register(&req);

        // As if the count had hit zero and a join won the lock first.
        assert!(!evict(&Arc::downgrade(&registry.inner), &key, &item));
        assert!(registry.contains_key(&key));
        assert!(!item.is_evicted());

        drop(waiter);
        assert!(registry.is_empty());
        assert!(item.is_evicted());
    }
}
