//! In-memory caching for upstream answers: package existence and rendered
//! index pages, one bounded LRU+TTL map per `(upstream, kind)` pair.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::Config;
use crate::pypi::Upstream;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A bounded LRU map whose entries expire `ttl` after insertion. Expiry is
/// checked lazily on read; eviction past capacity is strict LRU, with hit
/// order deciding recency.
pub struct TtlCache<V: Clone> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
    enabled: bool,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration, enabled: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        TtlCache {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            enabled,
        }
    }

    /// Returns a clone of the cached value, promoting the entry to
    /// most-recently-used. Expired entries are removed on touch and
    /// reported as misses so callers may overwrite them.
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock();
        let expired = match inner.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.value.clone())
    }

    /// Inserts or overwrites, timestamped with now. The least-recently-used
    /// entry is evicted when capacity is exceeded. No-op when disabled.
    pub fn put(&self, key: String, value: V) {
        if !self.enabled {
            return;
        }
        self.inner.lock().put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entry counts reported by the health endpoint, one per logical map.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub public_packages: usize,
    pub private_packages: usize,
    pub public_pages: usize,
    pub private_pages: usize,
}

/// The four logical maps behind the proxy, keyed by normalized package
/// name. Page entries hold the raw upstream bytes; wheel filtering happens
/// on the way out, so the cache stays agnostic to policy.
///
/// Built once at startup and shared by reference; tests build their own.
pub struct ProxyCache {
    enabled: bool,
    public_existence: TtlCache<bool>,
    private_existence: TtlCache<bool>,
    public_pages: TtlCache<Bytes>,
    private_pages: TtlCache<Bytes>,
}

impl ProxyCache {
    pub fn new(config: &Config) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_hours * 60 * 60);
        let enabled = config.cache_enabled;
        ProxyCache {
            enabled,
            public_existence: TtlCache::new(config.cache_size, ttl, enabled),
            private_existence: TtlCache::new(config.cache_size, ttl, enabled),
            public_pages: TtlCache::new(config.cache_size, ttl, enabled),
            private_pages: TtlCache::new(config.cache_size, ttl, enabled),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn existence(&self, upstream: Upstream) -> &TtlCache<bool> {
        match upstream {
            Upstream::Public => &self.public_existence,
            Upstream::Private => &self.private_existence,
        }
    }

    fn pages(&self, upstream: Upstream) -> &TtlCache<Bytes> {
        match upstream {
            Upstream::Public => &self.public_pages,
            Upstream::Private => &self.private_pages,
        }
    }

    pub fn get_existence(&self, upstream: Upstream, package: &str) -> Option<bool> {
        self.existence(upstream).get(package)
    }

    pub fn put_existence(&self, upstream: Upstream, package: &str, exists: bool) {
        self.existence(upstream).put(package.to_string(), exists);
    }

    pub fn get_page(&self, upstream: Upstream, package: &str) -> Option<Bytes> {
        self.pages(upstream).get(package)
    }

    pub fn put_page(&self, upstream: Upstream, package: &str, html: Bytes) {
        self.pages(upstream).put(package.to_string(), html);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            public_packages: self.public_existence.len(),
            private_packages: self.private_existence.len(),
            public_pages: self.public_pages.len(),
            private_pages: self.private_pages.len(),
        }
    }
}
