//! Short-lived typed key/value cache owned by the server.
//!
//! Mainly used to remember addresses that recently completed a login so their next
//! reputation check can run with a shorter timeout. Entries expire lazily on read and
//! in bulk through [`SessionCache::sweep_expired`].

use std::collections::HashMap;
use std::mem::size_of;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Bits(u64),
}

impl CacheValue {
    fn heap_size(&self) -> usize {
        match self {
            CacheValue::Text(s) => s.capacity(),
            CacheValue::Bytes(b) => b.capacity(),
            _ => 0,
        }
    }
}

macro_rules! cache_value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for CacheValue {
                fn from(value: $ty) -> Self {
                    CacheValue::$variant(value)
                }
            }

            impl FromCacheValue for $ty {
                fn from_cache_value(value: &CacheValue) -> Option<Self> {
                    match value {
                        CacheValue::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

/// Typed extraction from a [`CacheValue`]. A type mismatch reads as absent.
pub trait FromCacheValue: Sized {
    fn from_cache_value(value: &CacheValue) -> Option<Self>;
}

cache_value_conversions! {
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    String => Text,
    Vec<u8> => Bytes,
    u64 => Bits,
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    created_at: Instant,
    ttl: Option<Duration>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) if !ttl.is_zero() => now.duration_since(self.created_at) >= ttl,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    /// Approximate bytes held by keys, values and bookkeeping
    pub memory_usage: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Default)]
pub struct SessionCache {
    inner: Mutex<CacheInner>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a value that never expires
    pub fn set(&self, key: &str, value: impl Into<CacheValue>) {
        self.insert(key, value.into(), None);
    }

    /// Stores a value that expires after `ttl`. A zero TTL never expires.
    pub fn set_with_ttl(&self, key: &str, value: impl Into<CacheValue>, ttl: Duration) {
        self.insert(key, value.into(), Some(ttl));
    }

    fn insert(&self, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl,
        };
        self.lock().entries.insert(key.to_string(), entry);
    }

    pub fn get<T: FromCacheValue>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.misses += 1;
            return None;
        }

        let value = inner.entries.get(key).and_then(|entry| T::from_cache_value(&entry.value));
        if value.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        value
    }

    /// True if a live entry exists. Expired entries found here are dropped.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                inner.entries.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Keys of all entries that have not expired
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drops every expired entry and returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let memory_usage = inner
            .entries
            .iter()
            .map(|(key, entry)| key.capacity() + size_of::<CacheEntry>() + entry.value.heap_size())
            .sum();
        let lookups = inner.hits + inner.misses;

        CacheStats {
            size: inner.entries.len(),
            memory_usage,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_typed_set_get() {
        let cache = SessionCache::new();
        cache.set("count", 5i32);
        cache.set("name", "alice");
        cache.set("flags", 0b1010u64);

        assert_eq!(cache.get::<i32>("count"), Some(5));
        assert_eq!(cache.get::<String>("name"), Some("alice".to_string()));
        assert_eq!(cache.get::<u64>("flags"), Some(0b1010));
        assert_eq!(cache.get::<bool>("count"), None);
        assert_eq!(cache.get::<i32>("missing"), None);
    }

    #[test]
    fn test_ttl_expiry_on_read() {
        let cache = SessionCache::new();
        cache.set_with_ttl("10.0.0.1", 1i32, Duration::from_millis(20));
        assert!(cache.exists("10.0.0.1"));

        sleep(Duration::from_millis(40));

        assert!(!cache.exists("10.0.0.1"));
        assert_eq!(cache.get::<i32>("10.0.0.1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let cache = SessionCache::new();
        cache.set_with_ttl("forever", true, Duration::ZERO);
        sleep(Duration::from_millis(5));

        assert_eq!(cache.sweep_expired(), 0);
        assert_eq!(cache.get::<bool>("forever"), Some(true));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let cache = SessionCache::new();
        cache.set_with_ttl("a", 1i32, Duration::from_millis(10));
        cache.set_with_ttl("b", 2i32, Duration::from_millis(10));
        cache.set("c", 3i32);

        sleep(Duration::from_millis(30));

        assert_eq!(cache.sweep_expired(), 2);
        assert_eq!(cache.sweep_expired(), 0);
        assert_eq!(cache.keys(), vec!["c".to_string()]);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = SessionCache::new();
        cache.set("a", 1i64);
        cache.set("b", 2.5f64);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats() {
        let cache = SessionCache::new();
        cache.set("bytes", vec![1u8, 2, 3]);

        assert_eq!(cache.get::<Vec<u8>>("bytes"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get::<Vec<u8>>("nope"), None);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert!(stats.memory_usage >= 3);
    }
}
