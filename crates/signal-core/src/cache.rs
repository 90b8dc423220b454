use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Generic TTL cache over DashMap. All TTL checks go through here so the
/// read-modify-write on an entry is atomic per key without a global lock.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value if present and not expired. Expired entries
    /// are removed on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Atomic per-key get-or-compute: the entry lock is held for the whole
    /// check-and-fill, so two concurrent callers missing on the same key do
    /// not both run `compute`, and a writer cannot clobber a fresher entry.
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    occupied.get().value.clone()
                } else {
                    let value = compute();
                    occupied.insert(CacheEntry {
                        value: value.clone(),
                        expires_at: now + self.ttl,
                    });
                    value
                }
            }
            Entry::Vacant(vacant) => {
                let value = compute();
                vacant.insert(CacheEntry {
                    value: value.clone(),
                    expires_at: now + self.ttl,
                });
                value
            }
        }
    }

    /// Fallible variant of [`get_or_insert_with`]; a failed compute leaves
    /// the cache untouched.
    pub fn get_or_try_insert_with<F, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    Ok(occupied.get().value.clone())
                } else {
                    let value = compute()?;
                    occupied.insert(CacheEntry {
                        value: value.clone(),
                        expires_at: now + self.ttl,
                    });
                    Ok(value)
                }
            }
            Entry::Vacant(vacant) => {
                let value = compute()?;
                vacant.insert(CacheEntry {
                    value: value.clone(),
                    expires_at: now + self.ttl,
                });
                Ok(value)
            }
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn hit_within_ttl_miss_after_expiry() {
        let cache: TtlCache<&'static str, i32> = TtlCache::new(Duration::from_millis(50));
        cache.insert("AAPL", 42);
        assert_eq!(cache.get(&"AAPL"), Some(42));

        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"AAPL"), None);
    }

    #[test]
    fn get_or_insert_computes_once() {
        let cache: TtlCache<&'static str, i32> = TtlCache::new(Duration::from_secs(60));
        let mut calls = 0;
        let v1 = cache.get_or_insert_with("MSFT", || {
            calls += 1;
            7
        });
        let v2 = cache.get_or_insert_with("MSFT", || {
            calls += 1;
            8
        });
        assert_eq!(v1, 7);
        assert_eq!(v2, 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn failed_compute_leaves_cache_empty() {
        let cache: TtlCache<&'static str, i32> = TtlCache::new(Duration::from_secs(60));
        let result: Result<i32, &str> = cache.get_or_try_insert_with("TSLA", || Err("upstream"));
        assert!(result.is_err());
        assert!(cache.get(&"TSLA").is_none());

        let result: Result<i32, &str> = cache.get_or_try_insert_with("TSLA", || Ok(3));
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("NVDA".to_string(), 1);
        cache.invalidate(&"NVDA".to_string());
        assert!(cache.get(&"NVDA".to_string()).is_none());
    }
}
