//! Ephemeral key-value cache with TTLs.
//!
//! Backs upload sessions and rate-limit counters. Both need atomic
//! read-modify-write, so the trait exposes compare-and-swap and a bounded
//! counter increment instead of leaving callers to pair `get` with `set`.

use crate::clock::Clock;
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns `Ok(None)` if the key doesn't exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value`, replacing any previous entry, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Returns whether a live entry was removed. Idempotent.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Replace the entry with `new` only if it is live and equal to `expected`.
    ///
    /// Returns `false` when the entry changed, expired or vanished in the
    /// meantime; the caller re-reads and retries.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Atomically increment a counter unless it already reached `max`.
    ///
    /// A missing or expired counter starts at 1 with an expiry of
    /// `now + window`; an existing counter keeps its expiry. Returns the new
    /// count, or `None` if the counter was already at `max`.
    async fn bounded_increment(&self, key: &str, max: u64, window: Duration)
    -> Result<Option<u64>>;
}

#[derive(Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process [`CacheStore`] on a `DashMap`.
///
/// Expiry is evaluated lazily against the injected clock. Entry-level
/// locking makes `compare_and_swap` and `bounded_increment` atomic.
#[derive(Clone)]
pub struct MemoryCacheStore {
    data: Arc<DashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Removes all expired entries.
    pub fn cleanup_expired(&self) {
        let now = self.clock.now();
        self.data.retain(|_, entry| !entry.is_expired(now));
    }

    /// Number of entries, including expired ones not yet cleaned up.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("cache store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let now = self.clock.now();
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.data.remove_if(key, |_, entry| entry.is_expired(now));
                Ok(None)
            } else {
                Ok(Some(entry.value.clone()))
            }
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let entry = CacheEntry {
            value,
            expires_at: self.clock.now() + ttl,
        };
        self.data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now();
        Ok(self
            .data
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now();
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.is_expired(now) || current.value != expected {
                    return Ok(false);
                }
                occupied.insert(CacheEntry {
                    value: new,
                    expires_at: now + ttl,
                });
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn bounded_increment(
        &self,
        key: &str,
        max: u64,
        window: Duration,
    ) -> Result<Option<u64>> {
        self.check_available()?;
        let now = self.clock.now();
        let fresh = || CacheEntry {
            value: 1u64.to_be_bytes().to_vec(),
            expires_at: now + window,
        };

        if max == 0 {
            return Ok(None);
        }

        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh());
                    return Ok(Some(1));
                }
                let count = decode_counter(&occupied.get().value)?;
                if count >= max {
                    return Ok(None);
                }
                let next = count + 1;
                occupied.get_mut().value = next.to_be_bytes().to_vec();
                Ok(Some(next))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                Ok(Some(1))
            }
        }
    }
}

fn decode_counter(raw: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| anyhow::anyhow!("counter entry has {} bytes, expected 8", raw.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (MemoryCacheStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryCacheStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let (store, clock) = store();
        store
            .set("k", b"v".to_vec(), Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(Duration::seconds(59));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::seconds(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_swap_requires_a_matching_live_value() {
        let (store, clock) = store();
        store
            .set("k", b"a".to_vec(), Duration::minutes(1))
            .await
            .unwrap();

        assert!(!store
            .compare_and_swap("k", b"x", b"b".to_vec(), Duration::minutes(1))
            .await
            .unwrap());
        assert!(store
            .compare_and_swap("k", b"a", b"b".to_vec(), Duration::minutes(1))
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b"b".to_vec()));

        clock.advance(Duration::minutes(2));
        assert!(!store
            .compare_and_swap("k", b"b", b"c".to_vec(), Duration::minutes(1))
            .await
            .unwrap());
        assert!(!store
            .compare_and_swap("missing", b"", b"c".to_vec(), Duration::minutes(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn bounded_increment_keeps_a_fixed_window() {
        let (store, clock) = store();
        let window = Duration::seconds(60);

        assert_eq!(store.bounded_increment("c", 3, window).await.unwrap(), Some(1));
        clock.advance(Duration::seconds(30));
        assert_eq!(store.bounded_increment("c", 3, window).await.unwrap(), Some(2));
        assert_eq!(store.bounded_increment("c", 3, window).await.unwrap(), Some(3));
        assert_eq!(store.bounded_increment("c", 3, window).await.unwrap(), None);

        // window started at t=0, so it ends at t=60 despite later increments
        clock.advance(Duration::seconds(30));
        assert_eq!(store.bounded_increment("c", 3, window).await.unwrap(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_never_exceed_max() {
        let (store, _clock) = store();
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .bounded_increment("hot", 10, Duration::minutes(1))
                    .await
                    .unwrap()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let (store, _clock) = store();
        store.set_unavailable(true);
        assert!(store.get("k").await.is_err());
        assert!(store
            .bounded_increment("k", 1, Duration::minutes(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn cleanup_drops_expired_entries() {
        let (store, clock) = store();
        store
            .set("short", vec![], Duration::seconds(1))
            .await
            .unwrap();
        store
            .set("long", vec![], Duration::minutes(5))
            .await
            .unwrap();
        clock.advance(Duration::seconds(2));
        store.cleanup_expired();
        assert_eq!(store.len(), 1);
    }
}
