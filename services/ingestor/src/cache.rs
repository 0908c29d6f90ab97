//! Single-flight keyed cache
//!
//! At most one load runs per key. Callers arriving while it is pending
//! await the same shared future and observe the same outcome. Loads for
//! different keys proceed in parallel; no lock is held while a load runs.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type SharedLoad<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

struct Slot<V, E> {
    load: SharedLoad<V, E>,
    created: Instant,
    generation: u64,
}

pub struct SingleFlightCache<K, V, E> {
    slots: DashMap<K, Slot<V, E>>,
    ttl: Option<Duration>,
    generations: AtomicU64,
}

impl<K: Eq + Hash, V, E> std::fmt::Debug for SingleFlightCache<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("entries", &self.slots.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K, V, E> SingleFlightCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Cache whose successful entries never expire
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    /// Cache that reloads successful entries older than `ttl`
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
            generations: AtomicU64::new(0),
        }
    }

    /// Return the cached or in-flight value for `key`, starting `loader` on a miss
    ///
    /// `loader` is invoked at most once per miss, while the key's shard is
    /// locked, and only to build the future; the future itself runs after
    /// the lock is released. A failed load is evicted once settled so the
    /// next request retries.
    pub async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (load, generation) = match self.slots.entry(key.clone()) {
            Entry::Occupied(occupied) if self.is_fresh(occupied.get()) => {
                let slot = occupied.get();
                (slot.load.clone(), slot.generation)
            }
            Entry::Occupied(mut occupied) => {
                let slot = self.start(loader);
                let handle = (slot.load.clone(), slot.generation);
                occupied.insert(slot);
                handle
            }
            Entry::Vacant(vacant) => {
                let slot = self.start(loader);
                let handle = (slot.load.clone(), slot.generation);
                vacant.insert(slot);
                handle
            }
        };

        let outcome = load.await;
        if outcome.is_err() {
            self.slots
                .remove_if(&key, |_, slot| slot.generation == generation);
        }
        outcome
    }

    /// Forget `key`; an in-flight load keeps running for its current waiters
    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of loads started so far
    pub fn load_count(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    fn start<F, Fut>(&self, loader: F) -> Slot<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let load = loader().map(|outcome| outcome.map_err(Arc::new)).boxed().shared();
        Slot {
            load,
            created: Instant::now(),
            generation,
        }
    }

    fn is_fresh(&self, slot: &Slot<V, E>) -> bool {
        match slot.load.peek() {
            None => true,
            Some(Err(_)) => false,
            Some(Ok(_)) => self.ttl.map_or(true, |ttl| slot.created.elapsed() < ttl),
        }
    }
}

impl<K, V, E> Default for SingleFlightCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_debug_reports_entries_and_ttl() {
        let cache: SingleFlightCache<u32, u32, String> =
            SingleFlightCache::with_ttl(Some(Duration::from_secs(5)));
        cache.get_or_load(1, || async { Ok(10) }).await.unwrap();

        let rendered = format!("{:?}", cache);
        assert!(rendered.contains("entries: 1"), "{}", rendered);
        assert!(rendered.contains("ttl: Some(5s)"), "{}", rendered);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_load() {
        let cache: Arc<SingleFlightCache<String, u32, String>> = Arc::new(SingleFlightCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("AAPL".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.load_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_load_separately() {
        let cache: SingleFlightCache<u32, u32, String> = SingleFlightCache::new();
        let a = cache.get_or_load(1, || async { Ok(10) });
        let b = cache.get_or_load(2, || async { Ok(20) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.unwrap(), b.unwrap()), (10, 20));
        assert_eq!(cache.load_count(), 2);
    }

    #[tokio::test]
    async fn test_settled_value_reused() {
        let cache: SingleFlightCache<u32, u32, String> = SingleFlightCache::new();
        assert_eq!(cache.get_or_load(1, || async { Ok(1) }).await.unwrap(), 1);
        assert_eq!(cache.get_or_load(1, || async { Ok(2) }).await.unwrap(), 1);
        assert_eq!(cache.load_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_evicted_for_later_requests() {
        let cache: SingleFlightCache<u32, u32, String> = SingleFlightCache::new();

        let err = cache
            .get_or_load(1, || async { Err("store down".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err.as_str(), "store down");
        assert!(cache.is_empty());

        assert_eq!(cache.get_or_load(1, || async { Ok(5) }).await.unwrap(), 5);
        assert_eq!(cache.load_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_failure() {
        let cache: SingleFlightCache<u32, u32, String> = SingleFlightCache::new();
        let first = cache.get_or_load(1, || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err("boom".to_string())
        });
        let second = cache.get_or_load(1, || async { Ok(1) });
        let (first, second) = tokio::join!(first, second);
        assert!(first.is_err());
        assert!(second.is_err());
        assert_eq!(cache.load_count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_reloads_expired_entry() {
        let cache: SingleFlightCache<u32, u32, String> =
            SingleFlightCache::with_ttl(Some(Duration::from_millis(10)));
        assert_eq!(cache.get_or_load(1, || async { Ok(1) }).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get_or_load(1, || async { Ok(2) }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache: SingleFlightCache<u32, u32, String> = SingleFlightCache::new();
        cache.get_or_load(1, || async { Ok(1) }).await.unwrap();
        cache.invalidate(&1);
        assert_eq!(cache.get_or_load(1, || async { Ok(3) }).await.unwrap(), 3);
    }
}
