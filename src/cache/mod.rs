//! Concurrent cache of built values (proxy types), with at most one build per key
//!
//! The store is a [`DashMap`]: keys are hashed onto independently locked shards, so lookups of
//! unrelated keys never contend and enumeration only ever holds one shard at a time.
//!
//! A build that is underway is represented by a `Building` marker under its key. The marker is
//! registered before the factory runs and resolved (then replaced or removed) after it finishes.
//! The factory itself runs with no shard lock held. Callers that find a marker block on it until
//! the build completes and then share the outcome.
//!
//! An explicit `insert` over a marker resolves the build early: waiters (and the builder itself)
//! get the inserted value, and the entry stays pinned until the factory returns, so the key can
//! not be removed and rebuilt while that factory is still running.
//!
//! Only finished entries are externally visible: `get`, `len`, `entries` and `remove` all skip
//! builds in flight.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

pub struct ProxyCache<K, V, E> {
    map: DashMap<K, Slot<V, E>>,
}

enum Slot<V, E> {
    Ready(V),
    Building(Arc<InFlight<V, E>>),

    /// Inserted while `builder` was still running. Becomes `Ready` once that build returns.
    Pinned {
        value: V,
        builder: Arc<InFlight<V, E>>,
    },
}

impl<V, E> Slot<V, E> {
    /// Value visible to lookups
    fn visible(&self) -> Option<&V> {
        match self {
            Slot::Ready(value) | Slot::Pinned { value, .. } => Some(value),
            Slot::Building(_) => None,
        }
    }

    /// Build this slot is waiting on, if any
    fn builder(&self) -> Option<&Arc<InFlight<V, E>>> {
        match self {
            Slot::Building(flight) | Slot::Pinned { builder: flight, .. } => Some(flight),
            Slot::Ready(_) => None,
        }
    }
}

enum Lookup<V, E> {
    Ready(V),
    Failed(E),
    Retry,
    Claimed(Arc<InFlight<V, E>>),
}

/// Shared state of one build in progress
struct InFlight<V, E> {
    outcome: Mutex<Option<Outcome<V, E>>>,
    finished: Condvar,
}

#[derive(Clone)]
enum Outcome<V, E> {
    Built(V),
    Failed(E),

    /// The builder panicked
    Abandoned,
}

impl<V: Clone, E: Clone> InFlight<V, E> {
    fn new() -> InFlight<V, E> {
        InFlight {
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    /// Resolve the build, unless something already did. Returns the outcome that stuck.
    fn complete(&self, outcome: Outcome<V, E>) -> Outcome<V, E> {
        let mut current = self.outcome.lock();
        let settled = current.get_or_insert(outcome).clone();
        self.finished.notify_all();
        settled
    }

    fn wait(&self) -> Outcome<V, E> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return outcome.clone();
            }
            self.finished.wait(&mut outcome);
        }
    }
}

/// Resolves the marker if the factory unwinds
struct BuildGuard<'c, K: Eq + Hash + Clone, V: Clone, E: Clone> {
    cache: &'c ProxyCache<K, V, E>,
    key: &'c K,
    flight: Arc<InFlight<V, E>>,
    armed: bool,
}

impl<'c, K: Eq + Hash + Clone, V: Clone, E: Clone> Drop for BuildGuard<'c, K, V, E> {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("Cache build abandoned, releasing waiters");
            self.cache.settle(self.key, &self.flight, None);
            self.flight.complete(Outcome::Abandoned);
        }
    }
}

impl<K, V, E> ProxyCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        ProxyCache {
            map: DashMap::new(),
        }
    }

    /// Cache with a given number of shards (a power of two greater than one)
    pub fn with_shard_amount(shard_amount: usize) -> Self {
        ProxyCache {
            map: DashMap::with_shard_amount(shard_amount),
        }
    }

    /// Get the value for a key, building it if needed
    ///
    /// Across all threads, `factory` runs at most once at a time per key and, once it succeeds,
    /// never again for that key (until the entry is removed). Callers arriving while a build is
    /// running wait for it and receive the same value or the same error. Errors are not cached: a
    /// later call will try again.
    ///
    /// If a value is inserted for the key while the factory runs, every caller (this one
    /// included) receives the inserted value and the factory's result is dropped.
    ///
    /// The factory must not request the same key from this cache (that would wait on itself).
    pub fn get_or_build<F>(&self, key: K, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let flight = loop {
            match self.lookup_or_claim(&key) {
                Lookup::Ready(value) => return Ok(value),
                Lookup::Failed(err) => return Err(err),
                Lookup::Retry => continue,
                Lookup::Claimed(flight) => break flight,
            }
        };
        self.run_build(&key, flight, factory)
    }

    /// Find a finished value (waiting on a build in flight if there is one) or register a marker
    /// for a new build
    fn lookup_or_claim(&self, key: &K) -> Lookup<V, E> {
        let in_flight = match self.map.get(key) {
            Some(slot) => match slot.value() {
                Slot::Ready(value) | Slot::Pinned { value, .. } => {
                    log::trace!("Cache hit");
                    return Lookup::Ready(value.clone());
                }
                Slot::Building(flight) => Some(flight.clone()),
            },
            None => None,
        };
        if let Some(flight) = in_flight {
            return match flight.wait() {
                Outcome::Built(value) => Lookup::Ready(value),
                Outcome::Failed(err) => Lookup::Failed(err),
                Outcome::Abandoned => Lookup::Retry,
            };
        }

        let flight = Arc::new(InFlight::new());
        match self.map.entry(key.clone()) {
            Entry::Occupied(_) => Lookup::Retry,
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Building(flight.clone()));
                Lookup::Claimed(flight)
            }
        }
    }

    fn run_build<F>(&self, key: &K, flight: Arc<InFlight<V, E>>, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        log::debug!("Cache miss, building");
        let mut guard = BuildGuard {
            cache: self,
            key,
            flight,
            armed: true,
        };
        let result = factory();
        guard.armed = false;

        let outcome = match &result {
            Ok(value) => {
                self.settle(key, &guard.flight, Some(value.clone()));
                Outcome::Built(value.clone())
            }
            Err(err) => {
                log::debug!("Cache build failed, not caching the failure");
                self.settle(key, &guard.flight, None);
                Outcome::Failed(err.clone())
            }
        };

        match guard.flight.complete(outcome) {
            Outcome::Built(value) => Ok(value),
            Outcome::Failed(err) => Err(err),
            Outcome::Abandoned => result,
        }
    }

    /// Replace the marker of a finished build with its value (or drop it), and release an
    /// entry pinned by that build
    fn settle(&self, key: &K, flight: &Arc<InFlight<V, E>>, built: Option<V>) {
        if let Entry::Occupied(mut occupied) = self.map.entry(key.clone()) {
            let ours = matches!(
                occupied.get().builder(),
                Some(builder) if Arc::ptr_eq(builder, flight)
            );
            if !ours {
                return;
            }
            let pinned = match occupied.get() {
                Slot::Pinned { value, .. } => Some(value.clone()),
                _ => None,
            };
            match pinned.or(built) {
                Some(value) => {
                    occupied.insert(Slot::Ready(value));
                }
                None => {
                    occupied.remove();
                }
            }
        }
    }

    /// Finished value for a key
    pub fn get(&self, key: &K) -> Option<V> {
        self.map
            .get(key)
            .and_then(|slot| slot.value().visible().cloned())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert a finished value, returning the finished value it replaced
    ///
    /// If a build for the key is in flight, the inserted value wins: the build's waiters and its
    /// builder receive it, and the entry can not be removed until that build returns.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        match self.map.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Ready(value));
                None
            }
            Entry::Occupied(mut occupied) => {
                let slot = match occupied.get().builder().cloned() {
                    Some(builder) => {
                        builder.complete(Outcome::Built(value.clone()));
                        Slot::Pinned { value, builder }
                    }
                    None => Slot::Ready(value),
                };
                match occupied.insert(slot) {
                    Slot::Ready(previous) | Slot::Pinned { value: previous, .. } => Some(previous),
                    Slot::Building(_) => None,
                }
            }
        }
    }

    /// Remove a finished value (builds in flight, and values pinned by them, are left alone)
    pub fn remove(&self, key: &K) -> Option<V> {
        match self
            .map
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready(_)))
        {
            Some((_, Slot::Ready(value))) => {
                log::debug!("Evicted cache entry");
                Some(value)
            }
            _ => None,
        }
    }

    /// Remove every finished value
    pub fn clear(&self) {
        self.map.retain(|_, slot| slot.builder().is_some());
    }

    /// Number of finished values
    pub fn len(&self) -> usize {
        self.map
            .iter()
            .filter(|slot| slot.value().visible().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the finished entries
    ///
    /// Shards are visited one at a time, so this never blocks the whole cache. Entries added or
    /// removed concurrently may or may not appear, but each key appears at most once.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.map
            .iter()
            .filter_map(|slot| {
                let value = slot.value().visible()?.clone();
                Some((slot.key().clone(), value))
            })
            .collect()
    }

    /// Snapshot of the keys of finished entries
    pub fn keys(&self) -> Vec<K> {
        self.map
            .iter()
            .filter(|slot| slot.value().visible().is_some())
            .map(|slot| slot.key().clone())
            .collect()
    }
}

impl<K, V, E> Default for ProxyCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        ProxyCache::new()
    }
}

impl<K, V, E> fmt::Debug for ProxyCache<K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
    E: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_build_under_contention() {
        const THREADS: usize = 16;
        let cache: Arc<ProxyCache<&'static str, Arc<String>, String>> =
            Arc::new(ProxyCache::with_shard_amount(8));
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = cache.clone();
                let builds = builds.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_build("key", || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(Arc::new(String::from("built")))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache: ProxyCache<u32, u32, String> = ProxyCache::new();
        let attempts = AtomicUsize::new(0);

        let first = cache.get_or_build(1, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(String::from("bad contract"))
        });
        assert_eq!(first, Err(String::from("bad contract")));
        assert!(cache.get(&1).is_none());
        assert!(cache.is_empty());

        let second = cache.get_or_build(1, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });
        assert_eq!(second, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        // Now it sticks
        let third = cache.get_or_build(1, || Err(String::from("unused")));
        assert_eq!(third, Ok(7));
    }

    #[test]
    fn panicking_build_releases_the_key() {
        let cache: Arc<ProxyCache<u32, u32, ()>> = Arc::new(ProxyCache::new());

        let panicking = {
            let cache = cache.clone();
            thread::spawn(move || cache.get_or_build(5, || panic!("factory blew up")))
        };
        assert!(panicking.join().is_err());

        assert_eq!(cache.get_or_build(5, || Ok(50)), Ok(50));
        assert_eq!(cache.get(&5), Some(50));
    }

    #[test]
    fn concurrent_callers_share_one_failure() {
        const THREADS: usize = 8;
        let cache: Arc<ProxyCache<u32, u32, String>> = Arc::new(ProxyCache::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = cache.clone();
                let builds = builds.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_build(3, || {
                        builds.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                        Err(String::from("bad contract"))
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Err(String::from("bad contract")));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn waiters_retry_after_a_panicking_build() {
        let cache: Arc<ProxyCache<u32, u32, ()>> = Arc::new(ProxyCache::new());
        let started = Arc::new(Barrier::new(2));

        let panicking = {
            let cache = cache.clone();
            let started = started.clone();
            thread::spawn(move || {
                cache.get_or_build(5, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    panic!("factory blew up")
                })
            })
        };
        started.wait();

        // Blocks on the marker until the build above unwinds, then builds itself
        let waiter = {
            let cache = cache.clone();
            thread::spawn(move || cache.get_or_build(5, || Ok(50)))
        };

        assert!(panicking.join().is_err());
        assert_eq!(waiter.join().unwrap(), Ok(50));
        assert_eq!(cache.get(&5), Some(50));
    }

    #[test]
    fn insert_during_a_build_pins_the_entry() {
        let cache: Arc<ProxyCache<u32, u32, ()>> = Arc::new(ProxyCache::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let builder = {
            let cache = cache.clone();
            let builds = builds.clone();
            let started = started.clone();
            let release = release.clone();
            thread::spawn(move || {
                cache.get_or_build(1, || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    started.wait();
                    release.wait();
                    Ok(10)
                })
            })
        };
        started.wait();

        assert_eq!(cache.insert(1, 5), None);
        assert_eq!(cache.get(&1), Some(5));

        // The build is still running, so the key can not be evicted and built a second time
        assert_eq!(cache.remove(&1), None);
        cache.clear();
        let second = cache.get_or_build(1, || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(20)
        });
        assert_eq!(second, Ok(5));

        release.wait();
        assert_eq!(builder.join().unwrap(), Ok(5));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&1), Some(5));

        // Once the build has returned it is an ordinary entry
        assert_eq!(cache.remove(&1), Some(5));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_and_clear_only_touch_finished_entries() {
        let cache: ProxyCache<u32, &'static str, ()> = ProxyCache::new();
        assert_eq!(cache.insert(1, "one"), None);
        assert_eq!(cache.insert(1, "uno"), Some("one"));
        cache.insert(2, "two");

        assert_eq!(cache.remove(&1), Some("uno"));
        assert_eq!(cache.remove(&1), None);
        assert_eq!(cache.keys(), vec![2]);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn concurrent_insert_remove_and_enumerate() {
        const THREADS: usize = 50;
        const CYCLES: usize = 50;
        let cache: Arc<ProxyCache<(usize, usize), usize, ()>> =
            Arc::new(ProxyCache::with_shard_amount(16));
        let barrier = Arc::new(Barrier::new(THREADS + 1));
        let done = Arc::new(AtomicUsize::new(0));

        // Enumerate the whole time, checking snapshots are never torn
        let observer = {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let done = done.clone();
            thread::spawn(move || {
                barrier.wait();
                while done.load(Ordering::SeqCst) < THREADS {
                    let keys = cache.keys();
                    let unique: HashSet<_> = keys.iter().collect();
                    assert_eq!(unique.len(), keys.len());
                    for (key, value) in cache.entries() {
                        if key.0 != usize::MAX {
                            assert_eq!(value, key.0 * CYCLES + key.1);
                        }
                    }
                }
            })
        };

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                let done = done.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..CYCLES {
                        // Own keys: keep the even ones
                        cache.insert((t, i), t * CYCLES + i);
                        if i % 2 == 1 {
                            assert_eq!(cache.remove(&(t, i)), Some(t * CYCLES + i));
                        }

                        // Shared keys: everyone fights over these
                        let shared = (usize::MAX, i % 5);
                        cache.insert(shared, t);
                        let _ = cache.remove(&shared);
                        let _ = cache.get_or_build(shared, || Ok(t));
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        observer.join().unwrap();

        for t in 0..THREADS {
            for i in 0..CYCLES {
                let expected = if i % 2 == 0 { Some(t * CYCLES + i) } else { None };
                assert_eq!(cache.get(&(t, i)), expected);
            }
        }
        let own = cache.keys().into_iter().filter(|k| k.0 != usize::MAX).count();
        assert_eq!(own, THREADS * CYCLES / 2);
        for i in 0..5 {
            assert!(cache.get(&(usize::MAX, i)).is_some());
        }
    }
}
