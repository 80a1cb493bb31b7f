//! Per-kind entity cache with fan-in of concurrent lookups.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace};

use crate::error::{Result, TrackerError};

type Pending<V> = Shared<BoxFuture<'static, Result<Arc<V>>>>;

/// Counters describing how lookups were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from a resolved entry.
    pub hits: u64,
    /// Started a fetch.
    pub fetches: u64,
    /// Joined a fetch another caller had started.
    pub joined: u64,
}

struct State<K, V> {
    resolved: HashMap<K, Arc<V>>,
    /// Fetches not yet finished, tagged with the generation that started them.
    in_flight: HashMap<K, (u64, Pending<V>)>,
    next_generation: u64,
    stats: CacheStats,
}

impl<K, V> State<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Store a fetched entity under `key` and its aliases.
    ///
    /// If any of those keys already maps to an instance, that instance wins
    /// and is returned; the fetched copy is dropped.
    fn settle(&mut self, aliases: fn(&V) -> Vec<K>, key: K, fetched: Arc<V>) -> Arc<V> {
        if let Some(existing) = self.resolved.get(&key) {
            return existing.clone();
        }

        let aliases = aliases(&fetched);
        let canonical = aliases
            .iter()
            .find_map(|alias| self.resolved.get(alias).cloned())
            .unwrap_or(fetched);

        for alias in aliases {
            self.resolved
                .entry(alias)
                .or_insert_with(|| canonical.clone());
        }
        self.resolved.insert(key, canonical.clone());
        canonical
    }
}

fn lock<K, V>(state: &Mutex<State<K, V>>) -> MutexGuard<'_, State<K, V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map from key to shared entity, fetching each key at most once.
///
/// Concurrent lookups of a key that is being fetched wait for that fetch
/// instead of starting their own. Only successful fetches are remembered;
/// after a failure, the next lookup fetches again.
///
/// A fetch runs on its own task and settles its result into the cache when
/// it finishes, whether or not anyone is still waiting for it.
///
/// An entity may be reachable under several keys (a user by id and by
/// login name). The `aliases` function lists them; once an entity is
/// resolved under any of its keys, every other key maps to the same `Arc`.
pub struct FanInCache<K, V> {
    kind: &'static str,
    aliases: fn(&V) -> Vec<K>,
    state: Arc<Mutex<State<K, V>>>,
}

impl<K, V> FanInCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    V: Send + Sync + 'static,
{
    /// Create a cache whose entities have no keys besides the one they were
    /// looked up with.
    pub fn new(kind: &'static str) -> Self {
        Self::with_aliases(kind, |_| Vec::new())
    }

    /// Create a cache whose entities are also reachable under `aliases`.
    pub fn with_aliases(kind: &'static str, aliases: fn(&V) -> Vec<K>) -> Self {
        Self {
            kind,
            aliases,
            state: Arc::new(Mutex::new(State {
                resolved: HashMap::new(),
                in_flight: HashMap::new(),
                next_generation: 0,
                stats: CacheStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        lock(&self.state)
    }

    /// The resolved entity for `key`, without fetching.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().resolved.get(key).cloned()
    }

    /// Record an entity obtained elsewhere and return the instance now
    /// associated with `key`.
    pub fn insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        self.lock().settle(self.aliases, key, value)
    }

    /// Return the entity for `key`, calling `fetch` only if it is neither
    /// resolved nor already being fetched.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<V>>> + Send + 'static,
    {
        let pending = {
            let mut state = self.lock();
            if let Some(value) = state.resolved.get(&key).cloned() {
                state.stats.hits += 1;
                trace!(kind = self.kind, ?key, "cache hit");
                return Ok(value);
            }
            if let Some((_, pending)) = state.in_flight.get(&key) {
                let pending = pending.clone();
                state.stats.joined += 1;
                trace!(kind = self.kind, ?key, "joining fetch in flight");
                pending
            } else {
                state.stats.fetches += 1;
                state.next_generation += 1;
                let generation = state.next_generation;
                debug!(kind = self.kind, ?key, "fetching");

                let pending = self.start_fetch(key.clone(), generation, fetch());
                state.in_flight.insert(key, (generation, pending.clone()));
                pending
            }
        };

        pending.await
    }

    /// Spawn `fetched` and return a handle every waiter can share.
    ///
    /// On completion the task removes its own in-flight entry and, on
    /// success, records the entity. A fetch outlived by a `clear` is handed
    /// to its waiters but not recorded.
    fn start_fetch<Fut>(&self, key: K, generation: u64, fetched: Fut) -> Pending<V>
    where
        Fut: Future<Output = Result<Arc<V>>> + Send + 'static,
    {
        let state = Arc::downgrade(&self.state);
        let aliases = self.aliases;
        let kind = self.kind;

        let task = tokio::spawn(async move {
            let outcome = fetched.await;
            let Some(shared) = state.upgrade() else {
                return outcome;
            };

            let mut state = lock(&shared);
            let current = state
                .in_flight
                .get(&key)
                .is_some_and(|(owner, _)| *owner == generation);
            if current {
                state.in_flight.remove(&key);
            }
            match outcome {
                Ok(value) if current => Ok(state.settle(aliases, key, value)),
                Ok(value) => Ok(value),
                Err(e) => {
                    debug!(kind, ?key, error = %e, "fetch failed");
                    Err(e)
                }
            }
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(TrackerError::protocol(format!("{} fetch aborted: {}", kind, e)))
            })
        }
        .boxed()
        .shared()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Number of keys with a resolved entity.
    pub fn len(&self) -> usize {
        self.lock().resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every resolved entity. Fetches in flight still complete for
    /// their waiters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.resolved.clear();
        state.in_flight.clear();
    }
}

impl<K, V> fmt::Debug for FanInCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanInCache")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
