//! Query client: the shared cache handle that orchestrates cache reads,
//! network fetching, persistence and change notification.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

use super::key::{CacheKey, ListQuery, Scope};
use super::storage::{CacheStorage, NoopStorage, StoredEntry};
use super::store::{CacheStore, ConflictPolicy};
use super::traits::{CacheEvent, CacheResult, Change, TopLevel};
use crate::error::{Result, SyncError};
use crate::model::{EntityKind, Page};

/// Shared handle to the process-wide cache.
///
/// Cloning is cheap; every clone sees the same store. The store lock is only
/// held for synchronous edits and never across a fetch.
pub struct QueryClient<S: CacheStorage = NoopStorage> {
  store: Arc<Mutex<CacheStore>>,
  storage: Arc<S>,
  subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<CacheEvent>>>>,
  /// Per-key locks of fetches in progress
  in_flight: Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>,
  /// How long before cached data is considered stale
  stale_time: Duration,
  /// Serve stale data when a refetch fails
  offline_fallback: bool,
}

impl QueryClient<NoopStorage> {
  /// In-memory client with no persistence.
  pub fn in_memory() -> Self {
    Self::new(NoopStorage)
  }
}

impl<S: CacheStorage> QueryClient<S> {
  /// Create a new client with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      store: Arc::new(Mutex::new(CacheStore::new())),
      storage: Arc::new(storage),
      subscribers: Arc::new(Mutex::new(Vec::new())),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      stale_time: Duration::minutes(5),
      offline_fallback: true,
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_offline_fallback(mut self, enabled: bool) -> Self {
    self.offline_fallback = enabled;
    self
  }

  /// Replaces the store, so call before the client is shared or hydrated.
  pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
    self.store = Arc::new(Mutex::new(CacheStore::with_policy(policy)));
    self
  }

  pub fn stale_time(&self) -> Duration {
    self.stale_time
  }

  /// Load persisted entries into memory. Returns how many were restored.
  ///
  /// Unreadable entries are dropped from storage rather than failing
  /// startup.
  pub fn hydrate(&self) -> Result<usize> {
    let entries = self.storage.load()?;
    let mut store = self.lock()?;
    let mut restored = 0;

    for entry in entries {
      let hash = entry.key.cache_hash();
      let description = entry.key.description();
      match store.import(entry) {
        Ok(()) => restored += 1,
        Err(e) => {
          warn!(entry = %description, error = %e, "dropping unreadable cache entry");
          if let Err(e) = self.storage.remove(&hash) {
            warn!(error = %e, "failed to drop cache entry");
          }
        }
      }
    }

    debug!(restored, "hydrated cache");
    Ok(restored)
  }

  // ==========================================================================
  // Cache-first reads
  // ==========================================================================

  /// Fetch a list page with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, wait for any fetch of the same key already running
  /// 3. Still stale: fetch from network, update cache
  /// 4. On network failure, return stale cache (offline mode)
  pub async fn fetch_list<T, F, Fut>(
    &self,
    query: &ListQuery,
    fetcher: F,
  ) -> Result<CacheResult<Page<T>>>
  where
    T: TopLevel,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
  {
    let stale_time = self.stale_time;
    let put_query = query.clone();
    self
      .fetch_through(
        CacheKey::list(T::KIND, query.clone()),
        |store| {
          store
            .list::<T>(query)
            .map(|slot| (slot.value.clone(), slot.fetched_at, slot.is_fresh(stale_time)))
        },
        fetcher,
        move |store, page| store.put_list(put_query, page),
      )
      .await
  }

  /// Fetch a single entity with caching.
  pub async fn fetch_one<T, F, Fut>(&self, id: &str, fetcher: F) -> Result<CacheResult<T>>
  where
    T: TopLevel,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let stale_time = self.stale_time;
    self
      .fetch_through(
        CacheKey::detail(T::KIND, id),
        |store| {
          store
            .detail::<T>(id)
            .map(|slot| (slot.value.clone(), slot.fetched_at, slot.is_fresh(stale_time)))
        },
        fetcher,
        |store, entity| store.put_detail(entity),
      )
      .await
  }

  /// Fetch an aggregate stats object with caching.
  pub async fn fetch_stats<F, Fut>(
    &self,
    kind: EntityKind,
    params: &str,
    fetcher: F,
  ) -> Result<CacheResult<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
  {
    let stale_time = self.stale_time;
    self
      .fetch_through(
        CacheKey::stats(kind, params),
        |store| {
          store
            .stats(kind, params)
            .map(|slot| (slot.value.clone(), slot.fetched_at, slot.is_fresh(stale_time)))
        },
        fetcher,
        |store, value| store.put_stats(kind, params, value),
      )
      .await
  }

  async fn fetch_through<V, F, Fut>(
    &self,
    key: CacheKey,
    lookup: impl Fn(&CacheStore) -> Option<(V, DateTime<Utc>, bool)>,
    fetcher: F,
    put: impl FnOnce(&mut CacheStore, V),
  ) -> Result<CacheResult<V>>
  where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
  {
    if let Some((data, cached_at, true)) = self.read(&lookup)? {
      return Ok(CacheResult::from_cache(data, cached_at, false));
    }

    // One fetch per key at a time; whoever waited re-reads what it stored.
    let gate = self.gate(&key)?;
    let result = {
      let _turn = gate.lock().await;
      let cached = self.read(&lookup)?;
      match cached {
        Some((data, cached_at, true)) => Ok(CacheResult::from_cache(data, cached_at, false)),
        cached => self.fetch_and_store(&key, cached, fetcher, put).await,
      }
    };
    self.release(&key, gate);
    result
  }

  async fn fetch_and_store<V, F, Fut>(
    &self,
    key: &CacheKey,
    cached: Option<(V, DateTime<Utc>, bool)>,
    fetcher: F,
    put: impl FnOnce(&mut CacheStore, V),
  ) -> Result<CacheResult<V>>
  where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
  {
    debug!(entry = %key.description(), "fetching");
    match fetcher().await {
      Ok(data) => {
        let fetched = data.clone();
        self.edit(|store| {
          put(store, fetched);
          Ok(())
        })?;
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match cached {
        Some((data, cached_at, _)) if self.offline_fallback => {
          warn!(entry = %key.description(), error = %e, "refetch failed; serving cached copy");
          Ok(CacheResult::offline(data, cached_at))
        }
        _ => Err(e),
      },
    }
  }

  /// The lock serializing fetches of `key`.
  fn gate(&self, key: &CacheKey) -> Result<Arc<AsyncMutex<()>>> {
    let mut in_flight = self.in_flight.lock().map_err(|_| SyncError::LockPoisoned)?;
    Ok(Arc::clone(in_flight.entry(key.clone()).or_default()))
  }

  /// Forget the gate of `key` once nobody else holds or waits on it.
  fn release(&self, key: &CacheKey, gate: Arc<AsyncMutex<()>>) {
    let Ok(mut in_flight) = self.in_flight.lock() else {
      return;
    };
    // One reference in the map, one here
    if Arc::strong_count(&gate) <= 2 {
      in_flight.remove(key);
    }
  }

  // ==========================================================================
  // Edits
  // ==========================================================================

  /// Read the store under its lock.
  pub fn read<R>(&self, f: impl FnOnce(&CacheStore) -> R) -> Result<R> {
    let store = self.lock()?;
    Ok(f(&store))
  }

  /// Edit the store under its lock, then persist and broadcast whatever
  /// changed. Changes made before `f` fails are flushed too.
  pub fn edit<R>(&self, f: impl FnOnce(&mut CacheStore) -> Result<R>) -> Result<R> {
    let (result, events, writes) = {
      let mut store = self.lock()?;
      let result = f(&mut store);
      let events = store.take_changes();
      let writes = Self::collect_writes(&store, &events);
      (result, events, writes)
    };

    self.persist(writes);
    self.broadcast(&events);
    result
  }

  pub fn invalidate(&self, scope: &Scope) -> Result<usize> {
    self.edit(|store| Ok(store.invalidate(scope)))
  }

  /// Drop all cached data, in memory and on disk.
  pub fn clear(&self) -> Result<()> {
    self.edit(|store| {
      store.clear();
      Ok(())
    })
  }

  /// Receive every cache change from now on.
  pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<CacheEvent>> {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .subscribers
      .lock()
      .map_err(|_| SyncError::LockPoisoned)?
      .push(tx);
    Ok(rx)
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheStore>> {
    self.store.lock().map_err(|_| SyncError::LockPoisoned)
  }

  fn collect_writes(store: &CacheStore, events: &[CacheEvent]) -> Vec<Write> {
    let mut seen = HashSet::new();
    let mut writes = Vec::new();

    for event in events {
      let Some(key) = &event.key else {
        writes.push(Write::Clear);
        seen.clear();
        continue;
      };
      if !seen.insert(key.clone()) {
        continue;
      }
      match (event.change, store.export(key)) {
        (Change::Removed, _) | (_, Ok(None)) => writes.push(Write::Remove(key.cache_hash())),
        (_, Ok(Some(entry))) => writes.push(Write::Store(entry)),
        (_, Err(e)) => warn!(entry = %key.description(), error = %e, "failed to serialize cache entry"),
      }
    }

    writes
  }

  fn persist(&self, writes: Vec<Write>) {
    for write in writes {
      let result = match &write {
        Write::Store(entry) => self.storage.store(entry),
        Write::Remove(hash) => self.storage.remove(hash),
        Write::Clear => self.storage.clear(),
      };
      if let Err(e) = result {
        warn!(error = %e, "failed to persist cache change");
      }
    }
  }

  fn broadcast(&self, events: &[CacheEvent]) {
    if events.is_empty() {
      return;
    }
    let Ok(mut subscribers) = self.subscribers.lock() else {
      warn!("subscriber list poisoned; dropping cache events");
      return;
    };
    subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
  }
}

enum Write {
  Store(StoredEntry),
  Remove(String),
  Clear,
}

impl<S: CacheStorage> Clone for QueryClient<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      storage: Arc::clone(&self.storage),
      subscribers: Arc::clone(&self.subscribers),
      in_flight: Arc::clone(&self.in_flight),
      stale_time: self.stale_time,
      offline_fallback: self.offline_fallback,
    }
  }
}
