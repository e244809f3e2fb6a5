//! Async query abstraction for cached views.
//!
//! Inspired by TanStack Query, a `Query<T>` owns one cache-backed view (a
//! list page, a detail, a stats object). It fetches in the background,
//! exposes loading/success/error state, and watches the shared cache so a
//! mutation anywhere in the process refreshes it.
//!
//! # Example
//!
//! ```ignore
//! let mut query = campus.list_query::<Expense>(ListQuery::new())?;
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(page) => render_page(page),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::cache::{CacheEvent, CacheKey, CacheResult, CacheSource, Change};
use crate::error::Result;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started, or its entity was deleted
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<CacheResult<T>>> + Send + Sync>;

/// Async query for one cached view.
///
/// Query<T> encapsulates:
/// - The cache key it renders
/// - The fetching logic (via a closure, normally a cache-first read)
/// - Loading/success/error states
/// - Async result handling via channels
/// - A subscription to cache changes that triggers refetches
pub struct Query<T> {
  key: CacheKey,
  state: QueryState<T>,
  source: Option<CacheSource>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<CacheResult<T>>>>,
  events: Option<mpsc::UnboundedReceiver<CacheEvent>>,
  fetched_at: Option<Instant>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query for `key` with the given fetcher function.
  ///
  /// The fetcher is called each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(key: CacheKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CacheResult<T>>> + Send + 'static,
  {
    Self {
      key,
      state: QueryState::Idle,
      source: None,
      fetcher: Box::new(move || fetcher().boxed()),
      receiver: None,
      events: None,
      fetched_at: None,
    }
  }

  /// Follow cache changes from `QueryClient::subscribe`.
  pub fn watching(mut self, events: mpsc::UnboundedReceiver<CacheEvent>) -> Self {
    self.events = Some(events);
    self
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Where the current data came from.
  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  /// Check if the query is currently loading.
  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Check if the query succeeded.
  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  /// Check if the query failed.
  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error message if the query failed.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// When the current data arrived.
  pub fn fetched_at(&self) -> Option<Instant> {
    self.fetched_at
  }

  /// Whether a fetch is in flight, including background refreshes that
  /// keep showing the previous data.
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  /// Start fetching data if not already fetching.
  ///
  /// This is a no-op if a fetch is already in flight.
  pub fn fetch(&mut self) {
    if self.is_fetching() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Cancel any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results and cache changes.
  ///
  /// Returns `true` if the state changed (data arrived, error occurred or
  /// the entity went away). Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_result();

    match self.pending_change() {
      Some(Change::Removed) if self.key.is_detail() => {
        self.receiver = None;
        self.state = QueryState::Idle;
        self.source = None;
        changed = true;
      }
      Some(_) => {
        // A fetch already in flight may have read the old entry. The
        // refetch is cache-first, so an entry another writer just filled is
        // served from memory.
        self.refetch();
      }
      None => {}
    }

    changed
  }

  fn poll_result(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(Ok(result)) => {
        self.state = QueryState::Success(result.data);
        self.source = Some(result.source);
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error.to_string());
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Drain queued cache events; returns the most significant change that
  /// concerns this query.
  fn pending_change(&mut self) -> Option<Change> {
    let events = self.events.as_mut()?;
    let mut relevant = None;

    while let Ok(event) = events.try_recv() {
      if !event.concerns(&self.key) {
        continue;
      }
      relevant = match (relevant, event.change) {
        (_, Change::Removed) | (Some(Change::Removed), _) => Some(Change::Removed),
        (_, change) => Some(change),
      };
    }

    // Until the first fetch there is nothing on screen to refresh.
    if matches!(self.state, QueryState::Idle) && relevant != Some(Change::Removed) {
      return None;
    }
    relevant
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    if !self.state.is_success() {
      self.state = QueryState::Loading;
    }

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.
// If you need to share a query, wrap it in Arc<Mutex<Query<T>>>.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("source", &self.source)
      .field("fetched_at", &self.fetched_at)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Patch, QueryClient};
  use crate::error::SyncError;
  use crate::model::{EntityKind, Expense};
  use std::time::Duration;

  fn expense(amount: f64) -> Expense {
    Expense {
      id: "e1".to_string(),
      title: "Textbook".to_string(),
      amount,
      category: "books".to_string(),
      date: "2026-09-01".to_string(),
      note: None,
      created_at: None,
      updated_at: None,
    }
  }

  fn key() -> CacheKey {
    CacheKey::detail(EntityKind::Expense, "e1")
  }

  fn detail_query(client: &QueryClient) -> Query<Expense> {
    let cache = client.clone();
    Query::new(key(), move || {
      let cache = cache.clone();
      async move { cache.fetch_one("e1", || async { Ok(expense(40.0)) }).await }
    })
    .watching(client.subscribe().unwrap())
  }

  async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  /// Fetch, then let the re-read triggered by the fetch's own write finish.
  async fn load(query: &mut Query<Expense>) {
    query.fetch();
    settle().await;
    query.poll();
    settle().await;
    query.poll();
    assert!(!query.is_fetching());
  }

  #[tokio::test]
  async fn test_query_success() {
    let client = QueryClient::in_memory();
    let mut query = detail_query(&client);

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    // Wait for the result
    settle().await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data().map(|e| e.amount), Some(40.0));
    assert_eq!(query.source(), Some(CacheSource::Network));
  }

  #[tokio::test]
  async fn watchers_of_one_key_share_a_refetch() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let client = QueryClient::in_memory();
    let calls = Arc::new(AtomicUsize::new(0));
    let watcher = |client: &QueryClient| {
      let cache = client.clone();
      let calls = Arc::clone(&calls);
      Query::new(key(), move || {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        async move {
          cache
            .fetch_one("e1", || async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(Duration::from_millis(5)).await;
              Ok(expense(40.0))
            })
            .await
        }
      })
      .watching(client.subscribe().unwrap())
    };
    let mut list_row = watcher(&client);
    let mut sidebar = watcher(&client);
    load(&mut list_row).await;
    load(&mut sidebar).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client
      .invalidate(&crate::cache::Scope::Detail(EntityKind::Expense, "e1".to_string()))
      .unwrap();
    list_row.poll();
    sidebar.poll();
    settle().await;
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> = Query::new(key(), || async {
      Err(SyncError::Api {
        status: 500,
        message: "Something went wrong".to_string(),
      })
    });

    query.fetch();
    settle().await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error(), Some("Something went wrong"));
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let mut query = Query::new(key(), || async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok(CacheResult::from_network(42))
    });

    query.fetch();
    assert!(query.is_loading());

    // Second fetch should be no-op
    query.fetch();
    assert!(query.is_loading());
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(key(), move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(CacheResult::from_network(
          counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        ))
      }
    });

    query.fetch();
    settle().await;

    // Refetch should cancel the first and start a new one
    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Only the second fetch should have completed and been received
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn local_edit_refreshes_query() {
    let client = QueryClient::in_memory();
    let mut query = detail_query(&client);
    load(&mut query).await;

    client
      .edit(|store| store.on_update::<Expense>("e1", &Patch::new().set("amount", 55.0)))
      .unwrap();

    query.poll();
    assert!(query.is_fetching());
    assert!(query.is_success());
    settle().await;
    assert!(query.poll());
    assert_eq!(query.data().map(|e| e.amount), Some(55.0));
    assert_eq!(query.source(), Some(CacheSource::CacheFresh));
  }

  #[tokio::test]
  async fn deleted_entity_resets_query() {
    let client = QueryClient::in_memory();
    let mut query = detail_query(&client);
    load(&mut query).await;

    client
      .edit(|store| {
        store.on_delete::<Expense>("e1");
        Ok(())
      })
      .unwrap();

    assert!(query.poll());
    assert!(matches!(query.state(), QueryState::Idle));
  }

  #[tokio::test]
  async fn unrelated_changes_are_ignored() {
    let client = QueryClient::in_memory();
    let mut query = detail_query(&client);
    load(&mut query).await;

    client
      .invalidate(&crate::cache::Scope::Lists(EntityKind::Expense))
      .unwrap();
    client
      .edit(|store| {
        store.put_detail(Expense {
          id: "e2".to_string(),
          ..expense(1.0)
        });
        Ok(())
      })
      .unwrap();

    assert!(!query.poll());
    assert!(query.is_success());
  }
}
