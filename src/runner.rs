//! Runs a remote mutation and applies its cache effect.
//!
//! The contract for every mutation:
//! - the cache is only touched after the server confirmed the change
//! - exactly one notification is emitted, success or error
//! - the server's error message reaches the user verbatim
//! - failures are returned to the caller and never retried here

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::cache::{CacheStorage, CacheStore, NoopStorage, QueryClient, Scope};
use crate::error::Result;
use crate::notify::{Notifier, TracingNotifier};

pub struct MutationRunner<S: CacheStorage = NoopStorage> {
  cache: QueryClient<S>,
  notifier: Arc<dyn Notifier>,
}

impl<S: CacheStorage> MutationRunner<S> {
  pub fn new(cache: QueryClient<S>) -> Self {
    Self {
      cache,
      notifier: Arc::new(TracingNotifier),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn cache(&self) -> &QueryClient<S> {
    &self.cache
  }

  /// Await `call`; on success run `effect` against the cache and notify
  /// `success`.
  ///
  /// A failing effect does not fail the mutation: the server already
  /// accepted it, so the cache is invalidated wholesale and refetched on the
  /// next read instead.
  pub async fn run<T, Fut, E>(&self, success: &str, call: Fut, effect: E) -> Result<T>
  where
    Fut: Future<Output = Result<T>>,
    E: FnOnce(&mut CacheStore, &T) -> Result<()>,
  {
    let value = match call.await {
      Ok(value) => value,
      Err(e) => {
        error!(error = %e, status = ?e.status(), "mutation failed");
        self.notifier.error(&e.to_string());
        return Err(e);
      }
    };

    if let Err(e) = self.cache.edit(|store| effect(store, &value)) {
      warn!(error = %e, "cache effect failed; invalidating everything");
      if let Err(e) = self.cache.invalidate(&Scope::All) {
        warn!(error = %e, "failed to invalidate cache");
      }
    }

    debug!(label = success, "mutation applied");
    self.notifier.success(success);
    Ok(value)
  }
}

impl<S: CacheStorage> Clone for MutationRunner<S> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      notifier: Arc::clone(&self.notifier),
    }
  }
}
