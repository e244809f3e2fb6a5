//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

use super::key::CacheKey;
use super::store::{CacheStore, Table};
use crate::model::Entity;

/// An entity cached in its own list and detail entries.
pub trait TopLevel: Entity {
  fn table(store: &CacheStore) -> &Table<Self>;
  fn table_mut(store: &mut CacheStore) -> &mut Table<Self>;
}

/// An entity that only lives inside a top-level parent (columns and tasks in
/// a board, answers in a question).
pub trait Nested: Entity {
  /// The cached entity that owns the containers
  type Root: TopLevel;

  /// JSON field carrying the container id, e.g. `columnId`
  const CONTAINER_FIELD: &'static str;

  /// Id of the container this entity says it belongs to.
  fn container_id(&self) -> &str;

  /// Every child collection of this kind inside `root`.
  fn containers_mut(root: &mut Self::Root) -> Vec<Container<'_, Self>>;

  /// Keep counters on the root in step with local inserts and removals.
  fn adjust_count(_root: &mut Self::Root, _delta: i64) {}

  /// Whether this copy of `root` embeds every child of this kind. List
  /// responses often carry summaries with the children left out.
  fn embeds_children(_root: &Self::Root) -> bool {
    true
  }
}

/// A child collection inside a cached root, with the id of its owner.
pub struct Container<'a, T> {
  pub id: &'a str,
  pub items: &'a mut Vec<T>,
}

impl<T: Entity> Container<'_, T> {
  pub fn position(&self, id: &str) -> Option<usize> {
    self.items.iter().position(|item| item.id() == id)
  }

  pub fn holds(&self, id: &str) -> bool {
    self.position(id).is_some()
  }

  /// Remove every copy of `id`; returns how many were dropped.
  pub fn remove(&mut self, id: &str) -> usize {
    let before = self.items.len();
    self.items.retain(|item| item.id() != id);
    before - self.items.len()
  }
}

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Refetch failed; serving the last known-good copy.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale
  CacheStale,
  /// Network unavailable, serving stale cached data
  Offline,
}

/// What happened to a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
  /// New value written (fetch or local edit)
  Updated,
  /// Marked stale; next read refetches
  Invalidated,
  /// Entry dropped
  Removed,
  /// Whole cache reset
  Cleared,
}

/// Notification sent to subscribers after every cache edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
  /// `None` for `Change::Cleared`
  pub key: Option<CacheKey>,
  pub change: Change,
}

impl CacheEvent {
  pub fn updated(key: CacheKey) -> Self {
    Self {
      key: Some(key),
      change: Change::Updated,
    }
  }

  pub fn invalidated(key: CacheKey) -> Self {
    Self {
      key: Some(key),
      change: Change::Invalidated,
    }
  }

  pub fn removed(key: CacheKey) -> Self {
    Self {
      key: Some(key),
      change: Change::Removed,
    }
  }

  pub fn cleared() -> Self {
    Self {
      key: None,
      change: Change::Cleared,
    }
  }

  /// Whether a reader of `key` should look again.
  pub fn concerns(&self, key: &CacheKey) -> bool {
    self.key.as_ref().map_or(true, |k| k == key)
  }
}
