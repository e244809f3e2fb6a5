//! Cache storage trait and SQLite implementation.
//!
//! Storage is a write-through mirror of the in-memory store: every changed
//! entry is written as one serialized row, and the whole table is loaded
//! back on startup so views render before the first fetch returns.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::CacheKey;
use super::store::Slot;
use crate::error::{Result, SyncError};

/// One serialized cache entry.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub key: CacheKey,
  /// JSON of the page, entity or stats object
  pub data: Vec<u8>,
  pub cached_at: DateTime<Utc>,
  pub stale: bool,
}

impl StoredEntry {
  pub fn new<V>(key: CacheKey, data: Vec<u8>, slot: &Slot<V>) -> Self {
    Self {
      key,
      data,
      cached_at: slot.fetched_at,
      stale: slot.stale,
    }
  }
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Every stored entry.
  fn load(&self) -> Result<Vec<StoredEntry>>;

  /// Insert or replace an entry.
  fn store(&self, entry: &StoredEntry) -> Result<()>;

  /// Drop the entry with this key hash.
  fn remove(&self, key_hash: &str) -> Result<()>;

  /// Drop everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when persistence is disabled - all operations are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self) -> Result<Vec<StoredEntry>> {
    Ok(Vec::new())
  }

  fn store(&self, _entry: &StoredEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key_hash: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    tracing::debug!(path = %path.display(), "opened cache database");
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("campus-sync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|_| SyncError::LockPoisoned)?;
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key_hash TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    kind TEXT NOT NULL,
    key_json TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    stale INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_kind ON cache_entries(kind);
"#;

impl CacheStorage for SqliteStorage {
  fn load(&self) -> Result<Vec<StoredEntry>> {
    let conn = self.conn.lock().map_err(|_| SyncError::LockPoisoned)?;

    let mut stmt = conn.prepare("SELECT key_json, data, cached_at, stale FROM cache_entries")?;
    let rows: Vec<(String, Vec<u8>, String, bool)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })?
      .collect::<std::result::Result<_, _>>()?;

    let mut entries = Vec::with_capacity(rows.len());
    for (key_json, data, cached_at, stale) in rows {
      // Rows written by an older schema of the key type are skipped, not fatal.
      let key: CacheKey = match serde_json::from_str(&key_json) {
        Ok(key) => key,
        Err(e) => {
          tracing::warn!(error = %e, "skipping unreadable cache row");
          continue;
        }
      };
      entries.push(StoredEntry {
        key,
        data,
        cached_at: parse_datetime(&cached_at)?,
        stale,
      });
    }

    Ok(entries)
  }

  fn store(&self, entry: &StoredEntry) -> Result<()> {
    let conn = self.conn.lock().map_err(|_| SyncError::LockPoisoned)?;
    let key_json = serde_json::to_string(&entry.key)?;

    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (key_hash, description, kind, key_json, data, cached_at, stale)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        entry.key.cache_hash(),
        entry.key.description(),
        entry.key.kind().name(),
        key_json,
        entry.data,
        entry.cached_at.to_rfc3339(),
        entry.stale,
      ],
    )?;

    Ok(())
  }

  fn remove(&self, key_hash: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|_| SyncError::LockPoisoned)?;
    conn.execute("DELETE FROM cache_entries WHERE key_hash = ?", params![key_hash])?;
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|_| SyncError::LockPoisoned)?;
    conn.execute("DELETE FROM cache_entries", [])?;
    Ok(())
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| SyncError::Config(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::ListQuery;
  use crate::model::EntityKind;
  use tempfile::TempDir;

  fn entry(key: CacheKey, stale: bool) -> StoredEntry {
    StoredEntry {
      key,
      data: br#"{"id":"e1"}"#.to_vec(),
      cached_at: Utc::now(),
      stale,
    }
  }

  #[test]
  fn entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let key = CacheKey::list(EntityKind::Expense, ListQuery::new().filter("category", "food"));

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.store(&entry(key.clone(), true)).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    let loaded = storage.load().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].key, key);
    assert!(loaded[0].stale);
    assert_eq!(loaded[0].data, br#"{"id":"e1"}"#.to_vec());
  }

  #[test]
  fn store_replaces_by_key() {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::open_at(dir.path().join("cache.db")).unwrap();
    let key = CacheKey::detail(EntityKind::Job, "j1");

    storage.store(&entry(key.clone(), false)).unwrap();
    storage.store(&entry(key.clone(), true)).unwrap();

    let loaded = storage.load().unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].stale);
  }

  #[test]
  fn remove_and_clear() {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::open_at(dir.path().join("cache.db")).unwrap();
    let job = CacheKey::detail(EntityKind::Job, "j1");
    let stats = CacheKey::stats(EntityKind::Job, "");

    storage.store(&entry(job.clone(), false)).unwrap();
    storage.store(&entry(stats, false)).unwrap();

    storage.remove(&job.cache_hash()).unwrap();
    assert_eq!(storage.load().unwrap().len(), 1);

    storage.clear().unwrap();
    assert!(storage.load().unwrap().is_empty());
  }

  #[test]
  fn noop_storage_never_returns_anything() {
    let storage = NoopStorage;
    storage
      .store(&entry(CacheKey::detail(EntityKind::Job, "j1"), false))
      .unwrap();
    assert!(storage.load().unwrap().is_empty());
  }
}
