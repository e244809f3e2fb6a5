//! Client-side collection cache.
//!
//! This module provides:
//! - Typed list, detail and stats entries keyed by [`CacheKey`]
//! - Local mutation handlers that keep every cached copy of an entity in step
//! - Scoped invalidation for what can't be patched locally
//! - Write-through persistence and basic offline mode (serve stale cache when
//!   the network is unavailable)

mod key;
mod layer;
mod membership;
mod patch;
mod storage;
mod store;
mod traits;

pub use key::{CacheKey, ListQuery, Scope, DEFAULT_PAGE_SIZE};
pub use layer::QueryClient;
pub use membership::Membership;
pub use patch::Patch;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage, StoredEntry};
pub use store::{CacheStore, ConflictPolicy, EntryInfo, Slot, Table};
pub use traits::{CacheEvent, CacheResult, CacheSource, Change, Container, Nested, TopLevel};
