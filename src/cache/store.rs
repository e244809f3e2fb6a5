//! The in-memory collection cache and the rules that keep it in step with
//! the server after mutations.
//!
//! Every edit follows a two-tier policy: patch cache entries in place when
//! the change can be expressed locally, mark them stale when it can't (server
//! side search, aggregates, unknown parents). Edits never guess.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::key::{CacheKey, ListQuery, Scope};
use super::membership::Membership;
use super::patch::Patch;
use super::storage::StoredEntry;
use super::traits::{CacheEvent, Nested, TopLevel};
use crate::error::Result;
use crate::model::{
  Application, Board, Entity, EntityKind, Expense, Income, InsertAt, Job, Page, Question,
};

/// Kinds that own their own table.
const TOP_LEVEL: [EntityKind; 6] = [
  EntityKind::Expense,
  EntityKind::Income,
  EntityKind::Job,
  EntityKind::Application,
  EntityKind::Board,
  EntityKind::Question,
];

/// What to do when two updates for the same entity land out of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
  /// The last response to arrive overwrites the cache
  #[default]
  LastWriteWins,
  /// Drop patches whose `updatedAt` is older than the cached copy
  NewerWins,
}

impl ConflictPolicy {
  fn accepts(self, cached: Option<&str>, incoming: Option<&str>) -> bool {
    match (self, cached, incoming) {
      (Self::NewerWins, Some(cached), Some(incoming)) => incoming >= cached,
      _ => true,
    }
  }
}

/// A cached value with its freshness metadata.
#[derive(Debug, Clone)]
pub struct Slot<V> {
  pub value: V,
  pub fetched_at: DateTime<Utc>,
  /// Set by invalidation; the next read refetches
  pub stale: bool,
}

impl<V> Slot<V> {
  fn fresh(value: V) -> Self {
    Self {
      value,
      fetched_at: Utc::now(),
      stale: false,
    }
  }

  pub fn is_fresh(&self, stale_time: chrono::Duration) -> bool {
    !self.stale && Utc::now() - self.fetched_at <= stale_time
  }
}

/// Marks a slot stale; returns false if it already was.
fn mark_stale<V>(slot: &mut Slot<V>) -> bool {
  !std::mem::replace(&mut slot.stale, true)
}

/// Summary of one cache entry.
#[derive(Debug, Clone)]
pub struct EntryInfo {
  pub key: CacheKey,
  pub fetched_at: DateTime<Utc>,
  pub stale: bool,
}

// ============================================================================
// Per-kind tables
// ============================================================================

/// List pages and detail entries of one top-level kind.
#[derive(Debug)]
pub struct Table<T> {
  lists: BTreeMap<ListQuery, Slot<Page<T>>>,
  details: BTreeMap<String, Slot<T>>,
}

impl<T> Default for Table<T> {
  fn default() -> Self {
    Self {
      lists: BTreeMap::new(),
      details: BTreeMap::new(),
    }
  }
}

impl<T: Entity> Table<T> {
  pub fn list(&self, query: &ListQuery) -> Option<&Slot<Page<T>>> {
    self.lists.get(query)
  }

  pub fn detail(&self, id: &str) -> Option<&Slot<T>> {
    self.details.get(id)
  }

  /// Run `edit` on every cached copy of every entity in this table.
  ///
  /// An entry with any `Edit::Stale` copy is marked stale (edits to its other
  /// copies are kept); otherwise it is reported updated if anything changed.
  fn edit_all(&mut self, mut edit: impl FnMut(&mut T) -> Edit) -> Vec<CacheEvent> {
    let mut events = Vec::new();

    for (id, slot) in self.details.iter_mut() {
      let key = CacheKey::detail(T::KIND, id.as_str());
      let outcome = edit(&mut slot.value);
      events.extend(outcome.apply(slot, key));
    }

    for (query, slot) in self.lists.iter_mut() {
      let key = CacheKey::list(T::KIND, query.clone());
      let outcome = slot
        .value
        .items
        .iter_mut()
        .fold(Edit::Untouched, |acc, item| acc.max(edit(item)));
      events.extend(outcome.apply(slot, key));
    }

    events
  }
}

/// What an edit did to one cached copy of a root entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Edit {
  Untouched,
  Changed,
  /// The copy can't take the edit (a summary without its children)
  Stale,
}

impl Edit {
  fn changed(hit: bool) -> Self {
    if hit {
      Self::Changed
    } else {
      Self::Untouched
    }
  }

  fn apply<V>(self, slot: &mut Slot<V>, key: CacheKey) -> Option<CacheEvent> {
    match self {
      Self::Untouched => None,
      Self::Changed => Some(CacheEvent::updated(key)),
      Self::Stale => mark_stale(slot).then(|| CacheEvent::invalidated(key)),
    }
  }
}

/// Later pages of a view that lost an item now start one entry early.
fn stale_later_pages<T>(
  lists: &mut BTreeMap<ListQuery, Slot<Page<T>>>,
  shrunk: &[ListQuery],
  kind: EntityKind,
) -> Vec<CacheEvent> {
  if shrunk.is_empty() {
    return Vec::new();
  }

  lists
    .iter_mut()
    .filter(|(query, _)| {
      shrunk
        .iter()
        .any(|s| s.same_view(query) && query.page > s.page)
    })
    .filter_map(|(query, slot)| {
      mark_stale(slot).then(|| CacheEvent::invalidated(CacheKey::list(kind, query.clone())))
    })
    .collect()
}

/// Kind-erased operations, so scopes and persistence can address a table by
/// `EntityKind`.
trait TableOps {
  fn invalidate_all(&mut self) -> Vec<CacheKey>;
  fn invalidate_lists(&mut self, only: Option<&ListQuery>) -> Vec<CacheKey>;
  fn invalidate_detail(&mut self, id: &str) -> Option<CacheKey>;
  fn entries(&self) -> Vec<EntryInfo>;
  fn export(&self, key: &CacheKey) -> Result<Option<StoredEntry>>;
  fn import(&mut self, entry: StoredEntry) -> Result<()>;
  fn clear(&mut self);
}

impl<T: Entity> TableOps for Table<T> {
  fn invalidate_all(&mut self) -> Vec<CacheKey> {
    let mut keys = self.invalidate_lists(None);
    keys.extend(
      self
        .details
        .iter_mut()
        .filter_map(|(id, slot)| mark_stale(slot).then(|| CacheKey::detail(T::KIND, id.as_str()))),
    );
    keys
  }

  fn invalidate_lists(&mut self, only: Option<&ListQuery>) -> Vec<CacheKey> {
    self
      .lists
      .iter_mut()
      .filter(|(query, _)| only.map_or(true, |only| only == *query))
      .filter_map(|(query, slot)| {
        mark_stale(slot).then(|| CacheKey::list(T::KIND, query.clone()))
      })
      .collect()
  }

  fn invalidate_detail(&mut self, id: &str) -> Option<CacheKey> {
    let slot = self.details.get_mut(id)?;
    mark_stale(slot).then(|| CacheKey::detail(T::KIND, id))
  }

  fn entries(&self) -> Vec<EntryInfo> {
    let lists = self.lists.iter().map(|(query, slot)| EntryInfo {
      key: CacheKey::list(T::KIND, query.clone()),
      fetched_at: slot.fetched_at,
      stale: slot.stale,
    });
    let details = self.details.iter().map(|(id, slot)| EntryInfo {
      key: CacheKey::detail(T::KIND, id.as_str()),
      fetched_at: slot.fetched_at,
      stale: slot.stale,
    });
    lists.chain(details).collect()
  }

  fn export(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
    let stored = match key {
      CacheKey::List { query, .. } => match self.lists.get(query) {
        Some(slot) => Some(StoredEntry::new(key.clone(), serde_json::to_vec(&slot.value)?, slot)),
        None => None,
      },
      CacheKey::Detail { id, .. } => match self.details.get(id) {
        Some(slot) => Some(StoredEntry::new(key.clone(), serde_json::to_vec(&slot.value)?, slot)),
        None => None,
      },
      CacheKey::Stats { .. } => None,
    };
    Ok(stored)
  }

  fn import(&mut self, entry: StoredEntry) -> Result<()> {
    match entry.key {
      CacheKey::List { query, .. } => {
        let value: Page<T> = serde_json::from_slice(&entry.data)?;
        self.lists.insert(
          query,
          Slot {
            value,
            fetched_at: entry.cached_at,
            stale: entry.stale,
          },
        );
      }
      CacheKey::Detail { id, .. } => {
        let value: T = serde_json::from_slice(&entry.data)?;
        self.details.insert(
          id,
          Slot {
            value,
            fetched_at: entry.cached_at,
            stale: entry.stale,
          },
        );
      }
      CacheKey::Stats { .. } => {}
    }
    Ok(())
  }

  fn clear(&mut self) {
    self.lists.clear();
    self.details.clear();
  }
}

// ============================================================================
// The store
// ============================================================================

/// Process-wide cache of list, detail and stats views.
///
/// Fetches write whole entries; mutation handlers (`on_*`) are the only
/// other writers. Every change is queued as a [`CacheEvent`] for
/// subscribers and persistence.
#[derive(Debug, Default)]
pub struct CacheStore {
  expenses: Table<Expense>,
  incomes: Table<Income>,
  jobs: Table<Job>,
  applications: Table<Application>,
  boards: Table<Board>,
  questions: Table<Question>,
  stats: BTreeMap<(EntityKind, String), Slot<Value>>,
  policy: ConflictPolicy,
  changes: Vec<CacheEvent>,
}

macro_rules! top_level {
  ($($entity:ty => $field:ident),* $(,)?) => {
    $(
      impl TopLevel for $entity {
        fn table(store: &CacheStore) -> &Table<Self> {
          &store.$field
        }

        fn table_mut(store: &mut CacheStore) -> &mut Table<Self> {
          &mut store.$field
        }
      }
    )*
  };
}

top_level! {
  Expense => expenses,
  Income => incomes,
  Job => jobs,
  Application => applications,
  Board => boards,
  Question => questions,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_policy(policy: ConflictPolicy) -> Self {
    Self {
      policy,
      ..Self::default()
    }
  }

  pub fn policy(&self) -> ConflictPolicy {
    self.policy
  }

  fn table_ops(&self, kind: EntityKind) -> &dyn TableOps {
    match kind {
      EntityKind::Expense => &self.expenses,
      EntityKind::Income => &self.incomes,
      EntityKind::Job => &self.jobs,
      EntityKind::Application => &self.applications,
      EntityKind::Board | EntityKind::Column | EntityKind::Task => &self.boards,
      EntityKind::Question | EntityKind::Answer => &self.questions,
    }
  }

  fn table_ops_mut(&mut self, kind: EntityKind) -> &mut dyn TableOps {
    match kind {
      EntityKind::Expense => &mut self.expenses,
      EntityKind::Income => &mut self.incomes,
      EntityKind::Job => &mut self.jobs,
      EntityKind::Application => &mut self.applications,
      EntityKind::Board | EntityKind::Column | EntityKind::Task => &mut self.boards,
      EntityKind::Question | EntityKind::Answer => &mut self.questions,
    }
  }

  // --------------------------------------------------------------------------
  // Reads
  // --------------------------------------------------------------------------

  pub fn list<T: TopLevel>(&self, query: &ListQuery) -> Option<&Slot<Page<T>>> {
    T::table(self).list(query)
  }

  pub fn detail<T: TopLevel>(&self, id: &str) -> Option<&Slot<T>> {
    T::table(self).detail(id)
  }

  pub fn stats(&self, kind: EntityKind, params: &str) -> Option<&Slot<Value>> {
    self.stats.get(&(kind, params.to_string()))
  }

  pub fn entries(&self) -> Vec<EntryInfo> {
    let mut entries: Vec<EntryInfo> = TOP_LEVEL
      .iter()
      .flat_map(|kind| self.table_ops(*kind).entries())
      .collect();
    entries.extend(self.stats.iter().map(|((kind, params), slot)| EntryInfo {
      key: CacheKey::stats(*kind, params.as_str()),
      fetched_at: slot.fetched_at,
      stale: slot.stale,
    }));
    entries
  }

  // --------------------------------------------------------------------------
  // Fetch results
  // --------------------------------------------------------------------------

  pub fn put_list<T: TopLevel>(&mut self, query: ListQuery, page: Page<T>) {
    let key = CacheKey::list(T::KIND, query.clone());
    T::table_mut(self).lists.insert(query, Slot::fresh(page));
    self.changes.push(CacheEvent::updated(key));
  }

  pub fn put_detail<T: TopLevel>(&mut self, entity: T) {
    let key = CacheKey::detail(T::KIND, entity.id());
    T::table_mut(self)
      .details
      .insert(entity.id().to_string(), Slot::fresh(entity));
    self.changes.push(CacheEvent::updated(key));
  }

  pub fn put_stats(&mut self, kind: EntityKind, params: &str, value: Value) {
    self
      .stats
      .insert((kind, params.to_string()), Slot::fresh(value));
    self
      .changes
      .push(CacheEvent::updated(CacheKey::stats(kind, params)));
  }

  // --------------------------------------------------------------------------
  // Mutation handlers
  // --------------------------------------------------------------------------

  /// Insert a created entity into every list view it belongs to and seed its
  /// detail entry.
  pub fn on_create<T: TopLevel>(&mut self, entity: T) -> Result<()> {
    let json = serde_json::to_value(&entity)?;
    let id = entity.id().to_string();
    let mut events = Vec::new();
    let table = T::table_mut(self);

    for (query, slot) in table.lists.iter_mut() {
      let key = CacheKey::list(T::KIND, query.clone());

      // A repeated success callback must not list the entity twice.
      if let Some(pos) = slot.value.position(&id) {
        slot.value.items[pos] = entity.clone();
        events.push(CacheEvent::updated(key));
        continue;
      }

      match query.membership(&json) {
        Membership::Out => {}
        Membership::Unknown => {
          if mark_stale(slot) {
            events.push(CacheEvent::invalidated(key));
          }
        }
        Membership::In => match T::INSERT_AT {
          InsertAt::Front if query.page <= 1 => {
            slot.value.items.insert(0, entity.clone());
            slot.value.items.truncate(query.limit as usize);
            slot.value.pagination.note_inserted();
            events.push(CacheEvent::updated(key));
          }
          InsertAt::Front => {
            slot.value.pagination.note_inserted();
            if mark_stale(slot) {
              events.push(CacheEvent::invalidated(key));
            }
          }
          InsertAt::Back
            if slot.value.pagination.is_last_page()
              && slot.value.items.len() < query.limit as usize =>
          {
            slot.value.items.push(entity.clone());
            slot.value.pagination.note_inserted();
            events.push(CacheEvent::updated(key));
          }
          InsertAt::Back => {
            slot.value.pagination.note_inserted();
            events.push(CacheEvent::updated(key));
          }
        },
      }
    }

    table.details.insert(id.clone(), Slot::fresh(entity));
    events.push(CacheEvent::updated(CacheKey::detail(T::KIND, id.as_str())));

    debug!(kind = %T::KIND, id = %id, "applied local create");
    self.changes.extend(events);
    self.invalidate_stats(T::stats_kinds());
    Ok(())
  }

  /// Insert a created child into its parent container wherever that parent
  /// is cached. `parent` defaults to the container id the entity carries.
  ///
  /// Copies of the root that don't embed the whole child collection (list
  /// summaries) are marked stale instead of gaining a partial thread.
  pub fn on_create_nested<T: Nested>(&mut self, entity: T, parent: Option<&str>) -> Result<()> {
    let parent = parent
      .or(Some(entity.container_id()))
      .filter(|p| !p.is_empty())
      .map(str::to_string);

    let Some(parent) = parent else {
      warn!(kind = %T::KIND, id = %entity.id(), "created entity has no parent; invalidating");
      self.invalidate(&Scope::Kind(T::KIND));
      return Ok(());
    };

    let id = entity.id().to_string();
    let touched = T::Root::table_mut(self).edit_all(|root| {
      let complete = T::embeds_children(root);
      let mut hit = false;
      let mut added = 0;

      for container in T::containers_mut(root) {
        if container.id != parent {
          continue;
        }
        if !complete {
          return Edit::Stale;
        }
        hit = true;
        if let Some(pos) = container.position(&id) {
          container.items[pos] = entity.clone();
        } else {
          match T::INSERT_AT {
            InsertAt::Front => container.items.insert(0, entity.clone()),
            InsertAt::Back => container.items.push(entity.clone()),
          }
          added += 1;
        }
      }

      if added > 0 {
        T::adjust_count(root, added);
      }
      Edit::changed(hit)
    });

    if touched.is_empty() {
      warn!(kind = %T::KIND, id = %id, parent = %parent, "parent not cached; invalidating");
      self.invalidate(&Scope::Kind(T::KIND));
    } else {
      debug!(kind = %T::KIND, id = %id, parent = %parent, "applied local create");
      self.changes.extend(touched);
    }

    self.invalidate_stats(T::stats_kinds());
    Ok(())
  }

  /// Merge `patch` into every cached copy of entity `id`.
  ///
  /// Filtered list views re-check membership: the entity drops out of views
  /// it no longer matches, and views only the server can evaluate are
  /// invalidated.
  pub fn on_update<T: TopLevel>(&mut self, id: &str, patch: &Patch) -> Result<()> {
    let policy = self.policy;
    let incoming = patch.updated_at();
    let mut events = Vec::new();
    let mut shrunk = Vec::new();
    let table = T::table_mut(self);

    if let Some(slot) = table.details.get_mut(id) {
      if policy.accepts(slot.value.updated_at(), incoming) {
        slot.value = patch.apply(&slot.value)?;
        events.push(CacheEvent::updated(CacheKey::detail(T::KIND, id)));
      } else {
        debug!(kind = %T::KIND, id = %id, "ignored out-of-date patch");
      }
    }

    for (query, slot) in table.lists.iter_mut() {
      let key = CacheKey::list(T::KIND, query.clone());

      let Some(pos) = slot.value.position(id) else {
        // Not listed here; it may now belong.
        if query.depends_on(patch)
          && query.membership_of_patch(patch) != Membership::Out
          && mark_stale(slot)
        {
          events.push(CacheEvent::invalidated(key));
        }
        continue;
      };

      if !policy.accepts(slot.value.items[pos].updated_at(), incoming) {
        continue;
      }

      let merged = patch.apply(&slot.value.items[pos])?;
      match query.membership(&serde_json::to_value(&merged)?) {
        Membership::In => {
          slot.value.items[pos] = merged;
          events.push(CacheEvent::updated(key));
        }
        Membership::Out => {
          slot.value.items.remove(pos);
          slot.value.pagination.note_removed();
          shrunk.push(query.clone());
          events.push(CacheEvent::updated(key));
        }
        Membership::Unknown => {
          slot.value.items[pos] = merged;
          slot.stale = true;
          events.push(CacheEvent::invalidated(key));
        }
      }
    }

    events.extend(stale_later_pages(&mut table.lists, &shrunk, T::KIND));

    debug!(kind = %T::KIND, id = %id, edits = events.len(), "applied local update");
    self.changes.extend(events);
    self.invalidate_stats(T::stats_kinds());
    Ok(())
  }

  /// Merge `patch` into every cached copy of child `id`.
  ///
  /// A patch that changes the container reference is a move; it can't be
  /// expressed here, so the roots are invalidated.
  pub fn on_update_nested<T: Nested>(&mut self, id: &str, patch: &Patch) -> Result<()> {
    let policy = self.policy;
    let incoming = patch.updated_at();
    let mut relocated = false;
    let mut failure = None;

    let touched = T::Root::table_mut(self).edit_all(|root| {
      let mut hit = false;
      for container in T::containers_mut(root) {
        let Some(pos) = container.position(id) else {
          continue;
        };
        if !policy.accepts(container.items[pos].updated_at(), incoming) {
          continue;
        }
        match patch.apply(&container.items[pos]) {
          Ok(merged) if merged.container_id() != container.id => relocated = true,
          Ok(merged) => {
            container.items[pos] = merged;
            hit = true;
          }
          Err(e) => {
            failure.get_or_insert(e);
          }
        }
      }
      Edit::changed(hit)
    });

    self.changes.extend(touched);

    if let Some(e) = failure {
      return Err(e);
    }

    if relocated {
      warn!(
        kind = %T::KIND,
        id = %id,
        field = T::CONTAINER_FIELD,
        "update changes the parent; invalidating"
      );
      self.invalidate(&Scope::Kind(T::KIND));
    }

    self.invalidate_stats(T::stats_kinds());
    Ok(())
  }

  /// Move a child between containers: one removal, one append.
  ///
  /// `moved` is the server's copy carrying the new parent reference. When
  /// `from` is unknown or doesn't hold the entity, every container is
  /// scanned for it instead.
  pub fn on_move<T: Nested>(&mut self, moved: T, from: Option<&str>, to: &str) {
    let id = moved.id().to_string();
    let mut orphaned = false;

    let touched = T::Root::table_mut(self).edit_all(|root| {
      let complete = T::embeds_children(root);
      let mut containers = T::containers_mut(root);

      if !complete {
        let involved = containers
          .iter()
          .any(|c| c.id == to || from == Some(c.id) || c.holds(&id));
        return if involved { Edit::Stale } else { Edit::Untouched };
      }

      let Some(target) = containers.iter().position(|c| c.id == to) else {
        orphaned |= containers.iter().any(|c| c.holds(&id));
        return Edit::Untouched;
      };

      let source = from
        .and_then(|from| containers.iter().position(|c| c.id == from && c.holds(&id)))
        .or_else(|| containers.iter().position(|c| c.holds(&id)));

      if let Some(source) = source {
        containers[source].remove(&id);
      }
      containers[target].remove(&id);
      containers[target].items.push(moved.clone());
      Edit::Changed
    });

    if orphaned {
      warn!(kind = %T::KIND, id = %id, to = %to, "target container not cached; invalidating");
      self.invalidate(&Scope::Kind(T::KIND));
    }

    debug!(kind = %T::KIND, id = %id, to = %to, edits = touched.len(), "applied local move");
    self.changes.extend(touched);
    self.invalidate_stats(T::stats_kinds());
  }

  /// Drop entity `id` from every list view and remove its detail entry.
  pub fn on_delete<T: TopLevel>(&mut self, id: &str) {
    let mut events = Vec::new();
    let mut shrunk = Vec::new();
    let table = T::table_mut(self);

    if table.details.remove(id).is_some() {
      events.push(CacheEvent::removed(CacheKey::detail(T::KIND, id)));
    }

    for (query, slot) in table.lists.iter_mut() {
      let before = slot.value.items.len();
      slot.value.items.retain(|item| item.id() != id);
      let dropped = before - slot.value.items.len();
      if dropped > 0 {
        for _ in 0..dropped {
          slot.value.pagination.note_removed();
        }
        shrunk.push(query.clone());
        events.push(CacheEvent::updated(CacheKey::list(T::KIND, query.clone())));
      }
    }

    events.extend(stale_later_pages(&mut table.lists, &shrunk, T::KIND));

    debug!(kind = %T::KIND, id = %id, edits = events.len(), "applied local delete");
    self.changes.extend(events);

    for dependent in T::dependents() {
      self.invalidate(&Scope::Kind(*dependent));
    }
    self.invalidate_stats(T::stats_kinds());
  }

  /// Drop child `id` from every container holding it; all cached roots are
  /// scanned.
  ///
  /// `parent` names the container when the caller knows it. Root copies
  /// that summarise that container (or one the child was found in) without
  /// embedding its children are marked stale, since their counts are now off.
  pub fn on_delete_nested<T: Nested>(&mut self, id: &str, parent: Option<&str>) {
    let mut parents: Vec<String> = parent.map(str::to_string).into_iter().collect();

    let mut events = T::Root::table_mut(self).edit_all(|root| {
      let mut dropped = 0;
      for mut container in T::containers_mut(root) {
        let n = container.remove(id);
        if n > 0 && !parents.iter().any(|p| p == container.id) {
          parents.push(container.id.to_string());
        }
        dropped += n;
      }
      if dropped > 0 {
        T::adjust_count(root, -(dropped as i64));
      }
      Edit::changed(dropped > 0)
    });

    if !parents.is_empty() {
      events.extend(T::Root::table_mut(self).edit_all(|root| {
        if T::embeds_children(root) {
          return Edit::Untouched;
        }
        let summarised = T::containers_mut(root)
          .iter()
          .any(|c| parents.iter().any(|p| p == c.id));
        if summarised {
          Edit::Stale
        } else {
          Edit::Untouched
        }
      }));
    }

    debug!(kind = %T::KIND, id = %id, parents = ?parents, edits = events.len(), "applied local delete");
    self.changes.extend(events);
    self.invalidate_stats(T::stats_kinds());
  }

  // --------------------------------------------------------------------------
  // Invalidation
  // --------------------------------------------------------------------------

  /// Mark every entry under `scope` stale. Returns how many entries changed
  /// state.
  pub fn invalidate(&mut self, scope: &Scope) -> usize {
    let keys = match scope {
      Scope::All => {
        let mut keys: Vec<CacheKey> = TOP_LEVEL
          .iter()
          .flat_map(|kind| self.table_ops_mut(*kind).invalidate_all())
          .collect();
        keys.extend(self.stale_stats(|_| true));
        keys
      }
      Scope::Kind(kind) => {
        let root = kind.root();
        let mut keys = self.table_ops_mut(root).invalidate_all();
        keys.extend(self.stale_stats(|k| k == root));
        keys
      }
      Scope::Lists(kind) => self.table_ops_mut(*kind).invalidate_lists(None),
      Scope::List(kind, query) => self.table_ops_mut(*kind).invalidate_lists(Some(query)),
      Scope::Detail(kind, id) => self
        .table_ops_mut(*kind)
        .invalidate_detail(id)
        .into_iter()
        .collect(),
      Scope::Stats(kind) => self.stale_stats(|k| k == *kind),
    };

    if !keys.is_empty() {
      info!(?scope, count = keys.len(), "invalidated cache entries");
    }

    let count = keys.len();
    self
      .changes
      .extend(keys.into_iter().map(CacheEvent::invalidated));
    count
  }

  fn invalidate_stats(&mut self, kinds: &[EntityKind]) {
    for kind in kinds {
      self.invalidate(&Scope::Stats(*kind));
    }
  }

  fn stale_stats(&mut self, matches: impl Fn(EntityKind) -> bool) -> Vec<CacheKey> {
    self
      .stats
      .iter_mut()
      .filter(|((kind, _), _)| matches(*kind))
      .filter_map(|((kind, params), slot)| {
        mark_stale(slot).then(|| CacheKey::stats(*kind, params.as_str()))
      })
      .collect()
  }

  /// Drop everything, e.g. on sign-out.
  pub fn clear(&mut self) {
    for kind in TOP_LEVEL {
      self.table_ops_mut(kind).clear();
    }
    self.stats.clear();
    self.changes.push(CacheEvent::cleared());
  }

  /// Drain the change events queued since the last call.
  pub fn take_changes(&mut self) -> Vec<CacheEvent> {
    std::mem::take(&mut self.changes)
  }

  // --------------------------------------------------------------------------
  // Persistence
  // --------------------------------------------------------------------------

  pub fn export(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
    match key {
      CacheKey::Stats { kind, params } => match self.stats.get(&(*kind, params.clone())) {
        Some(slot) => Ok(Some(StoredEntry::new(
          key.clone(),
          serde_json::to_vec(&slot.value)?,
          slot,
        ))),
        None => Ok(None),
      },
      _ => self.table_ops(key.kind()).export(key),
    }
  }

  pub fn import(&mut self, entry: StoredEntry) -> Result<()> {
    match &entry.key {
      CacheKey::Stats { kind, params } => {
        let value: Value = serde_json::from_slice(&entry.data)?;
        self.stats.insert(
          (*kind, params.clone()),
          Slot {
            value,
            fetched_at: entry.cached_at,
            stale: entry.stale,
          },
        );
        Ok(())
      }
      key => {
        let kind = key.kind();
        self.table_ops_mut(kind).import(entry)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Answer, ApplicationStatus, Column, JobStatus, Pagination, Task};
  use serde_json::json;

  fn expense(id: &str, category: &str) -> Expense {
    Expense {
      id: id.to_string(),
      title: format!("expense {}", id),
      amount: 12.5,
      category: category.to_string(),
      date: "2026-10-01".to_string(),
      note: None,
      created_at: None,
      updated_at: None,
    }
  }

  fn application(id: &str, status: ApplicationStatus) -> Application {
    Application {
      id: id.to_string(),
      job_id: "j1".to_string(),
      applicant_name: "Mika".to_string(),
      email: "mika@example.edu".to_string(),
      status,
      cover_letter: Some("Dear team".to_string()),
      resume_url: None,
      created_at: None,
      updated_at: None,
    }
  }

  fn job(id: &str) -> Job {
    Job {
      id: id.to_string(),
      title: "Rust intern".to_string(),
      company: "Acme".to_string(),
      location: "Remote".to_string(),
      job_type: "INTERNSHIP".to_string(),
      status: JobStatus::Open,
      salary: None,
      description: String::new(),
      created_at: None,
      updated_at: None,
    }
  }

  fn task(id: &str, column: &str) -> Task {
    Task {
      id: id.to_string(),
      column_id: column.to_string(),
      title: format!("task {}", id),
      description: None,
      priority: None,
      due_date: None,
      position: 0,
      updated_at: None,
    }
  }

  fn column(id: &str, tasks: Vec<Task>) -> Column {
    Column {
      id: id.to_string(),
      board_id: "b1".to_string(),
      title: id.to_uppercase(),
      position: 0,
      tasks,
    }
  }

  fn board() -> Board {
    Board {
      id: "b1".to_string(),
      title: "Semester".to_string(),
      description: None,
      columns: vec![
        column("c1", vec![task("t1", "c1"), task("t2", "c1")]),
        column("c2", vec![]),
      ],
      created_at: None,
      updated_at: None,
    }
  }

  fn question() -> Question {
    Question {
      id: "q1".to_string(),
      title: "How do lifetimes work?".to_string(),
      body: String::new(),
      tags: vec!["rust".to_string()],
      author: None,
      votes: 0,
      answer_count: 1,
      answers: vec![answer("ans1")],
      created_at: None,
      updated_at: None,
    }
  }

  fn answer(id: &str) -> Answer {
    Answer {
      id: id.to_string(),
      question_id: "q1".to_string(),
      body: "They are scopes".to_string(),
      author: None,
      votes: 0,
      accepted: false,
      created_at: None,
      updated_at: None,
    }
  }

  fn page<T>(items: Vec<T>, page: u32, limit: u32, total: u64) -> Page<T> {
    Page {
      items,
      pagination: Pagination::new(page, limit, total),
    }
  }

  fn ids<T: Entity>(items: &[T]) -> Vec<&str> {
    items.iter().map(|item| item.id()).collect()
  }

  fn column_tasks<'a>(store: &'a CacheStore, column_id: &str) -> Vec<&'a str> {
    let board = &store.detail::<Board>("b1").unwrap().value;
    let column = board.columns.iter().find(|c| c.id == column_id).unwrap();
    ids(&column.tasks)
  }

  #[test]
  fn create_prepends_to_first_page_once() {
    let mut store = CacheStore::new();
    let query = ListQuery::new();
    store.put_list(
      query.clone(),
      page(vec![expense("e1", "food"), expense("e2", "rent")], 1, 10, 2),
    );

    store.on_create(expense("e3", "books")).unwrap();
    store.on_create(expense("e3", "books")).unwrap();

    let slot = store.list::<Expense>(&query).unwrap();
    assert_eq!(ids(&slot.value.items), vec!["e3", "e1", "e2"]);
    assert_eq!(slot.value.pagination.total, 3);
    assert!(store.detail::<Expense>("e3").is_some());
  }

  #[test]
  fn create_truncates_full_page_and_invalidates_later_pages() {
    let mut store = CacheStore::new();
    let first = ListQuery::new().limit(2);
    let second = first.clone().page(2);
    store.put_list(first.clone(), page(vec![expense("e1", "a"), expense("e2", "a")], 1, 2, 3));
    store.put_list(second.clone(), page(vec![expense("e3", "a")], 2, 2, 3));

    store.on_create(expense("e4", "a")).unwrap();

    let first_page = store.list::<Expense>(&first).unwrap();
    assert_eq!(ids(&first_page.value.items), vec!["e4", "e1"]);
    assert!(!first_page.stale);
    assert!(store.list::<Expense>(&second).unwrap().stale);
  }

  #[test]
  fn create_respects_local_filters_and_invalidates_search() {
    let mut store = CacheStore::new();
    let food = ListQuery::new().filter("category", "food");
    let rent = ListQuery::new().filter("category", "rent");
    let searched = ListQuery::new().search("lunch");
    for query in [&food, &rent, &searched] {
      store.put_list::<Expense>(query.clone(), page(vec![], 1, 10, 0));
    }

    store.on_create(expense("e1", "food")).unwrap();

    assert_eq!(ids(&store.list::<Expense>(&food).unwrap().value.items), vec!["e1"]);
    assert!(store.list::<Expense>(&rent).unwrap().value.items.is_empty());
    assert!(!store.list::<Expense>(&rent).unwrap().stale);
    assert!(store.list::<Expense>(&searched).unwrap().stale);
  }

  #[test]
  fn update_patches_list_and_detail() {
    let mut store = CacheStore::new();
    let query = ListQuery::new();
    store.put_list(query.clone(), page(vec![application("a1", ApplicationStatus::Pending)], 1, 10, 1));
    store.put_detail(application("a1", ApplicationStatus::Pending));

    store
      .on_update::<Application>("a1", &Patch::new().set("status", "ACCEPTED"))
      .unwrap();

    let listed = &store.list::<Application>(&query).unwrap().value.items[0];
    let detail = &store.detail::<Application>("a1").unwrap().value;
    assert_eq!(listed.status, ApplicationStatus::Accepted);
    assert_eq!(listed.cover_letter.as_deref(), Some("Dear team"));
    assert_eq!(listed.applicant_name, "Mika");
    assert_eq!(listed, detail);
  }

  #[test]
  fn update_twice_equals_update_once() {
    let mut store = CacheStore::new();
    let all = ListQuery::new();
    let pending = ListQuery::new().filter("status", "PENDING");
    let apps = vec![
      application("a1", ApplicationStatus::Pending),
      application("a2", ApplicationStatus::Pending),
    ];
    store.put_list(all.clone(), page(apps.clone(), 1, 10, 2));
    store.put_list(pending.clone(), page(apps, 1, 10, 2));
    let patch = Patch::new().set("status", "ACCEPTED");

    store.on_update::<Application>("a1", &patch).unwrap();
    let once_all = store.list::<Application>(&all).unwrap().value.clone();
    let once_pending = store.list::<Application>(&pending).unwrap().value.clone();

    store.on_update::<Application>("a1", &patch).unwrap();
    assert_eq!(store.list::<Application>(&all).unwrap().value, once_all);
    assert_eq!(store.list::<Application>(&pending).unwrap().value, once_pending);
    assert_eq!(ids(&once_pending.items), vec!["a2"]);
    assert_eq!(once_pending.pagination.total, 1);
  }

  #[test]
  fn update_may_bring_entity_into_filtered_view() {
    let mut store = CacheStore::new();
    let accepted = ListQuery::new().filter("status", "ACCEPTED");
    let rejected = ListQuery::new().filter("status", "REJECTED");
    store.put_list::<Application>(accepted.clone(), page(vec![], 1, 10, 0));
    store.put_list::<Application>(rejected.clone(), page(vec![], 1, 10, 0));

    store
      .on_update::<Application>("a9", &Patch::new().set("status", "ACCEPTED"))
      .unwrap();

    assert!(store.list::<Application>(&accepted).unwrap().stale);
    assert!(!store.list::<Application>(&rejected).unwrap().stale);
  }

  #[test]
  fn newer_wins_policy_drops_older_patch() {
    let mut store = CacheStore::with_policy(ConflictPolicy::NewerWins);
    let mut current = expense("e1", "food");
    current.updated_at = Some("2026-10-02T10:00:00Z".to_string());
    store.put_detail(current);

    let stale_patch = Patch::new()
      .set("amount", 99.0)
      .set("updatedAt", "2026-10-01T10:00:00Z");
    store.on_update::<Expense>("e1", &stale_patch).unwrap();
    assert_eq!(store.detail::<Expense>("e1").unwrap().value.amount, 12.5);

    let newer_patch = Patch::new()
      .set("amount", 30.0)
      .set("updatedAt", "2026-10-03T10:00:00Z");
    store.on_update::<Expense>("e1", &newer_patch).unwrap();
    assert_eq!(store.detail::<Expense>("e1").unwrap().value.amount, 30.0);
  }

  #[test]
  fn last_write_wins_by_default() {
    let mut store = CacheStore::new();
    let mut current = expense("e1", "food");
    current.updated_at = Some("2026-10-02T10:00:00Z".to_string());
    store.put_detail(current);

    let older = Patch::new()
      .set("amount", 99.0)
      .set("updatedAt", "2026-10-01T10:00:00Z");
    store.on_update::<Expense>("e1", &older).unwrap();
    assert_eq!(store.detail::<Expense>("e1").unwrap().value.amount, 99.0);
  }

  #[test]
  fn move_task_between_columns() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store.on_move(task("t1", "c2"), Some("c1"), "c2");

    assert_eq!(column_tasks(&store, "c1"), vec!["t2"]);
    assert_eq!(column_tasks(&store, "c2"), vec!["t1"]);
    let board = &store.detail::<Board>("b1").unwrap().value;
    assert_eq!(board.columns[1].tasks[0].column_id, "c2");
  }

  #[test]
  fn move_without_source_scans_all_columns() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store.on_move(task("t2", "c2"), None, "c2");
    store.on_move(task("t2", "c2"), Some("c1"), "c2");

    assert_eq!(column_tasks(&store, "c1"), vec!["t1"]);
    assert_eq!(column_tasks(&store, "c2"), vec!["t2"]);
  }

  #[test]
  fn move_keeps_exactly_one_copy_for_every_pair() {
    let columns = ["c1", "c2"];
    for from in columns {
      for to in columns {
        let mut store = CacheStore::new();
        store.put_detail(board());

        store.on_move(task("t1", to), Some(from), to);

        let in_c1 = column_tasks(&store, "c1").contains(&"t1");
        let in_c2 = column_tasks(&store, "c2").contains(&"t1");
        assert!(in_c1 ^ in_c2, "t1 must live in exactly one column ({} -> {})", from, to);
        assert_eq!(to == "c1", in_c1);
      }
    }
  }

  #[test]
  fn move_to_uncached_column_invalidates_boards() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store.on_move(task("t1", "c9"), Some("c1"), "c9");

    let slot = store.detail::<Board>("b1").unwrap();
    assert!(slot.stale);
    assert_eq!(column_tasks(&store, "c1"), vec!["t1", "t2"]);
  }

  #[test]
  fn nested_create_appends_to_parent_column() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store.on_create_nested(task("t3", "c2"), None).unwrap();
    store.on_create_nested(task("t3", "c2"), Some("c2")).unwrap();

    assert_eq!(column_tasks(&store, "c2"), vec!["t3"]);
  }

  #[test]
  fn nested_create_without_known_parent_invalidates() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store.on_create_nested(task("t3", ""), None).unwrap();
    assert!(store.detail::<Board>("b1").unwrap().stale);

    let mut store = CacheStore::new();
    store.put_detail(board());
    store.on_create_nested(task("t4", "c7"), None).unwrap();
    assert!(store.detail::<Board>("b1").unwrap().stale);
  }

  #[test]
  fn answers_keep_question_count_in_step() {
    let mut store = CacheStore::new();
    store.put_detail(question());

    store.on_create_nested(answer("ans2"), Some("q1")).unwrap();
    assert_eq!(store.detail::<Question>("q1").unwrap().value.answer_count, 2);

    store.on_delete_nested::<Answer>("ans1", Some("q1"));
    let question = &store.detail::<Question>("q1").unwrap().value;
    assert_eq!(question.answer_count, 1);
    assert_eq!(ids(&question.answers), vec!["ans2"]);
  }

  fn question_summary(id: &str, answer_count: u32) -> Question {
    Question {
      id: id.to_string(),
      answer_count,
      answers: vec![],
      ..question()
    }
  }

  #[test]
  fn new_answer_invalidates_summaries_instead_of_filling_them() {
    let mut store = CacheStore::new();
    let query = ListQuery::new();
    store.put_detail(question());
    store.put_list(query.clone(), page(vec![question_summary("q1", 1)], 1, 10, 1));

    store.on_create_nested(answer("ans2"), Some("q1")).unwrap();

    let detail = &store.detail::<Question>("q1").unwrap().value;
    assert_eq!(ids(&detail.answers), vec!["ans1", "ans2"]);
    assert_eq!(detail.answer_count, 2);

    let slot = store.list::<Question>(&query).unwrap();
    assert!(slot.stale);
    assert!(slot.value.items[0].answers.is_empty());
    assert_eq!(slot.value.items[0].answer_count, 1);
  }

  #[test]
  fn deleted_answer_invalidates_summaries_of_its_question() {
    let mut store = CacheStore::new();
    let query = ListQuery::new();
    store.put_detail(question());
    store.put_list(
      query.clone(),
      page(vec![question_summary("q1", 1), question_summary("q2", 3)], 1, 10, 2),
    );

    // The parent is learned from the detail copy that held the answer.
    store.on_delete_nested::<Answer>("ans1", None);

    let detail = &store.detail::<Question>("q1").unwrap().value;
    assert!(detail.answers.is_empty());
    assert_eq!(detail.answer_count, 0);
    assert!(store.list::<Question>(&query).unwrap().stale);
  }

  #[test]
  fn parent_hint_reaches_summaries_when_no_detail_is_cached() {
    let mut store = CacheStore::new();
    let first = ListQuery::new();
    let second = ListQuery::new().filter("author", "kai");
    store.put_list(first.clone(), page(vec![question_summary("q1", 2)], 1, 10, 1));
    store.put_list(second.clone(), page(vec![question_summary("q2", 1)], 1, 10, 1));

    store.on_delete_nested::<Answer>("ans9", Some("q1"));

    assert!(store.list::<Question>(&first).unwrap().stale);
    assert!(!store.list::<Question>(&second).unwrap().stale);
  }

  #[test]
  fn new_column_skips_board_summaries() {
    let mut store = CacheStore::new();
    let query = ListQuery::new();
    let summary = Board {
      columns: vec![],
      ..board()
    };
    store.put_detail(board());
    store.put_list(query.clone(), page(vec![summary], 1, 10, 1));

    store.on_create_nested(column("c3", vec![]), Some("b1")).unwrap();

    let detail = &store.detail::<Board>("b1").unwrap().value;
    assert_eq!(ids(&detail.columns), vec!["c1", "c2", "c3"]);
    let slot = store.list::<Board>(&query).unwrap();
    assert!(slot.stale);
    assert!(slot.value.items[0].columns.is_empty());
  }

  #[test]
  fn nested_update_patches_in_place() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store
      .on_update_nested::<Task>("t2", &Patch::new().set("priority", "HIGH"))
      .unwrap();

    let board = &store.detail::<Board>("b1").unwrap().value;
    assert_eq!(board.columns[0].tasks[1].priority.as_deref(), Some("HIGH"));
    assert!(!store.detail::<Board>("b1").unwrap().stale);
  }

  #[test]
  fn nested_update_changing_parent_invalidates() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store
      .on_update_nested::<Task>("t2", &Patch::new().set("columnId", "c2"))
      .unwrap();

    assert!(store.detail::<Board>("b1").unwrap().stale);
    assert_eq!(column_tasks(&store, "c1"), vec!["t1", "t2"]);
  }

  #[test]
  fn delete_removes_every_occurrence() {
    let mut store = CacheStore::new();
    let all = ListQuery::new().limit(2);
    let food = ListQuery::new().filter("category", "food");
    let later = all.clone().page(2);
    store.put_list(all.clone(), page(vec![expense("e1", "food"), expense("e2", "rent")], 1, 2, 3));
    store.put_list(later.clone(), page(vec![expense("e3", "food")], 2, 2, 3));
    store.put_list(food.clone(), page(vec![expense("e1", "food")], 1, 10, 1));
    store.put_detail(expense("e1", "food"));

    store.on_delete::<Expense>("e1");

    assert!(store.detail::<Expense>("e1").is_none());
    assert!(!store.list::<Expense>(&all).unwrap().value.contains("e1"));
    assert!(!store.list::<Expense>(&food).unwrap().value.contains("e1"));
    assert_eq!(store.list::<Expense>(&all).unwrap().value.pagination.total, 2);
    assert!(store.list::<Expense>(&later).unwrap().stale);
  }

  #[test]
  fn delete_nested_scans_every_root() {
    let mut store = CacheStore::new();
    store.put_detail(board());
    store.put_list(ListQuery::new(), page(vec![board()], 1, 10, 1));

    store.on_delete_nested::<Task>("t1", Some("c2"));

    assert_eq!(column_tasks(&store, "c1"), vec!["t2"]);
    let listed = &store.list::<Board>(&ListQuery::new()).unwrap().value.items[0];
    assert_eq!(ids(&listed.columns[0].tasks), vec!["t2"]);
  }

  #[test]
  fn deleting_column_drops_its_tasks() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    store.on_delete_nested::<Column>("c1", Some("b1"));

    let board = &store.detail::<Board>("b1").unwrap().value;
    assert_eq!(ids(&board.columns), vec!["c2"]);
  }

  #[test]
  fn deleting_job_invalidates_applications() {
    let mut store = CacheStore::new();
    store.put_detail(job("j1"));
    store.put_list(
      ListQuery::new().filter("jobId", "j1"),
      page(vec![application("a1", ApplicationStatus::Pending)], 1, 10, 1),
    );

    store.on_delete::<Job>("j1");

    let apps = store
      .list::<Application>(&ListQuery::new().filter("jobId", "j1"))
      .unwrap();
    assert!(apps.stale);
  }

  #[test]
  fn mutations_invalidate_stats() {
    let mut store = CacheStore::new();
    store.put_stats(EntityKind::Job, "", json!({"open": 3}));
    store.put_stats(EntityKind::Expense, "", json!({"total": 120.0}));

    store.on_create(application("a1", ApplicationStatus::Pending)).unwrap();

    assert!(store.stats(EntityKind::Job, "").unwrap().stale);
    assert!(!store.stats(EntityKind::Expense, "").unwrap().stale);
  }

  #[test]
  fn invalidate_counts_state_changes_once() {
    let mut store = CacheStore::new();
    store.put_list::<Expense>(ListQuery::new(), page(vec![], 1, 10, 0));
    store.put_detail(expense("e1", "food"));
    store.take_changes();

    assert_eq!(store.invalidate(&Scope::Kind(EntityKind::Expense)), 2);
    assert_eq!(store.invalidate(&Scope::Kind(EntityKind::Expense)), 0);

    let changes = store.take_changes();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c.change == crate::cache::Change::Invalidated));
  }

  #[test]
  fn nested_scope_resolves_to_root_table() {
    let mut store = CacheStore::new();
    store.put_detail(board());

    assert_eq!(store.invalidate(&Scope::Lists(EntityKind::Task)), 0);
    assert_eq!(store.invalidate(&Scope::Kind(EntityKind::Task)), 1);
    assert!(store.detail::<Board>("b1").unwrap().stale);
  }

  #[test]
  fn clear_empties_everything() {
    let mut store = CacheStore::new();
    store.put_detail(board());
    store.put_stats(EntityKind::Question, "", json!({}));

    store.clear();

    assert!(store.entries().is_empty());
    assert_eq!(store.take_changes().last(), Some(&CacheEvent::cleared()));
  }

  #[test]
  fn export_import_round_trip_keeps_staleness() {
    let mut store = CacheStore::new();
    store.put_detail(board());
    store.invalidate(&Scope::Detail(EntityKind::Board, "b1".to_string()));
    let key = CacheKey::detail(EntityKind::Board, "b1");

    let entry = store.export(&key).unwrap().unwrap();
    let mut restored = CacheStore::new();
    restored.import(entry).unwrap();

    let slot = restored.detail::<Board>("b1").unwrap();
    assert!(slot.stale);
    assert_eq!(slot.value, board());
  }
}
