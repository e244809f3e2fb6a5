//! Typed entry point tying the REST client, the shared cache and the
//! mutation runner together.
//!
//! Reads are cache-first. Every mutation goes through [`MutationRunner`], so
//! a failed call never touches the cache and each outcome produces exactly
//! one notification.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::api::{ApiClient, Resource};
use crate::cache::{
  CacheKey, CacheResult, CacheStorage, ListQuery, Nested, NoopStorage, Patch, QueryClient, Scope,
  TopLevel,
};
use crate::config::Config;
use crate::error::Result;
use crate::model::{EntityKind, Page};
use crate::notify::Notifier;
use crate::query::Query;
use crate::runner::MutationRunner;

pub struct Campus<S: CacheStorage = NoopStorage> {
  api: ApiClient,
  cache: QueryClient<S>,
  runner: MutationRunner<S>,
}

impl<S: CacheStorage + 'static> Campus<S> {
  pub fn new(api: ApiClient, cache: QueryClient<S>) -> Self {
    let runner = MutationRunner::new(cache.clone());
    Self { api, cache, runner }
  }

  /// Build from config with the given storage, restoring persisted entries.
  pub fn from_config(config: &Config, storage: S) -> Result<Self> {
    let api = ApiClient::from_config(config)?;
    let cache = QueryClient::new(storage)
      .with_conflict_policy(config.cache.conflict_policy)
      .with_stale_time(config.stale_time())
      .with_offline_fallback(config.cache.offline_fallback);
    cache.hydrate()?;
    Ok(Self::new(api, cache))
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.runner = self.runner.with_notifier(notifier);
    self
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  pub fn cache(&self) -> &QueryClient<S> {
    &self.cache
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  pub async fn list<T: TopLevel + Resource>(
    &self,
    query: &ListQuery,
  ) -> Result<CacheResult<Page<T>>> {
    self.cache.fetch_list(query, || self.api.list::<T>(query)).await
  }

  pub async fn get<T: TopLevel + Resource>(&self, id: &str) -> Result<CacheResult<T>> {
    self.cache.fetch_one(id, || self.api.get::<T>(id)).await
  }

  pub async fn stats(
    &self,
    kind: EntityKind,
    params: &[(String, String)],
  ) -> Result<CacheResult<Value>> {
    let key = stats_params(params);
    self
      .cache
      .fetch_stats(kind, &key, || self.api.stats(kind, params))
      .await
  }

  /// A watched query over one list page.
  pub fn list_query<T: TopLevel + Resource>(&self, query: ListQuery) -> Result<Query<Page<T>>> {
    let campus = self.clone();
    let key = CacheKey::list(T::KIND, query.clone());
    let events = self.cache.subscribe()?;

    Ok(
      Query::new(key, move || {
        let campus = campus.clone();
        let query = query.clone();
        async move { campus.list::<T>(&query).await }
      })
      .watching(events),
    )
  }

  /// A watched query over one entity.
  pub fn detail_query<T: TopLevel + Resource>(&self, id: &str) -> Result<Query<T>> {
    let campus = self.clone();
    let id = id.to_string();
    let key = CacheKey::detail(T::KIND, id.as_str());
    let events = self.cache.subscribe()?;

    Ok(
      Query::new(key, move || {
        let campus = campus.clone();
        let id = id.clone();
        async move { campus.get::<T>(&id).await }
      })
      .watching(events),
    )
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  pub async fn create<T: TopLevel + Resource>(&self, body: &impl Serialize) -> Result<T> {
    self.create_at::<T>(None, body).await
  }

  /// Create a top-level entity through its parent's endpoint, e.g. an
  /// application submitted against a job.
  pub async fn create_in<T: TopLevel + Resource>(
    &self,
    parent: &str,
    body: &impl Serialize,
  ) -> Result<T> {
    self.create_at::<T>(Some(parent), body).await
  }

  async fn create_at<T: TopLevel + Resource>(
    &self,
    parent: Option<&str>,
    body: &impl Serialize,
  ) -> Result<T> {
    self
      .runner
      .run(
        &toast(T::KIND, "created"),
        self.api.create::<T>(parent, body),
        |store, created| store.on_create(created.clone()),
      )
      .await
  }

  /// Create a child under `parent` (a column for tasks, a board for
  /// columns, a question for answers).
  pub async fn create_child<T: Nested + Resource>(
    &self,
    parent: &str,
    body: &impl Serialize,
  ) -> Result<T> {
    self
      .runner
      .run(
        &toast(T::KIND, "created"),
        self.api.create::<T>(Some(parent), body),
        |store, created| store.on_create_nested(created.clone(), Some(parent)),
      )
      .await
  }

  pub async fn update<T: TopLevel + Resource>(&self, id: &str, patch: &Patch) -> Result<T> {
    self
      .runner
      .run(
        &toast(T::KIND, "updated"),
        self.api.update::<T>(id, patch),
        |store, updated| store.on_update::<T>(id, &response_patch(updated)?),
      )
      .await
  }

  pub async fn update_child<T: Nested + Resource>(&self, id: &str, patch: &Patch) -> Result<T> {
    self
      .runner
      .run(
        &toast(T::KIND, "updated"),
        self.api.update::<T>(id, patch),
        |store, updated| store.on_update_nested::<T>(id, &response_patch(updated)?),
      )
      .await
  }

  /// Move a child to the container `to`. `from` is the container the caller
  /// believes holds it, if known.
  pub async fn move_child<T: Nested + Resource>(
    &self,
    id: &str,
    from: Option<&str>,
    to: &str,
  ) -> Result<T> {
    self
      .runner
      .run(
        &toast(T::KIND, "moved"),
        self.api.move_to::<T>(id, to),
        |store, moved| {
          store.on_move(moved.clone(), from, to);
          Ok(())
        },
      )
      .await
  }

  pub async fn delete<T: TopLevel + Resource>(&self, id: &str) -> Result<()> {
    self
      .runner
      .run(&toast(T::KIND, "deleted"), self.api.delete::<T>(id), |store, _| {
        store.on_delete::<T>(id);
        Ok(())
      })
      .await
  }

  pub async fn delete_child<T: Nested + Resource>(&self, id: &str, parent: Option<&str>) -> Result<()> {
    self
      .runner
      .run(&toast(T::KIND, "deleted"), self.api.delete::<T>(id), |store, _| {
        store.on_delete_nested::<T>(id, parent);
        Ok(())
      })
      .await
  }

  pub fn invalidate(&self, scope: &Scope) -> Result<usize> {
    self.cache.invalidate(scope)
  }
}

impl<S: CacheStorage> Clone for Campus<S> {
  fn clone(&self) -> Self {
    Self {
      api: self.api.clone(),
      cache: self.cache.clone(),
      runner: self.runner.clone(),
    }
  }
}

/// Patch built from the server's copy of an updated entity.
fn response_patch<T: crate::model::Entity>(updated: &T) -> Result<Patch> {
  Ok(Patch::from_entity(updated)?.without(T::embedded_fields()))
}

/// Stats cache key params: sorted `k=v` pairs joined with `&`.
fn stats_params(params: &[(String, String)]) -> String {
  let mut pairs: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
  pairs.sort();
  pairs.join("&")
}

/// e.g. "Expense created"
fn toast(kind: EntityKind, verb: &str) -> String {
  let name = kind.name();
  let mut chars = name.chars();
  match chars.next() {
    Some(first) => format!("{}{} {}", first.to_uppercase(), chars.as_str(), verb),
    None => verb.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Board, Column, Question, Task};

  #[test]
  fn toast_messages() {
    assert_eq!(toast(EntityKind::Expense, "created"), "Expense created");
    assert_eq!(toast(EntityKind::Task, "moved"), "Task moved");
  }

  #[test]
  fn stats_params_are_order_independent() {
    let a = vec![
      ("month".to_string(), "2026-10".to_string()),
      ("category".to_string(), "food".to_string()),
    ];
    let b: Vec<_> = a.iter().rev().cloned().collect();
    assert_eq!(stats_params(&a), stats_params(&b));
    assert_eq!(stats_params(&a), "category=food&month=2026-10");
    assert_eq!(stats_params(&[]), "");
  }

  #[test]
  fn response_patch_keeps_cached_children() {
    let mut store = crate::cache::CacheStore::new();
    store.put_detail(Board {
      id: "b1".to_string(),
      title: "Old".to_string(),
      description: None,
      columns: vec![Column {
        id: "c1".to_string(),
        board_id: "b1".to_string(),
        title: "Todo".to_string(),
        position: 0,
        tasks: vec![Task {
          id: "t1".to_string(),
          column_id: "c1".to_string(),
          title: "Read chapter 3".to_string(),
          description: None,
          priority: None,
          due_date: None,
          position: 0,
          updated_at: None,
        }],
      }],
      created_at: None,
      updated_at: None,
    });

    let response = Board {
      id: "b1".to_string(),
      title: "Renamed".to_string(),
      description: None,
      columns: vec![],
      created_at: None,
      updated_at: None,
    };
    store
      .on_update::<Board>("b1", &response_patch(&response).unwrap())
      .unwrap();

    let board = &store.detail::<Board>("b1").unwrap().value;
    assert_eq!(board.title, "Renamed");
    assert_eq!(board.columns[0].tasks.len(), 1);
  }

  #[test]
  fn response_patch_leaves_answer_count_alone() {
    let response = Question {
      id: "q1".to_string(),
      title: "t".to_string(),
      body: String::new(),
      tags: vec![],
      author: None,
      votes: 2,
      answer_count: 0,
      answers: vec![],
      created_at: None,
      updated_at: None,
    };
    let patch = response_patch(&response).unwrap();
    assert!(patch.touches("votes"));
    assert!(!patch.touches("answers"));
    assert!(!patch.touches("answerCount"));
  }
}
