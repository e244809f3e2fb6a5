//! Cache keys, list queries and invalidation scopes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::model::EntityKind;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Filter and pagination parameters of a list view.
///
/// `filters` are plain `field = value` conditions over the entity's JSON
/// fields (camelCase). `search` is a free-text query only the server can
/// evaluate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListQuery {
  pub page: u32,
  pub limit: u32,
  #[serde(default)]
  pub filters: BTreeMap<String, String>,
  #[serde(default)]
  pub search: Option<String>,
}

impl Default for ListQuery {
  fn default() -> Self {
    Self {
      page: 1,
      limit: DEFAULT_PAGE_SIZE,
      filters: BTreeMap::new(),
      search: None,
    }
  }
}

impl ListQuery {
  pub fn new() -> Self {
    Self::default()
  }

  /// # Panics
  ///
  /// Pages are 1-based; page 0 is a caller bug.
  pub fn page(mut self, page: u32) -> Self {
    assert!(page > 0, "list pages are 1-based");
    self.page = page;
    self
  }

  /// # Panics
  ///
  /// A zero page size is a caller bug.
  pub fn limit(mut self, limit: u32) -> Self {
    assert!(limit > 0, "list page size must be positive");
    self.limit = limit;
    self
  }

  pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
    self.filters.insert(field.into(), value.into());
    self
  }

  pub fn search(mut self, text: impl Into<String>) -> Self {
    let text = text.into();
    self.search = if text.trim().is_empty() {
      None
    } else {
      Some(text)
    };
    self
  }

  pub fn is_unfiltered(&self) -> bool {
    self.filters.is_empty() && self.search.is_none()
  }

  /// Same collection, possibly a different page.
  pub fn same_view(&self, other: &ListQuery) -> bool {
    self.limit == other.limit && self.filters == other.filters && self.search == other.search
  }

  /// Query-string pairs for the list endpoint.
  pub fn to_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = vec![
      ("page".to_string(), self.page.to_string()),
      ("limit".to_string(), self.limit.to_string()),
    ];
    if let Some(search) = &self.search {
      pairs.push(("search".to_string(), search.clone()));
    }
    pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
    pairs
  }

  fn canonical(&self) -> String {
    let filters = self
      .filters
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect::<Vec<_>>()
      .join("&");
    format!(
      "{}:{}:{}:{}",
      self.page,
      self.limit,
      filters,
      self.search.as_deref().map(normalize_search).unwrap_or_default()
    )
  }
}

/// Identifier of a single cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheKey {
  /// One page of a list view
  List { kind: EntityKind, query: ListQuery },
  /// A single entity by id
  Detail { kind: EntityKind, id: String },
  /// An aggregate computed by the server
  Stats { kind: EntityKind, params: String },
}

impl CacheKey {
  pub fn list(kind: EntityKind, query: ListQuery) -> Self {
    Self::List { kind, query }
  }

  /// # Panics
  ///
  /// An empty id never names a real entity.
  pub fn detail(kind: EntityKind, id: impl Into<String>) -> Self {
    let id = id.into();
    assert!(!id.is_empty(), "detail cache key needs a non-empty id");
    Self::Detail { kind, id }
  }

  pub fn stats(kind: EntityKind, params: impl Into<String>) -> Self {
    Self::Stats {
      kind,
      params: params.into(),
    }
  }

  pub fn kind(&self) -> EntityKind {
    match self {
      Self::List { kind, .. } | Self::Detail { kind, .. } | Self::Stats { kind, .. } => *kind,
    }
  }

  pub fn is_detail(&self) -> bool {
    matches!(self, Self::Detail { .. })
  }

  /// Stable fixed-length hash used as the storage primary key.
  pub fn cache_hash(&self) -> String {
    let input = match self {
      Self::List { kind, query } => format!("list:{}:{}", kind, query.canonical()),
      Self::Detail { kind, id } => format!("detail:{}:{}", kind, id),
      Self::Stats { kind, params } => format!("stats:{}:{}", kind, params),
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    match self {
      Self::List { kind, query } => {
        let mut text = format!("{} list page {}", kind, query.page);
        if !query.filters.is_empty() {
          let filters = query
            .filters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
          text.push_str(&format!(" [{}]", filters));
        }
        if let Some(search) = &query.search {
          text.push_str(&format!(" search '{}'", search));
        }
        text
      }
      Self::Detail { kind, id } => format!("{} {}", kind, id),
      Self::Stats { kind, params } if params.is_empty() => format!("{} stats", kind),
      Self::Stats { kind, params } => format!("{} stats ({})", kind, params),
    }
  }
}

/// A set of cache entries to mark stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
  /// Everything
  All,
  /// Lists, details and stats of a kind (nested kinds resolve to their root)
  Kind(EntityKind),
  /// Every list view of a kind
  Lists(EntityKind),
  /// One list page
  List(EntityKind, ListQuery),
  /// One detail entry
  Detail(EntityKind, String),
  /// Every stats entry of a kind
  Stats(EntityKind),
}

/// Normalize search text for consistent hashing.
fn normalize_search(text: &str) -> String {
  text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_ignores_search_case_and_padding() {
    let a = CacheKey::list(EntityKind::Job, ListQuery::new().search("  Rust Intern "));
    let b = CacheKey::list(EntityKind::Job, ListQuery::new().search("rust intern"));
    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
  }

  #[test]
  fn hash_separates_kinds_and_pages() {
    let expenses = CacheKey::list(EntityKind::Expense, ListQuery::new());
    let incomes = CacheKey::list(EntityKind::Income, ListQuery::new());
    let page_two = CacheKey::list(EntityKind::Expense, ListQuery::new().page(2));
    assert_ne!(expenses.cache_hash(), incomes.cache_hash());
    assert_ne!(expenses.cache_hash(), page_two.cache_hash());
  }

  #[test]
  fn blank_search_counts_as_unfiltered() {
    assert!(ListQuery::new().search("   ").is_unfiltered());
    assert!(!ListQuery::new().filter("status", "OPEN").is_unfiltered());
  }

  #[test]
  fn same_view_ignores_page() {
    let first = ListQuery::new().filter("category", "food");
    let second = first.clone().page(3);
    assert!(first.same_view(&second));
    assert!(!first.same_view(&ListQuery::new()));
  }

  #[test]
  #[should_panic(expected = "non-empty id")]
  fn empty_detail_id_fails_fast() {
    let _ = CacheKey::detail(EntityKind::Expense, "");
  }

  #[test]
  fn description_mentions_filters() {
    let key = CacheKey::list(
      EntityKind::Application,
      ListQuery::new().filter("status", "PENDING"),
    );
    assert_eq!(key.description(), "application list page 1 [status=PENDING]");
  }
}
