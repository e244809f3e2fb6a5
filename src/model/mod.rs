//! Domain records served by the campus REST API.
//!
//! Every record type implements [`Entity`], which is all the cache needs to
//! know about it: an id, an optional modification stamp and where new records
//! land in list views.

mod finance;
mod jobs;
mod kanban;
mod qa;

pub use finance::{Expense, Income};
pub use jobs::{Application, ApplicationStatus, Job, JobStatus};
pub use kanban::{Board, Column, Task};
pub use qa::{Answer, Question};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a freshly created entity is placed in an ordered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
  /// Newest first (most list views)
  Front,
  /// Oldest first (kanban columns, answer threads)
  Back,
}

/// A record identified by an opaque string id.
pub trait Entity: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Which kind of record this is
  const KIND: EntityKind;

  /// Display order of the collections holding this entity
  const INSERT_AT: InsertAt = InsertAt::Front;

  fn id(&self) -> &str;

  /// Last modification timestamp (ISO 8601), if the API reports one.
  fn updated_at(&self) -> Option<&str> {
    None
  }

  /// Aggregate views computed over this kind.
  fn stats_kinds() -> &'static [EntityKind];

  /// Kinds whose cached views reference this one by id.
  fn dependents() -> &'static [EntityKind] {
    &[]
  }

  /// JSON fields holding embedded child collections. Mutation responses
  /// often leave them out, so they never overwrite cached children.
  fn embedded_fields() -> &'static [&'static str] {
    &[]
  }
}

// ============================================================================
// Entity kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Expense,
  Income,
  Job,
  Application,
  Board,
  Column,
  Task,
  Question,
  Answer,
}

impl EntityKind {
  pub const ALL: [EntityKind; 9] = [
    EntityKind::Expense,
    EntityKind::Income,
    EntityKind::Job,
    EntityKind::Application,
    EntityKind::Board,
    EntityKind::Column,
    EntityKind::Task,
    EntityKind::Question,
    EntityKind::Answer,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Self::Expense => "expense",
      Self::Income => "income",
      Self::Job => "job",
      Self::Application => "application",
      Self::Board => "board",
      Self::Column => "column",
      Self::Task => "task",
      Self::Question => "question",
      Self::Answer => "answer",
    }
  }

  /// REST collection segment, e.g. `expenses`.
  pub fn collection(self) -> &'static str {
    match self {
      Self::Expense => "expenses",
      Self::Income => "incomes",
      Self::Job => "jobs",
      Self::Application => "applications",
      Self::Board => "boards",
      Self::Column => "columns",
      Self::Task => "tasks",
      Self::Question => "questions",
      Self::Answer => "answers",
    }
  }

  /// The top-level kind whose cache entries hold this kind.
  pub fn root(self) -> EntityKind {
    match self {
      Self::Column | Self::Task => Self::Board,
      Self::Answer => Self::Question,
      other => other,
    }
  }

  pub fn is_nested(self) -> bool {
    self.root() != self
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for EntityKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim().to_lowercase();
    Self::ALL
      .into_iter()
      .find(|kind| kind.name() == s || kind.collection() == s)
      .ok_or_else(|| format!("unknown entity kind '{}'", s))
  }
}

// ============================================================================
// Paginated lists
// ============================================================================

/// Pagination block returned with every list response.
///
/// Totals are advisory: local edits only nudge them, the next full fetch
/// corrects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
  pub page: u32,
  pub limit: u32,
  pub total: u64,
  pub total_pages: u32,
}

impl Pagination {
  pub fn new(page: u32, limit: u32, total: u64) -> Self {
    let mut pagination = Self {
      page,
      limit,
      total,
      total_pages: 0,
    };
    pagination.recount_pages();
    pagination
  }

  pub fn note_inserted(&mut self) {
    self.total += 1;
    self.recount_pages();
  }

  pub fn note_removed(&mut self) {
    self.total = self.total.saturating_sub(1);
    self.recount_pages();
  }

  /// Whether this is the last page of the collection.
  pub fn is_last_page(&self) -> bool {
    self.page >= self.total_pages.max(1)
  }

  fn recount_pages(&mut self) {
    if self.limit > 0 {
      self.total_pages = self.total.div_ceil(u64::from(self.limit)) as u32;
    }
  }
}

/// One page of a list view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub pagination: Pagination,
}

impl<T: Entity> Page<T> {
  pub fn position(&self, id: &str) -> Option<usize> {
    self.items.iter().position(|item| item.id() == id)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.position(id).is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_parses_singular_and_plural() {
    assert_eq!("expense".parse::<EntityKind>(), Ok(EntityKind::Expense));
    assert_eq!("Tasks".parse::<EntityKind>(), Ok(EntityKind::Task));
    assert!("invoice".parse::<EntityKind>().is_err());
  }

  #[test]
  fn nested_kinds_map_to_their_root() {
    assert_eq!(EntityKind::Task.root(), EntityKind::Board);
    assert_eq!(EntityKind::Column.root(), EntityKind::Board);
    assert_eq!(EntityKind::Answer.root(), EntityKind::Question);
    assert!(!EntityKind::Job.is_nested());
  }

  #[test]
  fn pagination_counts_follow_simple_increments() {
    let mut pagination = Pagination::new(1, 10, 10);
    assert_eq!(pagination.total_pages, 1);

    pagination.note_inserted();
    assert_eq!(pagination.total, 11);
    assert_eq!(pagination.total_pages, 2);

    pagination.note_removed();
    pagination.note_removed();
    assert_eq!(pagination.total, 9);
    assert_eq!(pagination.total_pages, 1);
  }

  #[test]
  fn pagination_never_underflows() {
    let mut pagination = Pagination::new(1, 10, 0);
    pagination.note_removed();
    assert_eq!(pagination.total, 0);
    assert!(pagination.is_last_page());
  }
}
