use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, InsertAt};
use crate::cache::{Container, Nested};

/// A kanban board with its columns and their tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  /// Ordered left to right; list responses may leave this empty
  #[serde(default)]
  pub columns: Vec<Column>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
  pub id: String,
  pub board_id: String,
  pub title: String,
  #[serde(default)]
  pub position: u32,
  /// Ordered top to bottom
  #[serde(default)]
  pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  pub column_id: String,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub priority: Option<String>,
  #[serde(default)]
  pub due_date: Option<String>,
  #[serde(default)]
  pub position: u32,
  #[serde(default)]
  pub updated_at: Option<String>,
}

impl Entity for Board {
  const KIND: EntityKind = EntityKind::Board;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[]
  }

  fn embedded_fields() -> &'static [&'static str] {
    &["columns"]
  }
}

impl Entity for Column {
  const KIND: EntityKind = EntityKind::Column;
  const INSERT_AT: InsertAt = InsertAt::Back;

  fn id(&self) -> &str {
    &self.id
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[]
  }

  fn embedded_fields() -> &'static [&'static str] {
    &["tasks"]
  }
}

impl Entity for Task {
  const KIND: EntityKind = EntityKind::Task;
  const INSERT_AT: InsertAt = InsertAt::Back;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[]
  }
}

impl Nested for Column {
  type Root = Board;
  const CONTAINER_FIELD: &'static str = "boardId";

  fn container_id(&self) -> &str {
    &self.board_id
  }

  fn containers_mut(root: &mut Board) -> Vec<Container<'_, Self>> {
    let Board { id, columns, .. } = root;
    vec![Container {
      id: id.as_str(),
      items: columns,
    }]
  }

  /// Board summaries come without columns; an empty board can't be told
  /// apart from one, so it takes a refetch too.
  fn embeds_children(root: &Board) -> bool {
    !root.columns.is_empty()
  }
}

impl Nested for Task {
  type Root = Board;
  const CONTAINER_FIELD: &'static str = "columnId";

  fn container_id(&self) -> &str {
    &self.column_id
  }

  fn containers_mut(root: &mut Board) -> Vec<Container<'_, Self>> {
    root
      .columns
      .iter_mut()
      .map(|Column { id, tasks, .. }| Container {
        id: id.as_str(),
        items: tasks,
      })
      .collect()
  }
}
