use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind};

/// A single spending record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
  pub id: String,
  pub title: String,
  pub amount: f64,
  #[serde(default)]
  pub category: String,
  /// Day the money was spent (YYYY-MM-DD)
  #[serde(default)]
  pub date: String,
  #[serde(default)]
  pub note: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

/// A single earning record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Income {
  pub id: String,
  pub title: String,
  pub amount: f64,
  /// Where the money came from (scholarship, part-time job, ...)
  #[serde(default)]
  pub source: String,
  #[serde(default)]
  pub date: String,
  #[serde(default)]
  pub note: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

impl Entity for Expense {
  const KIND: EntityKind = EntityKind::Expense;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[EntityKind::Expense]
  }
}

impl Entity for Income {
  const KIND: EntityKind = EntityKind::Income;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[EntityKind::Income]
  }
}
