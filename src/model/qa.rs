use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, InsertAt};
use crate::cache::{Container, Nested};

/// A forum question; detail responses embed the answer thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub votes: i64,
  #[serde(default)]
  pub answer_count: u32,
  #[serde(default)]
  pub answers: Vec<Answer>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
  pub id: String,
  pub question_id: String,
  pub body: String,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub votes: i64,
  #[serde(default)]
  pub accepted: bool,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

impl Entity for Question {
  const KIND: EntityKind = EntityKind::Question;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[EntityKind::Question]
  }

  fn embedded_fields() -> &'static [&'static str] {
    &["answers", "answerCount"]
  }
}

impl Entity for Answer {
  const KIND: EntityKind = EntityKind::Answer;
  const INSERT_AT: InsertAt = InsertAt::Back;

  fn id(&self) -> &str {
    &self.id
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn stats_kinds() -> &'static [EntityKind] {
    &[EntityKind::Question]
  }
}

impl Nested for Answer {
  type Root = Question;
  const CONTAINER_FIELD: &'static str = "questionId";

  fn container_id(&self) -> &str {
    &self.question_id
  }

  fn containers_mut(root: &mut Question) -> Vec<Container<'_, Self>> {
    let Question { id, answers, .. } = root;
    vec![Container {
      id: id.as_str(),
      items: answers,
    }]
  }

  fn adjust_count(root: &mut Question, delta: i64) {
    root.answer_count = (i64::from(root.answer_count) + delta).max(0) as u32;
  }

  fn embeds_children(root: &Question) -> bool {
    root.answers.len() == root.answer_count as usize
  }
}
