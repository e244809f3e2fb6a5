//! REST paths per entity type.

use crate::cache::Nested;
use crate::model::{
  Answer, Application, Board, Column, Entity, Expense, Income, Job, Question, Task,
};

/// An entity with REST endpoints. Paths are relative to the API root.
pub trait Resource: Entity {
  fn collection_path() -> String {
    Self::KIND.collection().to_string()
  }

  fn item_path(id: &str) -> String {
    format!("{}/{}", Self::collection_path(), id)
  }

  /// Where to POST a new entity; children are created under their parent.
  fn create_path(_parent: Option<&str>) -> String {
    Self::collection_path()
  }
}

impl Resource for Expense {}
impl Resource for Income {}
impl Resource for Job {}
impl Resource for Board {}
impl Resource for Question {}

impl Resource for Application {
  /// Applications are submitted against a job when one is given.
  fn create_path(parent: Option<&str>) -> String {
    match parent {
      Some(job) => format!("jobs/{}/applications", job),
      None => Self::collection_path(),
    }
  }
}

macro_rules! nested_resource {
  ($($entity:ty => $parent:literal),* $(,)?) => {
    $(
      impl Resource for $entity {
        fn create_path(parent: Option<&str>) -> String {
          match parent {
            Some(parent) => format!("{}/{}/{}", $parent, parent, Self::collection_path()),
            None => Self::collection_path(),
          }
        }
      }
    )*
  };
}

nested_resource! {
  Column => "boards",
  Task => "columns",
  Answer => "questions",
}

/// Where to PATCH a move of a child to another container.
pub fn move_path<T: Resource + Nested>(id: &str) -> String {
  format!("{}/move", T::item_path(id))
}
