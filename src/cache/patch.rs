//! Shallow field patches applied to cached entities.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::model::Entity;

/// A set of top-level JSON fields to overwrite on an entity.
///
/// Merging replaces whole fields; fields absent from the patch keep their
/// cached value. The `id` field is never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.0.insert(field.into(), value.into());
    self
  }

  /// Patch replacing every field of `entity`, for authoritative server
  /// responses.
  pub fn from_entity<T: Serialize>(entity: &T) -> Result<Self> {
    Self::from_json(serde_json::to_value(entity)?)
  }

  pub fn from_json(value: Value) -> Result<Self> {
    match value {
      Value::Object(fields) => Ok(Self(fields)),
      other => Err(SyncError::InvalidPatch(format!(
        "expected a JSON object, got {}",
        other
      ))),
    }
  }

  /// Drop `fields` from the patch.
  pub fn without(mut self, fields: &[&str]) -> Self {
    for field in fields {
      self.0.remove(*field);
    }
    self
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }

  pub fn touches(&self, field: &str) -> bool {
    self.0.contains_key(field)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn updated_at(&self) -> Option<&str> {
    self.0.get("updatedAt").and_then(Value::as_str)
  }

  pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }

  /// Merge this patch into `current`, producing the updated entity.
  pub fn apply<T: Entity>(&self, current: &T) -> Result<T> {
    let mut value = serde_json::to_value(current)?;
    let Value::Object(fields) = &mut value else {
      return Err(SyncError::InvalidPatch(format!(
        "{} does not serialize to an object",
        T::KIND
      )));
    };

    for (field, new_value) in &self.0 {
      if field == "id" {
        continue;
      }
      fields.insert(field.clone(), new_value.clone());
    }

    serde_json::from_value(value).map_err(|e| SyncError::InvalidPatch(format!("{}: {}", T::KIND, e)))
  }
}
