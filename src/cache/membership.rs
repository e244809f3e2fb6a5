//! Local evaluation of list-view membership.
//!
//! A list view can only be edited in place when its membership criteria can
//! be checked against the entity itself. Plain `field = value` filters can;
//! server-side search or filters on fields the entity doesn't carry can't,
//! and those views get invalidated instead.

use serde_json::Value;

use super::key::ListQuery;
use super::patch::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
  /// The entity belongs in the view
  In,
  /// The entity is excluded by a filter
  Out,
  /// Only the server can tell
  Unknown,
}

impl ListQuery {
  /// Evaluate the view's criteria against a full entity.
  pub fn membership(&self, entity: &Value) -> Membership {
    let mut unknown = self.search.is_some();

    for (field, expected) in &self.filters {
      match entity.get(field).and_then(|value| field_matches(value, expected)) {
        Some(true) => {}
        Some(false) => return Membership::Out,
        None => unknown = true,
      }
    }

    if unknown {
      Membership::Unknown
    } else {
      Membership::In
    }
  }

  /// Evaluate the view's criteria against the fields a patch sets.
  ///
  /// Filters on fields the patch leaves alone count as unknown.
  pub fn membership_of_patch(&self, patch: &Patch) -> Membership {
    let mut unknown = self.search.is_some();

    for (field, expected) in &self.filters {
      match patch.get(field).and_then(|value| field_matches(value, expected)) {
        Some(true) => {}
        Some(false) => return Membership::Out,
        None => unknown = true,
      }
    }

    if unknown {
      Membership::Unknown
    } else {
      Membership::In
    }
  }

  /// Whether a patch could change this view's membership.
  pub fn depends_on(&self, patch: &Patch) -> bool {
    self.search.is_some() || self.filters.keys().any(|field| patch.touches(field))
  }
}

fn field_matches(value: &Value, expected: &str) -> Option<bool> {
  match value {
    Value::String(s) => Some(s == expected),
    Value::Number(n) => {
      // `40` and `40.0` are the same amount; text that isn't a number can't
      // be judged locally.
      let expected: f64 = expected.trim().parse().ok()?;
      n.as_f64().map(|actual| actual == expected)
    }
    Value::Bool(b) => Some(b.to_string() == expected),
    Value::Null => Some(false),
    Value::Array(_) | Value::Object(_) => None,
  }
}
