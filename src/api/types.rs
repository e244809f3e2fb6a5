//! Serde types for REST response bodies that don't map straight onto the
//! domain model.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::Result;

/// Some endpoints wrap their payload in `{ "data": ... }`, others return it
/// bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
  Wrapped { data: T },
  Bare(T),
}

impl<T> Envelope<T> {
  pub fn into_inner(self) -> T {
    match self {
      Envelope::Wrapped { data } | Envelope::Bare(data) => data,
    }
  }
}

/// Decode a success body, unwrapping the envelope if present.
pub fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T> {
  let envelope: Envelope<T> = serde_json::from_str(body)?;
  Ok(envelope.into_inner())
}

// ============================================================================
// Error bodies
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  #[serde(default)]
  message: Option<ApiMessage>,
  #[serde(default)]
  error: Option<String>,
}

/// Validation errors come back as a list of messages.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiMessage {
  One(String),
  Many(Vec<String>),
}

/// The message to show the user for a failed request: the server's own
/// `message` (or `error`) when the body carries one, otherwise the raw body,
/// otherwise `fallback`.
pub fn extract_message(body: &str, fallback: &str) -> String {
  if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
    let message = match parsed.message {
      Some(ApiMessage::One(m)) => Some(m),
      Some(ApiMessage::Many(all)) if !all.is_empty() => Some(all.join(", ")),
      _ => None,
    };
    if let Some(m) = message.or(parsed.error).filter(|m| !m.trim().is_empty()) {
      return m;
    }
  }

  let body = body.trim();
  if body.is_empty() || body.starts_with('{') {
    fallback.to_string()
  } else {
    body.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Expense, Page};

  #[test]
  fn server_message_is_taken_verbatim() {
    let body = r#"{"statusCode":400,"message":"Amount must be positive","error":"Bad Request"}"#;
    assert_eq!(extract_message(body, "Bad Request"), "Amount must be positive");
  }

  #[test]
  fn message_lists_are_joined() {
    let body = r#"{"message":["title should not be empty","amount must be a number"]}"#;
    assert_eq!(
      extract_message(body, "Bad Request"),
      "title should not be empty, amount must be a number"
    );
  }

  #[test]
  fn falls_back_to_error_field_then_body_then_reason() {
    assert_eq!(extract_message(r#"{"error":"Forbidden"}"#, "x"), "Forbidden");
    assert_eq!(extract_message("upstream timed out", "x"), "upstream timed out");
    assert_eq!(extract_message("", "Service Unavailable"), "Service Unavailable");
    assert_eq!(extract_message(r#"{"detail":1}"#, "Not Found"), "Not Found");
  }

  #[test]
  fn bodies_decode_with_or_without_envelope() {
    let bare = r#"{"items":[],"pagination":{"page":1,"limit":10,"total":0,"totalPages":0}}"#;
    let wrapped = format!(r#"{{"data":{}}}"#, bare);

    let a: Page<Expense> = decode_body(bare).unwrap();
    let b: Page<Expense> = decode_body(&wrapped).unwrap();
    assert_eq!(a, b);
  }
}
