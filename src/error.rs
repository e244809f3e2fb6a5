//! Error type shared by the cache, the API client and the mutation runner.

use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SyncError {
  /// Non-2xx response. `message` is the server's own text when it sent one.
  #[error("{message}")]
  Api { status: u16, message: String },

  #[error("Request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("Invalid API url: {0}")]
  Url(#[from] url::ParseError),

  #[error("Failed to decode payload: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("Patch cannot be applied: {0}")]
  InvalidPatch(String),

  #[error("Cache storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Cache lock poisoned")]
  LockPoisoned,
}

impl SyncError {
  /// HTTP status of an API error.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Api { status, .. } => Some(*status),
      Self::Transport(e) => e.status().map(|s| s.as_u16()),
      _ => None,
    }
  }

  /// Whether the failure came from talking to the server rather than from
  /// local state.
  pub fn is_remote(&self) -> bool {
    matches!(self, Self::Api { .. } | Self::Transport(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn api_error_shows_server_message_verbatim() {
    let err = SyncError::Api {
      status: 422,
      message: "Amount must be positive".to_string(),
    };
    assert_eq!(err.to_string(), "Amount must be positive");
    assert_eq!(err.status(), Some(422));
    assert!(err.is_remote());
  }

  #[test]
  fn local_errors_are_not_remote() {
    let err = SyncError::InvalidPatch("amount: invalid type".to_string());
    assert!(!err.is_remote());
    assert_eq!(err.status(), None);
  }
}
