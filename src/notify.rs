//! User-facing mutation notifications (toasts).

use tokio::sync::mpsc;

/// One toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  Success(String),
  Error(String),
}

impl Notification {
  pub fn message(&self) -> &str {
    match self {
      Notification::Success(m) | Notification::Error(m) => m,
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Notification::Error(_))
  }
}

/// Fire-and-forget sink for mutation outcomes.
pub trait Notifier: Send + Sync {
  fn success(&self, message: &str);
  fn error(&self, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn success(&self, message: &str) {
    tracing::info!(target: "campus_sync::notify", "{}", message);
  }

  fn error(&self, message: &str) {
    tracing::error!(target: "campus_sync::notify", "{}", message);
  }
}

/// Forwards notifications to a receiver, e.g. a UI event loop.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  fn send(&self, notification: Notification) {
    // Nobody listening is fine
    let _ = self.tx.send(notification);
  }
}

impl Notifier for ChannelNotifier {
  fn success(&self, message: &str) {
    self.send(Notification::Success(message.to_string()));
  }

  fn error(&self, message: &str) {
    self.send(Notification::Error(message.to_string()));
  }
}
