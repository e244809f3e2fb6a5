//! Mutation handle with a pending flag, the write-side sibling of
//! [`Query`](crate::query::Query).
//!
//! While a mutation is pending, `mutate` refuses to start another one. This
//! is the only guard against double submission; the cache itself does not
//! deduplicate.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone)]
pub enum MutationState<T> {
  Idle,
  Pending,
  Success(T),
  Error(String),
}

type MutateFn<I, T> = Box<dyn Fn(I) -> BoxFuture<'static, Result<T>> + Send + Sync>;

pub struct Mutation<I, T> {
  state: MutationState<T>,
  mutate_fn: MutateFn<I, T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T>>>,
}

impl<I: Send + 'static, T: Send + 'static> Mutation<I, T> {
  /// `mutate_fn` normally wraps a [`Campus`](crate::campus::Campus) call, so
  /// notifications and cache effects are already handled.
  pub fn new<F, Fut>(mutate_fn: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      state: MutationState::Idle,
      mutate_fn: Box::new(move |input| mutate_fn(input).boxed()),
      receiver: None,
    }
  }

  pub fn state(&self) -> &MutationState<T> {
    &self.state
  }

  pub fn is_pending(&self) -> bool {
    matches!(self.state, MutationState::Pending)
  }

  /// Start the mutation. Returns false, and drops `input`, while a previous
  /// one is still pending.
  pub fn mutate(&mut self, input: I) -> bool {
    if self.is_pending() {
      return false;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = MutationState::Pending;

    let future = (self.mutate_fn)(input);
    tokio::spawn(async move {
      let _ = tx.send(future.await);
    });
    true
  }

  /// Returns `true` when the pending mutation finished.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    let state = match receiver.try_recv() {
      Ok(Ok(value)) => MutationState::Success(value),
      Ok(Err(e)) => MutationState::Error(e.to_string()),
      Err(mpsc::error::TryRecvError::Empty) => return false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        MutationState::Error("Mutation was cancelled".to_string())
      }
    };

    self.state = state;
    self.receiver = None;
    true
  }

  /// Back to idle once the outcome has been shown.
  pub fn reset(&mut self) {
    if !self.is_pending() {
      self.state = MutationState::Idle;
    }
  }
}
