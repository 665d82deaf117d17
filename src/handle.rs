use crate::error::PoolError;
use crate::task::TaskOutcome;

use std::fmt;

use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing;

/// A handle to a task submitted to the `ThreadPoolManager`.
///
/// The handle is the only way to observe a task's outcome. It can be moved but not
/// cloned. Once the outcome arrives it is cached, so `wait` and `try_result` can be
/// called any number of times and always report the same outcome.
///
/// The blocking accessors (`wait`, `join`) must not be called from inside an async
/// runtime; use `await_result` there.
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) result_receiver: Option<oneshot::Receiver<TaskOutcome<R>>>,
  pub(crate) outcome: Option<TaskOutcome<R>>,
}

impl<R: Send + 'static> fmt::Debug for TaskHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.task_id)
      .field("resolved", &self.outcome.is_some())
      .finish()
  }
}

impl<R: Send + 'static> TaskHandle<R> {
  pub(crate) fn new(task_id: u64, result_receiver: oneshot::Receiver<TaskOutcome<R>>) -> Self {
    Self {
      task_id,
      result_receiver: Some(result_receiver),
      outcome: None,
    }
  }

  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Blocks until the task's outcome is available and returns it.
  ///
  /// The outcome is cached: calling `wait` again returns the identical outcome
  /// without blocking.
  ///
  /// # Errors
  /// Returns `PoolError::TaskPanicked` if the task panicked during execution.
  /// Returns `PoolError::TaskAbandoned` if the task was accepted but never ran.
  pub fn wait(&mut self) -> Result<&R, PoolError> {
    let outcome = self.take_outcome_blocking();
    self.outcome.insert(outcome).as_ref().map_err(Clone::clone)
  }

  /// Checks for the outcome without blocking. Returns `None` while the task is
  /// still queued or running.
  pub fn try_result(&mut self) -> Option<Result<&R, PoolError>> {
    if self.outcome.is_none() {
      if let Some(rx) = self.result_receiver.as_mut() {
        let outcome = match rx.try_recv() {
          Ok(outcome) => outcome,
          Err(TryRecvError::Empty) => return None,
          Err(TryRecvError::Closed) => {
            tracing::warn!(task_id = %self.task_id, "Result channel closed without an outcome.");
            Err(PoolError::TaskAbandoned)
          }
        };
        self.result_receiver = None;
        self.outcome = Some(outcome);
      }
    }
    self
      .outcome
      .as_ref()
      .map(|outcome| outcome.as_ref().map_err(Clone::clone))
  }

  /// Returns `true` once the outcome is available.
  pub fn is_finished(&mut self) -> bool {
    self.try_result().is_some()
  }

  /// Blocks until the task completes and returns its outcome by value.
  pub fn join(mut self) -> Result<R, PoolError> {
    self.take_outcome_blocking()
  }

  /// Awaits the completion of the task and returns its outcome by value.
  ///
  /// # Errors
  /// Returns `PoolError::TaskPanicked` if the task panicked during execution.
  /// Returns `PoolError::TaskAbandoned` if the task was accepted but never ran.
  pub async fn await_result(mut self) -> Result<R, PoolError> {
    if let Some(outcome) = self.outcome.take() {
      return outcome;
    }
    match self.result_receiver.take() {
      Some(rx) => match rx.await {
        Ok(outcome) => outcome,
        Err(recv_error) => {
          tracing::warn!(task_id = %self.task_id, "Result channel receive error: {}", recv_error);
          Err(PoolError::TaskAbandoned)
        }
      },
      // The receiver is only released together with storing its outcome, which was
      // returned above.
      None => Err(PoolError::TaskAbandoned),
    }
  }

  fn take_outcome_blocking(&mut self) -> TaskOutcome<R> {
    if let Some(outcome) = self.outcome.take() {
      return outcome;
    }
    match self.result_receiver.take() {
      Some(rx) => match rx.blocking_recv() {
        Ok(outcome) => outcome,
        Err(recv_error) => {
          // The sender was dropped without an outcome, so the task can no longer run.
          tracing::warn!(task_id = %self.task_id, "Result channel receive error: {}", recv_error);
          Err(PoolError::TaskAbandoned)
        }
      },
      // The receiver is only released together with storing its outcome, which was
      // returned above.
      None => Err(PoolError::TaskAbandoned),
    }
  }
}
