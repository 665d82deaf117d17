use crate::error::PoolError;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The type of closure that the pool executes.
/// It must be `Send` and `'static`, and produce a result of type `R`.
///
/// Borrowed captures are rejected at compile time; share large inputs with the
/// task through an `Arc` instead.
pub type TaskToExecute<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// What a task hands back to its handle: the produced value, or the reason there is none.
pub(crate) type TaskOutcome<R> = Result<R, PoolError>;

/// A type-erased unit of queued work.
///
/// Exactly one of `run` or `abandon` is called for every runnable that enters the queue,
/// and both consume it, so a task can never be executed twice.
pub(crate) trait Runnable: Send {
  fn task_id(&self) -> u64;

  /// Executes the task, containing any panic, and delivers the outcome.
  fn run(self: Box<Self>);

  /// Resolves the task's handle with `PoolError::TaskAbandoned` without executing it.
  fn abandon(self: Box<Self>);
}

/// Internal representation of a task managed by the pool.
pub(crate) struct ManagedTaskInternal<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) job: TaskToExecute<R>,
  pub(crate) result_sender: oneshot::Sender<TaskOutcome<R>>,
}

impl<R: Send + 'static> ManagedTaskInternal<R> {
  /// Wraps `job` with a fresh task id and returns it together with the receiving half
  /// of its result channel.
  pub(crate) fn new(job: TaskToExecute<R>) -> (Self, oneshot::Receiver<TaskOutcome<R>>) {
    let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let (result_sender, result_receiver) = oneshot::channel();
    (
      Self {
        task_id,
        job,
        result_sender,
      },
      result_receiver,
    )
  }

  fn deliver(task_id: u64, sender: oneshot::Sender<TaskOutcome<R>>, outcome: TaskOutcome<R>) {
    if sender.send(outcome).is_err() {
      warn!(
        %task_id,
        "Result receiver for task was dropped. Task outcome may have been lost."
      );
    }
  }
}

impl<R: Send + 'static> Runnable for ManagedTaskInternal<R> {
  fn task_id(&self) -> u64 {
    self.task_id
  }

  fn run(self: Box<Self>) {
    let ManagedTaskInternal {
      task_id,
      job,
      result_sender,
    } = *self;

    let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
      Ok(value) => {
        trace!(%task_id, "Task executed successfully.");
        Ok(value)
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!(%task_id, %message, "Task panicked during execution.");
        Err(PoolError::TaskPanicked(message))
      }
    };

    Self::deliver(task_id, result_sender, outcome);
  }

  fn abandon(self: Box<Self>) {
    let ManagedTaskInternal {
      task_id,
      result_sender,
      ..
    } = *self;
    debug!(%task_id, "Abandoning task that never ran.");
    Self::deliver(task_id, result_sender, Err(PoolError::TaskAbandoned));
  }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
