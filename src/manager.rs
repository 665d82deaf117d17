use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::task::{ManagedTaskInternal, Runnable};
use crate::task_queue::{PoolState, TaskQueue};

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{self, debug, error, info, info_span, trace, warn};

const DEFAULT_POOL_NAME: &str = "thread_orchestra";

/// Construction options for a `ThreadPoolManager`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Number of worker threads spawned by `start`. Zero is treated as one.
  pub worker_count: usize,
  /// Used in log fields and as the prefix of worker thread names.
  pub pool_name: String,
  /// Stack size for worker threads; the platform default when `None`.
  pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      worker_count: thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
      pool_name: DEFAULT_POOL_NAME.to_string(),
      stack_size: None,
    }
  }
}

impl PoolConfig {
  pub fn with_worker_count(mut self, worker_count: usize) -> Self {
    self.worker_count = worker_count;
    self
  }

  pub fn with_pool_name(mut self, pool_name: &str) -> Self {
    self.pool_name = pool_name.to_string();
    self
  }

  pub fn with_stack_size(mut self, stack_size: usize) -> Self {
    self.stack_size = Some(stack_size);
    self
  }
}

/// A fixed-size pool of OS threads executing submitted closures in FIFO order.
///
/// The pool starts `Running` on construction. `stop()` lets the workers drain every
/// task already queued, then joins them; `start()` brings up a fresh set of workers.
/// Dropping the manager stops it.
///
/// Share the manager between submitting threads with an `Arc`.
pub struct ThreadPoolManager {
  pool_name: Arc<String>,
  stack_size: Option<usize>,
  queue: Arc<TaskQueue>,
  active_tasks: Arc<AtomicUsize>,
  live_workers: Arc<AtomicUsize>,
  // Lifecycle lock: held for the whole of `start` and `stop` so that a new generation
  // of workers never overlaps with one that is still draining.
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ThreadPoolManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadPoolManager")
      .field("pool_name", &self.pool_name)
      .field("queue", &self.queue)
      .field("active_tasks", &self.active_task_count())
      .field("live_workers", &self.live_worker_count())
      .finish_non_exhaustive()
  }
}

impl ThreadPoolManager {
  /// Creates a pool and starts `worker_count` workers.
  pub fn new(worker_count: usize, pool_name: &str) -> Result<Self, PoolError> {
    Self::with_config(
      PoolConfig::default()
        .with_worker_count(worker_count)
        .with_pool_name(pool_name),
    )
  }

  /// Creates a pool from `config` and starts its workers.
  pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
    let manager = Self {
      pool_name: Arc::new(config.pool_name),
      stack_size: config.stack_size,
      queue: Arc::new(TaskQueue::new()),
      active_tasks: Arc::new(AtomicUsize::new(0)),
      live_workers: Arc::new(AtomicUsize::new(0)),
      workers: Mutex::new(Vec::new()),
    };
    manager.start(config.worker_count)?;
    Ok(manager)
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn state(&self) -> PoolState {
    self.queue.state()
  }

  pub fn is_running(&self) -> bool {
    self.state() == PoolState::Running
  }

  /// Returns the current number of tasks in the pending queue.
  pub fn queued_task_count(&self) -> usize {
    self.queue.len()
  }

  /// Returns the number of tasks currently being executed by a worker.
  pub fn active_task_count(&self) -> usize {
    self.active_tasks.load(AtomicOrdering::SeqCst)
  }

  /// Returns the number of worker threads that have not yet exited.
  pub fn live_worker_count(&self) -> usize {
    self.live_workers.load(AtomicOrdering::SeqCst)
  }

  /// Enqueues `task` and returns a handle to its eventual outcome.
  ///
  /// Never blocks on the task itself. A panic inside `task` is captured and
  /// delivered through the handle as `PoolError::TaskPanicked`.
  ///
  /// # Errors
  /// Returns `PoolError::PoolStopped` if the pool is not running. The task is
  /// dropped without being executed.
  pub fn submit<F, R>(&self, task: F) -> Result<TaskHandle<R>, PoolError>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let (managed_task_internal, result_rx) = ManagedTaskInternal::new(Box::new(task));
    let task_id = managed_task_internal.task_id;

    match self.queue.push(Box::new(managed_task_internal)) {
      Ok(()) => {
        debug!(pool_name = %self.pool_name, %task_id, "Submitted task to queue.");
        Ok(TaskHandle::new(task_id, result_rx))
      }
      Err(_rejected) => {
        warn!(pool_name = %self.pool_name, %task_id, "Submit: Attempted to submit task to a stopped pool.");
        Err(PoolError::PoolStopped)
      }
    }
  }

  /// Transitions the pool to `Running` and spawns `worker_count` workers.
  ///
  /// Does nothing if the pool is already running. Blocks while a concurrent `stop()`
  /// is still joining the previous workers.
  ///
  /// # Errors
  /// Returns `PoolError::WorkerSpawnFailed` if a worker thread could not be spawned.
  /// The workers spawned so far are stopped again and the pool is left `Stopped`.
  pub fn start(&self, worker_count: usize) -> Result<(), PoolError> {
    let mut workers = self.workers.lock();
    let Some(generation) = self.queue.open() else {
      trace!(pool_name = %self.pool_name, "Start: Pool already running.");
      return Ok(());
    };

    let worker_count = worker_count.max(1);
    info!(pool_name = %self.pool_name, worker_count, generation, "Starting pool workers.");

    for worker_index in 0..worker_count {
      match self.spawn_worker(worker_index, generation) {
        Ok(join_handle) => workers.push(join_handle),
        Err(spawn_error) => {
          error!(
            pool_name = %self.pool_name,
            worker_index,
            "Failed to spawn worker thread: {}", spawn_error
          );
          self.shutdown_workers(&mut workers);
          return Err(PoolError::WorkerSpawnFailed(spawn_error.to_string()));
        }
      }
    }
    Ok(())
  }

  /// Stops accepting tasks, lets the workers drain everything queued so far, and
  /// blocks until every worker has exited.
  ///
  /// Calling `stop` on a stopped pool is a no-op. When called from one of this pool's
  /// own tasks, the calling worker is not joined; it exits as soon as its task returns
  /// and never serves a later `start()`. Calling `start` or `stop` from a task
  /// while another thread is already stopping the pool deadlocks.
  pub fn stop(&self) {
    let mut workers = self.workers.lock();
    self.shutdown_workers(&mut workers);
  }

  fn spawn_worker(&self, worker_index: usize, generation: u64) -> std::io::Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(format!("{}-worker-{}", self.pool_name, worker_index));
    if let Some(stack_size) = self.stack_size {
      builder = builder.stack_size(stack_size);
    }

    let worker_pool_name = self.pool_name.clone();
    let worker_queue = self.queue.clone();
    let worker_active_tasks = self.active_tasks.clone();
    let worker_live_workers = self.live_workers.clone();

    // Counted before the thread exists so that a join always observes the decrement.
    self.live_workers.fetch_add(1, AtomicOrdering::SeqCst);
    let spawn_result = builder.spawn(move || {
      Self::run_worker_loop(worker_pool_name, worker_index, generation, worker_queue, worker_active_tasks);
      worker_live_workers.fetch_sub(1, AtomicOrdering::SeqCst);
    });
    if spawn_result.is_err() {
      self.live_workers.fetch_sub(1, AtomicOrdering::SeqCst);
    }
    spawn_result
  }

  fn shutdown_workers(&self, workers: &mut Vec<JoinHandle<()>>) {
    if !self.queue.close() {
      trace!(pool_name = %self.pool_name, "Stop: Pool already stopped.");
      return;
    }
    info!(
      pool_name = %self.pool_name,
      queued = self.queue.len(),
      "Stopping pool. Waiting for workers to drain the queue."
    );

    let current_thread = thread::current().id();
    for join_handle in workers.drain(..) {
      if join_handle.thread().id() == current_thread {
        // Stopped from inside one of our own tasks; this worker exits on its own once
        // the task returns and the queue is empty, or as soon as the pool is restarted.
        warn!(pool_name = %self.pool_name, "Stop called from a pool worker. Not joining the calling worker.");
        continue;
      }
      if join_handle.join().is_err() {
        error!(pool_name = %self.pool_name, "Worker thread panicked outside of task execution.");
      }
    }

    let leftovers = self.queue.drain();
    if !leftovers.is_empty() {
      warn!(
        pool_name = %self.pool_name,
        abandoned = leftovers.len(),
        "Tasks remained queued after all workers exited. Abandoning them."
      );
      for task in leftovers {
        task.abandon();
      }
    }

    info!(pool_name = %self.pool_name, "Pool stopped.");
  }

  fn run_worker_loop(
    pool_name: Arc<String>,
    worker_index: usize,
    generation: u64,
    queue: Arc<TaskQueue>,
    active_tasks: Arc<AtomicUsize>,
  ) {
    let _span = info_span!("pool_worker", pool_name = %*pool_name, worker_index, generation).entered();
    debug!("Worker loop started.");

    while let Some(task) = queue.pop(generation) {
      let task_id = task.task_id();
      trace!(%task_id, "Dequeued task. Executing.");
      active_tasks.fetch_add(1, AtomicOrdering::SeqCst);
      task.run();
      active_tasks.fetch_sub(1, AtomicOrdering::SeqCst);
      trace!(%task_id, "Task finished processing.");
    }

    debug!("Queue stopped and empty, or pool restarted. Worker loop terminating.");
  }
}

impl Drop for ThreadPoolManager {
  fn drop(&mut self) {
    if self.is_running() {
      info!(
        pool_name = %*self.pool_name,
        "ThreadPoolManager instance dropped. Initiating implicit stop."
      );
    }
    self.stop();
    tracing::trace!(pool_name = %*self.pool_name, "Drop: Pool stopped.");
  }
}
