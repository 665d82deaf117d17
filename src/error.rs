use thiserror::Error;

/// Errors that can occur within the `thread_orchestra` pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool is stopped, cannot accept new tasks")]
  PoolStopped,

  #[error("Submitted task panicked: {0}")]
  TaskPanicked(String),

  #[error("Task was accepted but abandoned before it could run")]
  TaskAbandoned,

  #[error("Failed to spawn pool worker thread: {0}")]
  WorkerSpawnFailed(String),
}
