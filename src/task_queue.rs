use crate::task::Runnable;

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
  /// No workers are running and submissions are rejected.
  Stopped,
  /// Workers are running and submissions are accepted.
  Running,
}

/// Everything guarded by the queue mutex. The lifecycle state lives next to the
/// pending tasks so that "is the pool accepting work" and "enqueue" are a single
/// critical section.
struct QueueInner {
  state: PoolState,
  // Bumped on every `Stopped -> Running` transition. Workers only serve the generation
  // they were spawned for.
  generation: u64,
  tasks: VecDeque<Box<dyn Runnable>>,
}

/// An unbounded, multi-producer, multi-consumer FIFO of pending tasks.
///
/// Workers block on the condition variable until the queue is non-empty or the
/// pool has been stopped. A stopped queue still hands out the tasks it already
/// holds, which is what lets `stop()` drain.
pub(crate) struct TaskQueue {
  inner: Mutex<QueueInner>,
  available: Condvar,
}

impl fmt::Debug for TaskQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("TaskQueue")
      .field("state", &inner.state)
      .field("generation", &inner.generation)
      .field("len", &inner.tasks.len())
      .finish()
  }
}

impl TaskQueue {
  /// Creates an empty queue in the `Stopped` state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(QueueInner {
        state: PoolState::Stopped,
        generation: 0,
        tasks: VecDeque::new(),
      }),
      available: Condvar::new(),
    }
  }

  /// Enqueues a task if the queue is `Running`.
  ///
  /// On rejection the task is handed back untouched so the caller can decide
  /// what to do with it.
  pub(crate) fn push(&self, task: Box<dyn Runnable>) -> Result<(), Box<dyn Runnable>> {
    {
      let mut inner = self.inner.lock();
      if inner.state == PoolState::Stopped {
        return Err(task);
      }
      inner.tasks.push_back(task);
    }
    self.available.notify_one();
    Ok(())
  }

  /// Blocks until a task is available and removes it, or returns `None` once the
  /// queue is stopped and empty, or has been reopened for a newer `generation`.
  pub(crate) fn pop(&self, generation: u64) -> Option<Box<dyn Runnable>> {
    let mut inner = self.inner.lock();
    loop {
      if inner.generation != generation {
        return None;
      }
      if let Some(task) = inner.tasks.pop_front() {
        return Some(task);
      }
      if inner.state == PoolState::Stopped {
        return None;
      }
      self.available.wait(&mut inner);
    }
  }

  /// Transitions `Stopped -> Running` and returns the new generation, or `None` if
  /// already running.
  pub(crate) fn open(&self) -> Option<u64> {
    let generation = {
      let mut inner = self.inner.lock();
      if inner.state == PoolState::Running {
        return None;
      }
      inner.state = PoolState::Running;
      inner.generation += 1;
      inner.generation
    };
    // Workers of an older generation still blocked here must wake up and exit.
    self.available.notify_all();
    Some(generation)
  }

  /// Transitions `Running -> Stopped` and wakes every waiting worker.
  /// Returns `false` if already stopped.
  pub(crate) fn close(&self) -> bool {
    {
      let mut inner = self.inner.lock();
      if inner.state == PoolState::Stopped {
        return false;
      }
      inner.state = PoolState::Stopped;
    }
    self.available.notify_all();
    true
  }

  /// Removes every pending task without running it.
  pub(crate) fn drain(&self) -> Vec<Box<dyn Runnable>> {
    self.inner.lock().tasks.drain(..).collect()
  }

  pub(crate) fn state(&self) -> PoolState {
    self.inner.lock().state
  }

  /// Returns the number of tasks waiting to be dispatched.
  pub(crate) fn len(&self) -> usize {
    self.inner.lock().tasks.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::PoolError;
  use crate::task::{ManagedTaskInternal, TaskOutcome};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;
  use tokio::sync::oneshot;

  // Helper to create a queued task that returns `value`.
  fn dummy_task(value: u64) -> (Box<dyn Runnable>, oneshot::Receiver<TaskOutcome<u64>>) {
    let (task, rx) = ManagedTaskInternal::new(Box::new(move || value));
    (Box::new(task), rx)
  }

  #[test]
  fn test_new_queue_is_stopped_and_rejects() {
    let queue = TaskQueue::new();
    assert_eq!(queue.state(), PoolState::Stopped);

    let (task, _rx) = dummy_task(1);
    assert!(queue.push(task).is_err());
    assert_eq!(queue.len(), 0);
  }

  #[test]
  fn test_fifo_dispatch_order() {
    let queue = TaskQueue::new();
    let generation = queue.open().expect("new queue should open");

    let mut receivers = Vec::new();
    let mut ids = Vec::new();
    for value in 0..5 {
      let (task, rx) = dummy_task(value);
      ids.push(task.task_id());
      queue.push(task).unwrap_or_else(|_| panic!("push rejected on running queue"));
      receivers.push(rx);
    }
    assert_eq!(queue.len(), 5);

    for expected_id in ids {
      let task = queue.pop(generation).expect("queue should hold a task");
      assert_eq!(task.task_id(), expected_id);
      task.run();
    }
    for (value, rx) in receivers.into_iter().enumerate() {
      assert_eq!(rx.blocking_recv().unwrap(), Ok(value as u64));
    }
  }

  #[test]
  fn test_open_and_close_are_idempotent() {
    let queue = TaskQueue::new();
    assert_eq!(queue.open(), Some(1));
    assert_eq!(queue.open(), None);
    assert_eq!(queue.state(), PoolState::Running);
    assert!(queue.close());
    assert!(!queue.close());
    assert_eq!(queue.state(), PoolState::Stopped);
  }

  #[test]
  fn test_closed_queue_still_hands_out_pending_tasks() {
    let queue = TaskQueue::new();
    let generation = queue.open().expect("new queue should open");
    let (task, _rx) = dummy_task(1);
    queue.push(task).unwrap_or_else(|_| panic!("push rejected on running queue"));
    queue.close();

    assert!(queue.pop(generation).is_some());
    assert!(queue.pop(generation).is_none());
  }

  #[test]
  fn test_close_wakes_blocked_consumer() {
    let queue = Arc::new(TaskQueue::new());
    let generation = queue.open().expect("new queue should open");

    let consumer = {
      let queue = queue.clone();
      thread::spawn(move || queue.pop(generation).is_none())
    };

    thread::sleep(Duration::from_millis(50));
    queue.close();
    assert!(consumer.join().unwrap(), "Blocked consumer should observe the stop signal.");
  }

  #[test]
  fn test_push_wakes_blocked_consumer() {
    let queue = Arc::new(TaskQueue::new());
    let generation = queue.open().expect("new queue should open");

    let consumer = {
      let queue = queue.clone();
      thread::spawn(move || {
        if let Some(task) = queue.pop(generation) {
          task.run();
        }
      })
    };

    thread::sleep(Duration::from_millis(50));
    let (task, rx) = dummy_task(9);
    queue.push(task).unwrap_or_else(|_| panic!("push rejected on running queue"));
    consumer.join().unwrap();
    assert_eq!(rx.blocking_recv().unwrap(), Ok(9));
  }

  #[test]
  fn test_reopen_retires_older_generation() {
    let queue = TaskQueue::new();
    let old_generation = queue.open().expect("new queue should open");
    queue.close();
    let new_generation = queue.open().expect("stopped queue should reopen");
    assert_ne!(old_generation, new_generation);

    let (task, _rx) = dummy_task(1);
    queue.push(task).unwrap_or_else(|_| panic!("push rejected on running queue"));

    // A worker of the previous generation must not take work from the new one.
    assert!(queue.pop(old_generation).is_none());
    assert_eq!(queue.len(), 1);
    assert!(queue.pop(new_generation).is_some());
  }

  #[test]
  fn test_reopen_wakes_blocked_older_generation() {
    let queue = Arc::new(TaskQueue::new());
    let old_generation = queue.open().expect("new queue should open");
    queue.close();
    queue.open().expect("stopped queue should reopen");

    let stale_consumer = {
      let queue = queue.clone();
      thread::spawn(move || queue.pop(old_generation).is_none())
    };
    assert!(stale_consumer.join().unwrap());
  }

  #[test]
  fn test_drain_abandons_pending_tasks() {
    let queue = TaskQueue::new();
    queue.open();
    let (first, rx_first) = dummy_task(1);
    let (second, rx_second) = dummy_task(2);
    queue.push(first).unwrap_or_else(|_| panic!("push rejected on running queue"));
    queue.push(second).unwrap_or_else(|_| panic!("push rejected on running queue"));
    queue.close();

    let leftovers = queue.drain();
    assert_eq!(leftovers.len(), 2);
    assert_eq!(queue.len(), 0);
    for task in leftovers {
      task.abandon();
    }
    assert_eq!(rx_first.blocking_recv().unwrap(), Err(PoolError::TaskAbandoned));
    assert_eq!(rx_second.blocking_recv().unwrap(), Err(PoolError::TaskAbandoned));
  }

  #[test]
  fn test_concurrent_producers_and_consumers() {
    let queue = Arc::new(TaskQueue::new());
    let generation = queue.open().expect("new queue should open");
    let popped = Arc::new(AtomicUsize::new(0));
    let num_producers = 4;
    let per_producer = 250;

    let consumers: Vec<_> = (0..3)
      .map(|_| {
        let queue = queue.clone();
        let popped = popped.clone();
        thread::spawn(move || {
          while let Some(task) = queue.pop(generation) {
            task.run();
            popped.fetch_add(1, Ordering::SeqCst);
          }
        })
      })
      .collect();

    let producers: Vec<_> = (0..num_producers)
      .map(|_| {
        let queue = queue.clone();
        thread::spawn(move || {
          let mut receivers = Vec::new();
          for value in 0..per_producer {
            let (task, rx) = dummy_task(value);
            queue.push(task).unwrap_or_else(|_| panic!("push rejected on running queue"));
            receivers.push(rx);
          }
          receivers
        })
      })
      .collect();

    let receivers: Vec<_> = producers.into_iter().flat_map(|p| p.join().unwrap()).collect();
    for rx in receivers {
      assert!(rx.blocking_recv().unwrap().is_ok());
    }
    queue.close();
    for consumer in consumers {
      consumer.join().unwrap();
    }

    assert_eq!(popped.load(Ordering::SeqCst), num_producers * per_producer as usize);
  }
}
