use std::thread;
use std::time::Duration;
use thread_orchestra::{PoolError, ThreadPoolManager};
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let manager = ThreadPoolManager::new(1, "panic_pool").expect("Failed to start pool");

  let mut handle = manager
    .submit(|| -> String {
      info!("Panicking Task: Starting...");
      thread::sleep(Duration::from_millis(100));
      info!("Panicking Task: About to panic!");
      panic!("This task is designed to panic!");
    })
    .expect("Failed to submit panicking task");

  let task_id = handle.id();
  info!("Panicking task {} submitted. Waiting for result...", task_id);

  match handle.wait() {
    Ok(result) => info!("Task {} completed with UNEXPECTED result: {}", task_id, result),
    Err(PoolError::TaskPanicked(message)) => {
      info!("Task {} correctly resulted in TaskPanicked: {}", task_id, message);
    }
    Err(e) => info!("Task {} resulted in unexpected error: {:?}", task_id, e),
  }
  // The outcome is cached, so waiting again reports the same failure.
  info!("Second wait on task {}: {:?}", task_id, handle.wait());

  let follow_up = manager
    .submit(|| "the pool survived".to_string())
    .expect("Failed to submit follow-up task");
  info!("Follow-up task result: {:?}", follow_up.join());

  manager.stop();
  info!("--- Task Panic Example End ---");
}
