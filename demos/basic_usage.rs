use std::thread;
use std::time::Duration;
use thread_orchestra::{TaskHandle, ThreadPoolManager};
use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let manager = ThreadPoolManager::new(2, "basic_pool").expect("Failed to start pool");

  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  for task_id in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (task_id as u64 % 3 * 100);
    match manager.submit(move || my_task_fn(task_id, sleep_duration)) {
      Ok(handle) => {
        info!("Submitted task {} with handle id {}", task_id, handle.id());
        handles.push(handle);
      }
      Err(e) => {
        tracing::error!("Failed to submit task {}: {:?}", task_id, e);
      }
    }
  }

  info!("All tasks submitted. Waiting for results...");

  for handle in handles {
    let task_id = handle.id();
    match handle.join() {
      Ok(result) => info!("Result for task {}: {}", task_id, result),
      Err(e) => info!("Error for task {}: {:?}", task_id, e),
    }
  }

  info!("All task results processed. Stopping pool.");
  manager.stop();

  match manager.submit(|| "never runs".to_string()) {
    Ok(_) => info!("Unexpectedly accepted a task on a stopped pool."),
    Err(e) => info!("Stopped pool rejected submission: {}", e),
  }

  info!("Restarting pool with 3 workers.");
  manager.start(3).expect("Failed to restart pool");
  let handle = manager
    .submit(|| "ran after restart".to_string())
    .expect("Restarted pool rejected a task");
  info!("Restarted pool returned: {:?}", handle.join());

  info!("--- Basic Usage Example End ---");
}
