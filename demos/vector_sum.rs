//! Compares a sequential reduction against naive per-call threads and two pooled
//! chunking strategies.
//!
//! Usage: `cargo run --release --example vector_sum [element_count]`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use thread_orchestra::{PoolError, TaskHandle, ThreadPoolManager};
use tracing::info;

const DEFAULT_ELEMENTS: usize = 2_000_000;
const DYNAMIC_CHUNK_SIZE: usize = 64_000;

fn heavy_compute(mut x: f64) -> f64 {
  let mut result = 0.0;
  for _ in 0..200 {
    result += x.sin() * x.cos() + x.abs().sqrt();
    x += 0.001;
  }
  result
}

fn partial_sum(values: &[f64]) -> f64 {
  values.iter().copied().map(heavy_compute).sum()
}

fn sequential_sum(values: &[f64]) -> f64 {
  partial_sum(values)
}

fn naive_parallel_sum(values: &[f64], num_threads: usize) -> f64 {
  let chunk_size = values.len().div_ceil(num_threads).max(1);
  thread::scope(|scope| {
    let workers: Vec<_> = values
      .chunks(chunk_size)
      .map(|chunk| scope.spawn(move || partial_sum(chunk)))
      .collect();
    workers.into_iter().map(|w| w.join().unwrap_or(f64::NAN)).sum()
  })
}

/// Submits one `[start, end)` slice of `values` per chunk and sums the partial results.
fn pooled_sum(pool: &ThreadPoolManager, values: &Arc<Vec<f64>>, chunk_size: usize) -> Result<f64, PoolError> {
  let chunk_size = chunk_size.max(1);
  let handles = (0..values.len())
    .step_by(chunk_size)
    .map(|start| {
      let values = values.clone();
      pool.submit(move || {
        let end = (start + chunk_size).min(values.len());
        partial_sum(&values[start..end])
      })
    })
    .collect::<Result<Vec<TaskHandle<f64>>, PoolError>>()?;

  handles.into_iter().map(TaskHandle::join).sum()
}

fn timed<T>(label: &str, f: impl FnOnce() -> T) -> T {
  let started = Instant::now();
  let value = f();
  info!("{} in {:.2?}", label, started.elapsed());
  value
}

fn main() -> Result<(), PoolError> {
  tracing_subscriber::fmt().with_target(false).init();

  let element_count = std::env::args()
    .nth(1)
    .and_then(|arg| arg.parse().ok())
    .unwrap_or(DEFAULT_ELEMENTS);
  let num_threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

  let mut rng = StdRng::seed_from_u64(0x5eed);
  let values: Arc<Vec<f64>> = Arc::new((0..element_count).map(|_| rng.random_range(-2.0..2.0)).collect());
  info!("Summing {} elements using {} threads.", element_count, num_threads);

  let seq = timed("Sequential sum", || sequential_sum(&values));
  info!("Sequential sum: {}", seq);

  let naive = timed("Naive threads sum", || naive_parallel_sum(&values, num_threads));
  info!("Naive threads sum: {}", naive);

  {
    let pool = ThreadPoolManager::new(num_threads, "vector_sum_static")?;
    let per_worker_chunk = element_count.div_ceil(num_threads);
    let pooled = timed("Thread pool sum", || pooled_sum(&pool, &values, per_worker_chunk))?;
    info!("Thread pool sum: {}", pooled);
  }

  {
    let pool = ThreadPoolManager::new(num_threads, "vector_sum_dynamic")?;
    let pooled = timed("Thread pool dynamic sum", || pooled_sum(&pool, &values, DYNAMIC_CHUNK_SIZE))?;
    info!("Thread pool dynamic sum: {}", pooled);
  }

  Ok(())
}
