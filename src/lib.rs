//! A fixed-size OS thread pool with FIFO dispatch, one-shot task handles,
//! panic isolation, and a restartable start/stop lifecycle.
//!
//! ```
//! use thread_orchestra::ThreadPoolManager;
//!
//! let pool = ThreadPoolManager::new(4, "doc_pool").unwrap();
//! let mut handle = pool.submit(|| 6 * 7).unwrap();
//! assert_eq!(handle.wait(), Ok(&42));
//! pool.stop();
//! assert!(pool.submit(|| 0).is_err());
//! ```

mod error;
mod handle;
mod manager;
mod task;
mod task_queue;

pub use error::PoolError;
pub use handle::TaskHandle;
pub use manager::{PoolConfig, ThreadPoolManager};
pub use task::TaskToExecute;
pub use task_queue::PoolState;
