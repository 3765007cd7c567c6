//! Task executor for tierstore.
//!
//! A fixed number of OS threads drain a single priority queue. Archival jobs
//! are CPU-heavy (compression) and blocking (file I/O), so they run here
//! rather than on the async runtime that serves requests.
//!
//! ```
//! use tierstore_executor::{Executor, Priority};
//!
//! let executor = Executor::new(2).unwrap();
//! let handle = executor.submit(Priority::Normal, || 6 * 7);
//! assert_eq!(handle.wait().unwrap(), 42);
//! executor.shutdown();
//! ```

pub mod error;
mod handle;
mod pool;
mod priority;

pub use crate::handle::JobHandle;
pub use crate::pool::Executor;
pub use crate::priority::Priority;
