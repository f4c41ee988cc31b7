//! Taskpool execution engine
//!
//! A fixed-capacity pool of isolated execution contexts. Callers submit
//! opaque task payloads; the pool dispatches each to an idle worker in
//! FIFO order, races it against an optional deadline, and hands the result
//! or error back asynchronously. Workers that crash or time out are
//! replaced in their slot without caller intervention.
//!
//! The worker contexts themselves live behind the [`WorkerFactory`]
//! boundary: a factory launches whatever host it likes (thread, process,
//! task) and returns the channel bundle defined in `taskpool-ipc`.

pub mod error;
pub mod executor;
pub mod pool;
pub mod queue;
pub mod timing;
pub mod worker;

// Re-export main types
pub use error::PoolError;
pub use executor::TaskExecutor;
pub use pool::Pool;
pub use queue::TaskConfig;
pub use timing::race_with_timeout;
pub use worker::{PoolWorker, WorkerFactory, WorkerState, WorkerStats};

// Re-export the protocol crate for factory implementors
pub use taskpool_ipc as ipc;
