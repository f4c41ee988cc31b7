//! Coordinator-to-worker contract for taskpool
//!
//! This crate defines the protocol spoken between the pool coordinator and
//! the isolated execution contexts behind it: the message types, the exit
//! status carried by a dying worker, and the channel bundle a worker
//! factory hands back to the pool. It contains no pool logic.

pub mod channel;
pub mod error;
pub mod protocol;

// Re-export commonly used types
pub use channel::{worker_channel, WorkerHost, WorkerLink};
pub use error::ChannelError;
pub use protocol::{ExitStatus, TaskFailure, TransferHints, WorkerReply, WorkerRequest};
