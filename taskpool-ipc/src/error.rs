//! Channel-layer error types

use thiserror::Error;

/// Errors raised by the host-side channel helpers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The other end of the channel is gone
    #[error("channel closed")]
    Closed,

    /// A one-shot signal was fired a second time
    #[error("signal already sent")]
    AlreadySignalled,
}
