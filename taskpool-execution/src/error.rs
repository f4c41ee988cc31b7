//! Error taxonomy for the pool engine

use taskpool_ipc::TaskFailure;
use thiserror::Error;

/// Pool engine errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool constructed with an unusable worker count
    #[error("pool size must be at least 1, got {0}")]
    InvalidSize(usize),

    /// The pool has been destroyed; submissions are refused
    #[error("this pool is deprecated, create a new one")]
    Deprecated,

    /// The task's own execution failed inside the worker
    #[error("task failed: {0}")]
    TaskFailed(TaskFailure),

    /// The task's deadline elapsed before its outcome
    #[error("task timed out")]
    Timeout,

    /// The worker context died while a task was bound to it
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    /// A lifecycle operation was called out of contract
    #[error("invalid pool state: {0}")]
    InvalidState(String),

    /// `exec` was called a second time on the same executor
    #[error("task executor is already called")]
    ExecutorAlreadyCalled,

    /// Executor config mutation after the task was submitted
    #[error("task executor config is immutable after exec")]
    ExecutorConfigFrozen,
}

impl PoolError {
    /// Dedicated timeout check; never match on message text.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout)
    }

    /// The failure payload reported by the task itself, if any.
    pub fn task_failure(&self) -> Option<&TaskFailure> {
        match self {
            PoolError::TaskFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_predicate() {
        assert!(PoolError::Timeout.is_timeout());
        assert!(!PoolError::Deprecated.is_timeout());
        assert!(!PoolError::TaskFailed(TaskFailure::new("timeout")).is_timeout());
    }

    #[test]
    fn test_task_failure_accessor() {
        let error = PoolError::TaskFailed(TaskFailure::new("bad input"));
        assert_eq!(error.task_failure().unwrap().message, "bad input");
        assert!(PoolError::Timeout.task_failure().is_none());
    }
}
