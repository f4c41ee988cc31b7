//! FIFO buffer of tasks awaiting an idle worker

use std::collections::VecDeque;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::error::PoolError;
use taskpool_ipc::TransferHints;

/// Per-task settings supplied at submission time.
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    /// Deadline in milliseconds; 0 means no limit.
    pub timeout_ms: u64,
    /// Opaque transfer metadata forwarded to the worker host.
    pub transfer: Option<TransferHints>,
}

impl TaskConfig {
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            transfer: None,
        }
    }
}

/// A submitted task waiting for (or bound to) a worker.
///
/// The completion sender is single-assignment by construction; whichever of
/// {worker reply, timeout, crash, pool destruction} settles first wins it.
pub(crate) struct PendingTask {
    pub payload: JsonValue,
    pub config: TaskConfig,
    pub completion: oneshot::Sender<Result<JsonValue, PoolError>>,
}

impl PendingTask {
    pub fn reject(self, error: PoolError) {
        let _ = self.completion.send(Err(error));
    }
}

/// Insertion order is completion-priority order: the head is always the
/// next task dispatched when any worker becomes idle.
#[derive(Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<PendingTask>,
}

impl TaskQueue {
    pub fn push(&mut self, task: PendingTask) {
        self.tasks.push_back(task);
    }

    pub fn pop(&mut self) -> Option<PendingTask> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Empties the queue; used at pool destruction to reject everything
    /// that was never dispatched.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingTask> + '_ {
        self.tasks.drain(..)
    }
}
