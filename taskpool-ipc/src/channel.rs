//! Per-worker channel bundle
//!
//! Every worker context is wired to the coordinator through an explicit set
//! of channels rather than ambient event names: requests flow in, replies
//! flow out, readiness and exit are one-shot notifications, and a kill
//! signal travels on a watch channel. Hook attachment is therefore a
//! visible, auditable step when a pool slot is created or replaced.
//!
//! Host contract:
//! - signal `started` exactly once, after the context has launched;
//! - answer every request with exactly one reply;
//! - watch `kill` and exit promptly with [`ExitStatus::TERMINATED`] when it
//!   flips;
//! - report `exit` exactly once at end of life, after the reply sender has
//!   been dropped. Dropping the exit sender without reporting counts as an
//!   abnormal exit.

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::ChannelError;
use crate::protocol::{ExitStatus, WorkerReply, WorkerRequest};

/// Coordinator-side endpoints for one worker context.
#[derive(Debug)]
pub struct WorkerLink {
    pub requests: mpsc::Sender<WorkerRequest>,
    pub replies: mpsc::Receiver<WorkerReply>,
    pub started: oneshot::Receiver<()>,
    pub exit: oneshot::Receiver<ExitStatus>,
    pub kill: watch::Sender<bool>,
}

/// Worker-side endpoints, mirror of [`WorkerLink`].
#[derive(Debug)]
pub struct WorkerHost {
    pub requests: mpsc::Receiver<WorkerRequest>,
    pub replies: mpsc::Sender<WorkerReply>,
    pub started: Option<oneshot::Sender<()>>,
    pub exit: Option<oneshot::Sender<ExitStatus>>,
    pub kill: watch::Receiver<bool>,
}

impl WorkerHost {
    /// Signal the coordinator that the context has launched.
    pub fn confirm_started(&mut self) -> Result<(), ChannelError> {
        let sender = self.started.take().ok_or(ChannelError::AlreadySignalled)?;
        sender.send(()).map_err(|_| ChannelError::Closed)
    }

    /// Whether a forced termination has been requested.
    pub fn kill_requested(&self) -> bool {
        *self.kill.borrow()
    }

    /// End of life: drops the reply sender first so an in-flight `run`
    /// observes the closure, then reports the exit status.
    pub fn report_exit(self, status: ExitStatus) {
        let WorkerHost { replies, exit, .. } = self;
        drop(replies);
        if let Some(sender) = exit {
            let _ = sender.send(status);
        }
    }
}

/// Create the paired endpoints for one worker context.
///
/// `buffer` bounds the request channel; one slot is enough for the pool's
/// one-task-at-a-time dispatch, but hosts are free to ask for more.
pub fn worker_channel(buffer: usize) -> (WorkerLink, WorkerHost) {
    let (request_tx, request_rx) = mpsc::channel(buffer);
    let (reply_tx, reply_rx) = mpsc::channel(buffer);
    let (started_tx, started_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = oneshot::channel();
    let (kill_tx, kill_rx) = watch::channel(false);

    let link = WorkerLink {
        requests: request_tx,
        replies: reply_rx,
        started: started_rx,
        exit: exit_rx,
        kill: kill_tx,
    };

    let host = WorkerHost {
        requests: request_rx,
        replies: reply_tx,
        started: Some(started_tx),
        exit: Some(exit_tx),
        kill: kill_rx,
    };

    (link, host)
}
