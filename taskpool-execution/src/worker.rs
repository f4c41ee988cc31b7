//! Worker wrapper and lifecycle state tracking

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::PoolError;
use taskpool_ipc::{ExitStatus, TransferHints, WorkerLink, WorkerReply, WorkerRequest};

/// Lifecycle state of a pool worker.
///
/// Starting -> Ready on host confirmation; Ready <-> Busy around each
/// dispatched task; any state -> Terminated exactly once at end of life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Ready = 1,
    Busy = 2,
    Terminated = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Ready,
            2 => WorkerState::Busy,
            _ => WorkerState::Terminated,
        }
    }
}

/// Collaborator that launches one isolated execution context and returns
/// the coordinator-side channel bundle for it.
///
/// The pool treats the context opaquely; the factory decides whether it is
/// a thread, a process, or anything else honoring the host contract in
/// `taskpool-ipc`.
pub trait WorkerFactory: Send + Sync + 'static {
    fn spawn_worker(&self) -> WorkerLink;
}

impl<F> WorkerFactory for F
where
    F: Fn() -> WorkerLink + Send + Sync + 'static,
{
    fn spawn_worker(&self) -> WorkerLink {
        (self)()
    }
}

/// Point-in-time snapshot of one worker slot.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub worker_id: Uuid,
    pub state: WorkerState,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub restart_count: u32,
    pub uptime_seconds: i64,
}

/// The request/reply conversation with a host; one task at a time, guarded
/// by the pool's Ready/Busy alternation.
struct Conversation {
    requests: mpsc::Sender<WorkerRequest>,
    replies: mpsc::Receiver<WorkerReply>,
}

/// One isolated execution context, by composition: the wrapper owns the
/// channel endpoints of its host rather than subclassing anything.
pub struct PoolWorker {
    id: Uuid,
    state: AtomicU8,
    started_at: DateTime<Utc>,
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    conversation: Mutex<Conversation>,
    kill: watch::Sender<bool>,
    exit_code: watch::Sender<Option<i32>>,
    exit_seen: watch::Receiver<Option<i32>>,
}

impl PoolWorker {
    pub(crate) fn new(
        requests: mpsc::Sender<WorkerRequest>,
        replies: mpsc::Receiver<WorkerReply>,
        kill: watch::Sender<bool>,
    ) -> Self {
        let (exit_code, exit_seen) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            state: AtomicU8::new(WorkerState::Starting as u8),
            started_at: Utc::now(),
            tasks_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            conversation: Mutex::new(Conversation { requests, replies }),
            kill,
            exit_code,
            exit_seen,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.state() == WorkerState::Ready
    }

    /// Run one task to its reply.
    ///
    /// The dispatcher must have claimed this worker (Ready -> Busy) before
    /// calling; running an unclaimed worker is a contract violation. A
    /// `Failed` reply leaves the session usable; a closed channel means the
    /// context died with the task bound.
    pub async fn run(
        &self,
        payload: JsonValue,
        transfer: Option<TransferHints>,
    ) -> Result<JsonValue, PoolError> {
        if self.state() != WorkerState::Busy {
            return Err(PoolError::InvalidState(
                "run called on a worker that was not claimed for dispatch".into(),
            ));
        }

        let correlation_id = Uuid::new_v4();
        let mut conversation = self.conversation.lock().await;

        conversation
            .requests
            .send(WorkerRequest {
                correlation_id,
                payload,
                transfer,
            })
            .await
            .map_err(|_| {
                PoolError::WorkerCrashed("worker channel closed before dispatch".into())
            })?;

        loop {
            match conversation.replies.recv().await {
                Some(WorkerReply::Completed {
                    correlation_id: reply_id,
                    output,
                }) if reply_id == correlation_id => {
                    self.tasks_executed.fetch_add(1, Ordering::Relaxed);
                    return Ok(output);
                }
                Some(WorkerReply::Failed {
                    correlation_id: reply_id,
                    error,
                }) if reply_id == correlation_id => {
                    self.tasks_executed.fetch_add(1, Ordering::Relaxed);
                    self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    return Err(PoolError::TaskFailed(error));
                }
                Some(stale) => {
                    // a reply for an abandoned conversation; nothing awaits it
                    debug!(worker_id = %self.id, ?stale, "discarding stale reply");
                }
                None => {
                    return Err(PoolError::WorkerCrashed(
                        "worker exited while a task was in flight".into(),
                    ));
                }
            }
        }
    }

    /// Force immediate shutdown of the host context.
    ///
    /// Safe in any state and idempotent: once the exit has been observed
    /// the recorded code is returned without touching the host again.
    pub async fn terminate(&self) -> i32 {
        let mut seen = self.exit_seen.clone();
        if let Some(code) = *seen.borrow_and_update() {
            return code;
        }

        debug!(worker_id = %self.id, "terminating worker");
        self.kill.send_replace(true);

        loop {
            if let Some(code) = *seen.borrow_and_update() {
                return code;
            }
            if seen.changed().await.is_err() {
                // sender lives in self; unreachable while self is alive
                return ExitStatus::TERMINATED.code;
            }
        }
    }

    /// Record the observed exit. Called exactly once, by the pool's exit
    /// monitor; releases any `terminate` waiters.
    pub(crate) fn record_exit(&self, status: ExitStatus) {
        self.set_state(WorkerState::Terminated);
        self.exit_code.send_replace(Some(status.code));
    }

    pub(crate) fn stats(&self, restart_count: u32) -> WorkerStats {
        WorkerStats {
            worker_id: self.id,
            state: self.state(),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            restart_count,
            uptime_seconds: Utc::now()
                .signed_duration_since(self.started_at)
                .num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use taskpool_ipc::{worker_channel, TaskFailure, WorkerHost};

    fn wrap(link: WorkerLink) -> (Arc<PoolWorker>, tokio::sync::oneshot::Receiver<ExitStatus>) {
        let WorkerLink {
            requests,
            replies,
            exit,
            kill,
            ..
        } = link;
        (Arc::new(PoolWorker::new(requests, replies, kill)), exit)
    }

    fn echo_host(mut host: WorkerHost) {
        tokio::spawn(async move {
            host.confirm_started().ok();
            while let Some(request) = host.requests.recv().await {
                let reply = match request.payload {
                    JsonValue::Null => WorkerReply::Failed {
                        correlation_id: request.correlation_id,
                        error: TaskFailure::new("null payload"),
                    },
                    payload => WorkerReply::Completed {
                        correlation_id: request.correlation_id,
                        output: payload,
                    },
                };
                if host.replies.send(reply).await.is_err() {
                    break;
                }
            }
            host.report_exit(ExitStatus::CLEAN);
        });
    }

    #[tokio::test]
    async fn test_run_completes_a_task() {
        let (link, host) = worker_channel(1);
        echo_host(host);
        let (worker, _exit) = wrap(link);

        worker.set_state(WorkerState::Busy);
        let output = worker.run(json!({"n": 3}), None).await.unwrap();
        assert_eq!(output, json!({"n": 3}));

        let stats = worker.stats(0);
        assert_eq!(stats.tasks_executed, 1);
        assert_eq!(stats.tasks_failed, 0);
    }

    #[tokio::test]
    async fn test_run_requires_a_claimed_worker() {
        let (link, host) = worker_channel(1);
        echo_host(host);
        let (worker, _exit) = wrap(link);

        // never claimed: still Starting
        let error = worker.run(json!(1), None).await.unwrap_err();
        assert!(matches!(error, PoolError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_failed_reply_keeps_worker_usable() {
        let (link, host) = worker_channel(1);
        echo_host(host);
        let (worker, _exit) = wrap(link);

        worker.set_state(WorkerState::Busy);
        let error = worker.run(JsonValue::Null, None).await.unwrap_err();
        assert_eq!(error.task_failure().unwrap().message, "null payload");

        // the session still answers
        worker.set_state(WorkerState::Busy);
        let output = worker.run(json!(5), None).await.unwrap();
        assert_eq!(output, json!(5));
        assert_eq!(worker.stats(0).tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_crash_mid_task_fails_the_run() {
        let (link, mut host) = worker_channel(1);
        let (worker, _exit) = wrap(link);

        tokio::spawn(async move {
            host.confirm_started().ok();
            // die without replying
            let _ = host.requests.recv().await;
            host.report_exit(ExitStatus::abnormal(101));
        });

        worker.set_state(WorkerState::Busy);
        let error = worker.run(json!(1), None).await.unwrap_err();
        assert!(matches!(error, PoolError::WorkerCrashed(_)));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (link, mut host) = worker_channel(1);
        let (worker, exit) = wrap(link);

        tokio::spawn(async move {
            host.confirm_started().ok();
            host.kill.changed().await.ok();
            host.report_exit(ExitStatus::TERMINATED);
        });

        // stand in for the pool's exit monitor
        let monitored = Arc::clone(&worker);
        tokio::spawn(async move {
            let status = exit.await.unwrap_or(ExitStatus::TERMINATED);
            monitored.record_exit(status);
        });

        assert_eq!(worker.terminate().await, 1);
        assert_eq!(worker.terminate().await, 1);
        assert_eq!(worker.state(), WorkerState::Terminated);
    }
}
