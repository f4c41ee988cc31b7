//! Fixed-capacity worker pool coordinator
//!
//! All queue and slot mutations are funneled through one mutex-guarded
//! state, never held across worker I/O, so dispatch decisions are
//! serialized: no two dispatches can observe the same idle worker, and the
//! submit path and the worker-ready path share a single pop-and-claim
//! step. Worker completions, readiness and exits arrive as messages and
//! wake a single dispatch pump.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PoolError;
use crate::executor::TaskExecutor;
use crate::queue::{PendingTask, TaskConfig, TaskQueue};
use crate::timing::race_with_timeout;
use crate::worker::{PoolWorker, WorkerFactory, WorkerState, WorkerStats};
use taskpool_ipc::{ExitStatus, WorkerLink};

/// A fixed position in the pool; holds exactly one live worker at a time.
struct WorkerSlot {
    worker: Arc<PoolWorker>,
    restart_count: u32,
}

struct PoolState {
    workers: Vec<WorkerSlot>,
    queue: TaskQueue,
    deprecated: bool,
    factory: Option<Arc<dyn WorkerFactory>>,
    // handed to the dispatch pump on fill
    wake_rx: Option<mpsc::UnboundedReceiver<()>>,
}

impl PoolState {
    fn idle_worker(&self) -> Option<Arc<PoolWorker>> {
        self.workers
            .iter()
            .find(|slot| slot.worker.is_ready())
            .map(|slot| Arc::clone(&slot.worker))
    }
}

struct PoolShared {
    size: usize,
    state: Mutex<PoolState>,
    ready_events: broadcast::Sender<Uuid>,
    wake: mpsc::UnboundedSender<()>,
}

/// Fixed-capacity pool of isolated workers.
///
/// Cheap to clone; all clones share the same worker set and queue.
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Pool {
    /// Create a pool with a fixed worker count. Fails synchronously on a
    /// zero size; the count is immutable afterwards.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size < 1 {
            return Err(PoolError::InvalidSize(size));
        }

        let (ready_events, _) = broadcast::channel(64);
        let (wake, wake_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(PoolShared {
            size,
            state: Mutex::new(PoolState {
                workers: Vec::with_capacity(size),
                queue: TaskQueue::default(),
                deprecated: false,
                factory: None,
                wake_rx: Some(wake_rx),
            }),
            ready_events,
            wake,
        });

        Ok(Self { shared })
    }

    /// Pool sized to the machine's logical CPU count.
    pub fn with_defaults() -> Result<Self, PoolError> {
        Self::new(num_cpus::get())
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Populate every slot through the worker factory. May be called at
    /// most once per pool; slots are filled before this returns, readiness
    /// arrives asynchronously per worker.
    pub async fn fill<F: WorkerFactory>(&self, factory: F) -> Result<(), PoolError> {
        let factory: Arc<dyn WorkerFactory> = Arc::new(factory);

        let mut guard = self.shared.state.lock().await;
        if guard.deprecated {
            return Err(PoolError::Deprecated);
        }
        if guard.factory.is_some() {
            return Err(PoolError::InvalidState(
                "fill may only be called once per pool".into(),
            ));
        }
        guard.factory = Some(Arc::clone(&factory));

        // dispatch pump: every queue push and every Ready transition sends
        // one pulse; each pulse dispatches at most one task
        if let Some(mut wake_rx) = guard.wake_rx.take() {
            let pump = Arc::downgrade(&self.shared);
            tokio::spawn(async move {
                while wake_rx.recv().await.is_some() {
                    let Some(shared) = pump.upgrade() else { break };
                    dispatch_next(&shared).await;
                }
            });
        }

        for _ in 0..self.shared.size {
            let worker = install_worker(&self.shared, factory.spawn_worker());
            guard.workers.push(WorkerSlot {
                worker,
                restart_count: 0,
            });
        }

        info!(size = self.shared.size, "pool filled");
        Ok(())
    }

    /// Submit a task and await its outcome.
    ///
    /// The returned future resolves with the task's own result or failure,
    /// a timeout, or a crash/deprecation error; it never blocks a thread.
    pub async fn submit(
        &self,
        payload: JsonValue,
        config: TaskConfig,
    ) -> Result<JsonValue, PoolError> {
        let receiver = {
            let mut guard = self.shared.state.lock().await;
            if guard.deprecated {
                return Err(PoolError::Deprecated);
            }
            let (completion, receiver) = oneshot::channel();
            guard.queue.push(PendingTask {
                payload,
                config,
                completion,
            });
            receiver
        };

        let _ = self.shared.wake.send(());

        match receiver.await {
            Ok(outcome) => outcome,
            // the dispatch task can only vanish without answering if the
            // runtime tore it down
            Err(_) => Err(PoolError::WorkerCrashed(
                "task was dropped without a result".into(),
            )),
        }
    }

    /// Convenience one-shot submission with default config.
    pub async fn exec(&self, payload: JsonValue) -> Result<JsonValue, PoolError> {
        self.submit(payload, TaskConfig::default()).await
    }

    /// A one-shot, configurable submission handle over this pool.
    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor::new(self.clone())
    }

    /// Destroy the pool: refuse all further submissions, reject everything
    /// still queued, and terminate every worker, awaiting all exits.
    /// Idempotent. Tasks already dispatched keep racing toward their own
    /// outcome.
    pub async fn destroy(&self) {
        let workers = {
            let mut guard = self.shared.state.lock().await;
            if guard.deprecated {
                return;
            }
            guard.deprecated = true;
            for task in guard.queue.drain() {
                task.reject(PoolError::Deprecated);
            }
            std::mem::take(&mut guard.workers)
        };

        info!(count = workers.len(), "destroying pool");
        join_all(workers.iter().map(|slot| slot.worker.terminate())).await;
    }

    pub async fn is_deprecated(&self) -> bool {
        self.shared.state.lock().await.deprecated
    }

    /// Live worker count; equals `size()` except mid-destruction.
    pub async fn worker_count(&self) -> usize {
        self.shared.state.lock().await.workers.len()
    }

    /// Tasks waiting for an idle worker.
    pub async fn queued_tasks(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    /// Snapshot of every slot, for diagnostics.
    pub async fn worker_stats(&self) -> Vec<WorkerStats> {
        let guard = self.shared.state.lock().await;
        guard
            .workers
            .iter()
            .map(|slot| slot.worker.stats(slot.restart_count))
            .collect()
    }

    /// Subscribe to the `worker-ready` lifecycle signal: one event per
    /// worker becoming idle, including initial and post-replacement
    /// readiness. The only externally documented lifecycle signal.
    pub fn subscribe_ready(&self) -> broadcast::Receiver<Uuid> {
        self.shared.ready_events.subscribe()
    }
}

/// Wrap a factory-produced channel bundle and wire its lifecycle hooks:
/// a readiness watcher and an exit monitor. The hooks hold weak references
/// so a retired worker's hooks are inert and a dropped pool tears down.
fn install_worker(shared: &Arc<PoolShared>, link: WorkerLink) -> Arc<PoolWorker> {
    let WorkerLink {
        requests,
        replies,
        started,
        exit,
        kill,
    } = link;

    let worker = Arc::new(PoolWorker::new(requests, replies, kill));
    debug!(worker_id = %worker.id(), "worker installed");

    {
        let shared = Arc::downgrade(shared);
        let worker = Arc::downgrade(&worker);
        tokio::spawn(async move {
            if started.await.is_err() {
                // host never launched; the exit monitor owns teardown
                return;
            }
            let (Some(shared), Some(worker)) = (shared.upgrade(), worker.upgrade()) else {
                return;
            };
            mark_worker_ready(&shared, &worker).await;
        });
    }

    {
        let shared = Arc::downgrade(shared);
        let weak_worker = Arc::downgrade(&worker);
        tokio::spawn(async move {
            // a host that drops the exit sender without reporting is
            // treated as an abnormal death
            let status = exit.await.unwrap_or(ExitStatus::TERMINATED);
            let Some(worker) = weak_worker.upgrade() else { return };
            match shared.upgrade() {
                Some(shared) => on_worker_exit(&shared, &worker, status).await,
                // pool already gone; still release terminate() waiters
                None => worker.record_exit(status),
            }
        });
    }

    worker
}

/// Ready transition shared by initial readiness and post-task requeue:
/// flip to Ready under the pool lock, announce, and pulse the pump.
async fn mark_worker_ready(shared: &Arc<PoolShared>, worker: &Arc<PoolWorker>) {
    {
        let guard = shared.state.lock().await;
        if guard.deprecated || worker.state() == WorkerState::Terminated {
            return;
        }
        worker.set_state(WorkerState::Ready);
    }
    let _ = shared.ready_events.send(worker.id());
    let _ = shared.wake.send(());
}

/// The single pop-and-claim step. Claiming (Ready -> Busy) and popping
/// happen in one critical section, so a task can neither be dispatched
/// twice nor lost between the submit path and the worker-ready path.
async fn dispatch_next(shared: &Arc<PoolShared>) {
    let (worker, task) = {
        let mut guard = shared.state.lock().await;
        if guard.deprecated {
            return;
        }
        let Some(worker) = guard.idle_worker() else {
            return;
        };
        let Some(task) = guard.queue.pop() else {
            return;
        };
        worker.set_state(WorkerState::Busy);
        (worker, task)
    };

    tokio::spawn(run_task(Arc::clone(shared), worker, task));
}

/// Drive one claimed task to completion on one claimed worker.
async fn run_task(shared: Arc<PoolShared>, worker: Arc<PoolWorker>, task: PendingTask) {
    let PendingTask {
        payload,
        config,
        completion,
    } = task;
    let TaskConfig {
        timeout_ms,
        transfer,
    } = config;

    debug!(worker_id = %worker.id(), timeout_ms, "dispatching task");

    match race_with_timeout(worker.run(payload, transfer), timeout_ms).await {
        Ok(output) => {
            let _ = completion.send(Ok(output));
            mark_worker_ready(&shared, &worker).await;
        }
        Err(PoolError::Timeout) => {
            warn!(worker_id = %worker.id(), timeout_ms, "task timed out, terminating its worker");
            let _ = completion.send(Err(PoolError::Timeout));
            // the context has no cooperative interrupt; replacement flows
            // through the abnormal-exit path
            worker.terminate().await;
        }
        Err(error @ PoolError::TaskFailed(_)) => {
            // the task failed on its own; the worker session stays usable
            let _ = completion.send(Err(error));
            mark_worker_ready(&shared, &worker).await;
        }
        Err(error) => {
            // the context died with this task bound; the exit monitor
            // handles replacement
            let _ = completion.send(Err(error));
        }
    }
}

/// Exit monitor body: record the exit, then replace the slot when the
/// death was abnormal and the pool is still live. Slot 0 is replaceable
/// like any other. A stale monitor whose worker no longer owns a slot does
/// nothing.
async fn on_worker_exit(shared: &Arc<PoolShared>, worker: &Arc<PoolWorker>, status: ExitStatus) {
    let mut guard = shared.state.lock().await;
    worker.record_exit(status);

    if guard.deprecated || status.is_clean() {
        return;
    }
    let Some(index) = guard
        .workers
        .iter()
        .position(|slot| slot.worker.id() == worker.id())
    else {
        return;
    };
    let Some(factory) = guard.factory.clone() else {
        return;
    };

    warn!(
        worker_id = %worker.id(),
        slot = index,
        code = status.code,
        "worker exited abnormally, replacing slot"
    );

    let fresh = install_worker(shared, factory.spawn_worker());
    let slot = &mut guard.workers[index];
    slot.worker = fresh;
    slot.restart_count += 1;
}
