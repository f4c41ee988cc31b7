//! One-shot configurable submission handle
//!
//! Separates per-call tuning (deadline, transfer hints) from the pool's
//! plain `exec` path: configure the handle, then submit exactly once.

use serde_json::Value as JsonValue;

use crate::error::PoolError;
use crate::pool::Pool;
use crate::queue::TaskConfig;
use taskpool_ipc::TransferHints;

/// Builder over a single [`Pool::submit`] call.
///
/// Config is mutable until the first `exec` attempt and frozen afterwards;
/// a second `exec` never reaches the pool.
pub struct TaskExecutor {
    pool: Pool,
    config: TaskConfig,
    called: bool,
}

impl TaskExecutor {
    pub(crate) fn new(pool: Pool) -> Self {
        Self {
            pool,
            config: TaskConfig::default(),
            called: false,
        }
    }

    /// Set the task deadline in milliseconds; 0 means no limit.
    pub fn set_timeout(&mut self, timeout_ms: u64) -> Result<&mut Self, PoolError> {
        if self.called {
            return Err(PoolError::ExecutorConfigFrozen);
        }
        self.config.timeout_ms = timeout_ms;
        Ok(self)
    }

    /// Attach opaque transfer hints forwarded to the worker host.
    pub fn set_transfer(&mut self, hints: TransferHints) -> Result<&mut Self, PoolError> {
        if self.called {
            return Err(PoolError::ExecutorConfigFrozen);
        }
        self.config.transfer = Some(hints);
        Ok(self)
    }

    /// Submit the task. Exactly one submission per executor instance; the
    /// guard is set even when the pool refuses the submission.
    pub async fn exec(&mut self, payload: JsonValue) -> Result<JsonValue, PoolError> {
        if self.called {
            return Err(PoolError::ExecutorAlreadyCalled);
        }
        self.called = true;
        self.pool.submit(payload, self.config.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskpool_ipc::{worker_channel, ExitStatus, WorkerReply};

    fn echo_factory() -> impl crate::worker::WorkerFactory {
        || {
            let (link, mut host) = worker_channel(1);
            tokio::spawn(async move {
                host.confirm_started().ok();
                loop {
                    tokio::select! {
                        request = host.requests.recv() => {
                            let Some(request) = request else { break };
                            let reply = WorkerReply::Completed {
                                correlation_id: request.correlation_id,
                                output: request.payload,
                            };
                            if host.replies.send(reply).await.is_err() {
                                break;
                            }
                        }
                        changed = host.kill.changed() => {
                            if changed.is_err() || host.kill_requested() {
                                host.report_exit(ExitStatus::TERMINATED);
                                return;
                            }
                        }
                    }
                }
                host.report_exit(ExitStatus::CLEAN);
            });
            link
        }
    }

    #[tokio::test]
    async fn test_exec_is_single_use() {
        let pool = Pool::new(1).unwrap();
        pool.fill(echo_factory()).await.unwrap();

        let mut executor = pool.executor();
        assert_eq!(executor.exec(json!(1)).await.unwrap(), json!(1));

        let second = executor.exec(json!(2)).await;
        assert!(matches!(second, Err(PoolError::ExecutorAlreadyCalled)));
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_config_freezes_after_exec() {
        let pool = Pool::new(1).unwrap();
        pool.fill(echo_factory()).await.unwrap();

        let mut executor = pool.executor();
        executor
            .set_timeout(5_000)
            .unwrap()
            .set_transfer(TransferHints(json!(["buf-0"])))
            .unwrap();
        executor.exec(json!("payload")).await.unwrap();

        assert!(matches!(
            executor.set_timeout(1),
            Err(PoolError::ExecutorConfigFrozen)
        ));
        assert!(matches!(
            executor.set_transfer(TransferHints(json!([]))),
            Err(PoolError::ExecutorConfigFrozen)
        ));
        pool.destroy().await;
    }

    #[tokio::test]
    async fn test_failed_exec_still_consumes_the_executor() {
        let pool = Pool::new(1).unwrap();
        pool.fill(echo_factory()).await.unwrap();
        pool.destroy().await;

        let mut executor = pool.executor();
        assert!(matches!(
            executor.exec(json!(1)).await,
            Err(PoolError::Deprecated)
        ));
        assert!(matches!(
            executor.exec(json!(1)).await,
            Err(PoolError::ExecutorAlreadyCalled)
        ));
    }
}
