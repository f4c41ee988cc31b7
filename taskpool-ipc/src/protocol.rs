//! Protocol message types exchanged with worker contexts

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// Opaque transfer metadata forwarded alongside a payload.
///
/// The coordinator never inspects this; it exists so a host implementation
/// can receive zero-copy or routing hints from the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferHints(pub JsonValue);

/// A single task handed to a worker context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub correlation_id: Uuid,
    /// Opaque task payload. Produced upstream, never interpreted here.
    pub payload: JsonValue,
    pub transfer: Option<TransferHints>,
}

/// A worker's answer to exactly one [`WorkerRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// The task ran to completion.
    Completed {
        correlation_id: Uuid,
        output: JsonValue,
    },

    /// The task itself failed; the worker session is still usable.
    Failed {
        correlation_id: Uuid,
        error: TaskFailure,
    },
}

/// Failure reported by the task's own execution, carried verbatim back to
/// the submitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,
    pub details: Option<JsonValue>,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: JsonValue) -> Self {
        Self {
            message: message.into(),
            details: Some(details),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// How a worker context ended its life.
///
/// Code 0 is reserved for a voluntary, clean shutdown and never triggers
/// slot replacement. Any other code is abnormal: an uncaught fault in the
/// context, or a forced termination by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: i32,
}

impl ExitStatus {
    /// Voluntary shutdown, no replacement needed.
    pub const CLEAN: ExitStatus = ExitStatus { code: 0 };

    /// The conventional code for a forced termination.
    pub const TERMINATED: ExitStatus = ExitStatus { code: 1 };

    pub fn abnormal(code: i32) -> Self {
        Self { code }
    }

    pub fn is_clean(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}", self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_serialization_round_trip() {
        let reply = WorkerReply::Completed {
            correlation_id: Uuid::new_v4(),
            output: json!({"sum": 42}),
        };

        let encoded = serde_json::to_string(&reply).unwrap();
        let decoded: WorkerReply = serde_json::from_str(&encoded).unwrap();

        match decoded {
            WorkerReply::Completed { output, .. } => assert_eq!(output, json!({"sum": 42})),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_failed_reply_carries_details() {
        let reply = WorkerReply::Failed {
            correlation_id: Uuid::new_v4(),
            error: TaskFailure::with_details("division by zero", json!({"line": 3})),
        };

        let encoded = serde_json::to_string(&reply).unwrap();
        let decoded: WorkerReply = serde_json::from_str(&encoded).unwrap();

        match decoded {
            WorkerReply::Failed { error, .. } => {
                assert_eq!(error.message, "division by zero");
                assert_eq!(error.details, Some(json!({"line": 3})));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_exit_status_classification() {
        assert!(ExitStatus::CLEAN.is_clean());
        assert!(!ExitStatus::TERMINATED.is_clean());
        assert!(!ExitStatus::abnormal(101).is_clean());
        assert_eq!(ExitStatus::TERMINATED.code, 1);
    }

    #[test]
    fn test_task_failure_display() {
        let failure = TaskFailure::new("boom");
        assert_eq!(failure.to_string(), "boom");
    }
}
