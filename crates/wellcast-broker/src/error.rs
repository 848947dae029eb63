use thiserror::Error;

/// Errors raised by broker backends and the components built on them.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached or rejected the command.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A single broker round-trip exceeded its bound.
    #[error("Broker {op} timed out after {ms}ms")]
    Timeout { op: &'static str, ms: u64 },

    /// Enqueue failed; the task was not placed on any queue.
    #[error("Dispatch of {task} to queue {queue} failed: {reason}")]
    DispatchUnavailable {
        task: String,
        queue: String,
        reason: String,
    },

    /// The termination signal for a running task could not be delivered.
    #[error("Revoke of task {task_id} failed: {reason}")]
    RevokeSignal { task_id: String, reason: String },

    /// A queued message could not be decoded as a task envelope.
    #[error("Malformed task message: {0}")]
    Malformed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for BrokerError {
    fn from(e: redis::RedisError) -> Self {
        BrokerError::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
