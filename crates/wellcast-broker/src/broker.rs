use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// List-based message queues keyed by queue name.
///
/// New messages go on the head (`push`); workers consume from the tail.
/// `peek` therefore returns the most recently queued messages first.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Establish the connection if there is none, or re-establish it after
    /// a previous failure dropped it.
    async fn ensure_connected(&self) -> Result<()>;

    async fn push(&self, queue: &str, payload: &str) -> Result<()>;

    /// Number of messages waiting in `queue`.
    async fn len(&self, queue: &str) -> Result<usize>;

    /// Non-destructive read of up to `limit` messages (all when `None`).
    async fn peek(&self, queue: &str, limit: Option<usize>) -> Result<Vec<String>>;

    /// Remove one message equal to `payload`. Returns false when a worker
    /// already popped it.
    async fn remove(&self, queue: &str, payload: &str) -> Result<bool>;
}

/// One worker's answer to a ping broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReply {
    pub worker: String,
    pub reply: Value,
}

/// Control plane of the worker pool.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    /// Broadcast a ping and collect every reply that arrives within `timeout`.
    async fn ping(&self, timeout: Duration) -> Result<Vec<WorkerReply>>;

    /// Ask the pool to drop `task_id`, terminating it with SIGTERM when
    /// `terminate` is set and it is already running.
    async fn revoke(&self, task_id: &str, terminate: bool) -> Result<()>;
}

/// A full broker: queues plus worker control.
pub trait Broker: QueueBroker + WorkerControl {}

impl<T: QueueBroker + WorkerControl> Broker for T {}
