use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::broker::{QueueBroker, WorkerControl, WorkerReply};
use crate::error::{BrokerError, Result};

/// In-process broker with the same list semantics as the Redis backend.
///
/// Used for single-node deployments without Redis and as the test double
/// for everything built on [`crate::Broker`]. Individual operations can be
/// made to fail so degradation paths are observable.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    workers: Mutex<Vec<String>>,
    revoked: Mutex<Vec<(String, bool)>>,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct Faults {
    offline: bool,
    queues: HashSet<String>,
    revoke: bool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker that answers pings with `{"ok": "pong"}`.
    pub fn add_worker(&self, name: &str) {
        self.workers.lock().unwrap().push(name.to_string());
    }

    /// Simulate the whole broker being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().unwrap().offline = offline;
    }

    /// Make every operation on `queue` fail.
    pub fn fail_queue(&self, queue: &str) {
        self.faults.lock().unwrap().queues.insert(queue.to_string());
    }

    /// Make revoke signals undeliverable.
    pub fn fail_revoke(&self, fail: bool) {
        self.faults.lock().unwrap().revoke = fail;
    }

    /// Pop the oldest message of `queue`, as a worker would.
    pub fn pop(&self, queue: &str) -> Option<String> {
        self.queues.lock().unwrap().get_mut(queue)?.pop_back()
    }

    /// Task ids revoked so far, with their terminate flag.
    pub fn revoked(&self) -> Vec<(String, bool)> {
        self.revoked.lock().unwrap().clone()
    }

    fn check(&self, queue: Option<&str>) -> Result<()> {
        let faults = self.faults.lock().unwrap();
        if faults.offline {
            return Err(BrokerError::Unavailable("connection refused".into()));
        }
        if let Some(q) = queue {
            if faults.queues.contains(q) {
                return Err(BrokerError::Unavailable(format!("queue {q} unavailable")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn ensure_connected(&self) -> Result<()> {
        self.check(None)
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        self.check(Some(queue))?;
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push_front(payload.to_string());
        debug!(queue, "message pushed");
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        self.check(Some(queue))?;
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, VecDeque::len))
    }

    async fn peek(&self, queue: &str, limit: Option<usize>) -> Result<Vec<String>> {
        self.check(Some(queue))?;
        let queues = self.queues.lock().unwrap();
        let Some(q) = queues.get(queue) else {
            return Ok(Vec::new());
        };
        let take = limit.unwrap_or(q.len());
        Ok(q.iter().take(take).cloned().collect())
    }

    async fn remove(&self, queue: &str, payload: &str) -> Result<bool> {
        self.check(Some(queue))?;
        let mut queues = self.queues.lock().unwrap();
        let Some(q) = queues.get_mut(queue) else {
            return Ok(false);
        };
        match q.iter().position(|m| m == payload) {
            Some(idx) => {
                q.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl WorkerControl for MemoryBroker {
    async fn ping(&self, _timeout: Duration) -> Result<Vec<WorkerReply>> {
        self.check(None)?;
        Ok(self
            .workers
            .lock()
            .unwrap()
            .iter()
            .map(|w| WorkerReply {
                worker: w.clone(),
                reply: json!({ "ok": "pong" }),
            })
            .collect())
    }

    async fn revoke(&self, task_id: &str, terminate: bool) -> Result<()> {
        let undeliverable = self.faults.lock().unwrap().revoke;
        if undeliverable || self.check(None).is_err() {
            return Err(BrokerError::RevokeSignal {
                task_id: task_id.to_string(),
                reason: "control channel unavailable".into(),
            });
        }
        self.revoked
            .lock()
            .unwrap()
            .push((task_id.to_string(), terminate));
        Ok(())
    }
}
