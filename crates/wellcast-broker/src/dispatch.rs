use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use wellcast_core::config::BrokerConfig;

use crate::broker::Broker;
use crate::envelope;
use crate::error::{BrokerError, Result};

/// Correlation handle returned as soon as a task is on its queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskHandle {
    pub id: String,
    pub task: String,
    pub queue: String,
}

/// Enqueues named tasks onto broker queues.
///
/// The queue comes from the routing table unless the caller names one.
/// Enqueue is fire-and-forget: the handle is returned before any worker
/// sees the message.
pub struct TaskDispatcher {
    broker: Arc<dyn Broker>,
    routes: BTreeMap<String, String>,
    default_queue: String,
}

impl TaskDispatcher {
    pub fn new(broker: Arc<dyn Broker>, config: &BrokerConfig) -> Self {
        Self {
            broker,
            routes: config.routes.clone(),
            default_queue: config.default_queue.clone(),
        }
    }

    /// Queue a task named `task` is routed to.
    pub fn route(&self, task: &str) -> &str {
        self.routes
            .get(task)
            .map(String::as_str)
            .unwrap_or(&self.default_queue)
    }

    pub async fn enqueue(&self, task: &str, args: &[Value], queue: Option<&str>) -> Result<TaskHandle> {
        let queue = queue.unwrap_or_else(|| self.route(task)).to_string();
        let id = uuid::Uuid::new_v4().to_string();
        let payload = envelope::encode(&id, task, args, &queue)?;

        if let Err(e) = self.broker.push(&queue, &payload).await {
            warn!(task, queue = %queue, error = %e, "enqueue failed");
            return Err(BrokerError::DispatchUnavailable {
                task: task.to_string(),
                queue,
                reason: e.to_string(),
            });
        }

        info!(task, queue = %queue, task_id = %id, "task queued");
        Ok(TaskHandle {
            id,
            task: task.to_string(),
            queue,
        })
    }
}
