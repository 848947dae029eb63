use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use wellcast_core::config::BrokerConfig;

use crate::broker::Broker;
use crate::envelope::{self, PeekedTask};

/// One row of the worker table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRow {
    pub worker: String,
    pub status: String,
}

impl WorkerRow {
    fn placeholder() -> Self {
        Self {
            worker: "No workers".to_string(),
            status: "offline".to_string(),
        }
    }
}

/// Snapshot returned by `GET /workflows/workers-status/`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkersStatus {
    /// Never empty: a placeholder row stands in when nobody answers.
    pub workers: Vec<WorkerRow>,
    /// Queue depth, `null` when the broker could not report it.
    pub queues: BTreeMap<String, Option<usize>>,
    pub tasks: BTreeMap<String, Vec<PeekedTask>>,
}

/// Read-only, best-effort view of workers and queue backlogs.
///
/// Every broker operation fails independently: a failed ping yields the
/// placeholder row, a failed length read nulls that queue's depth, a failed
/// peek empties that queue's preview, and an undecodable message is skipped.
pub struct Inspector {
    broker: Arc<dyn Broker>,
    queues: Vec<String>,
    preview_limit: usize,
    ping_timeout: Duration,
}

impl Inspector {
    pub fn new(broker: Arc<dyn Broker>, config: &BrokerConfig) -> Self {
        Self {
            broker,
            queues: config.queues.clone(),
            preview_limit: config.preview_limit,
            ping_timeout: Duration::from_millis(config.ping_timeout_ms),
        }
    }

    pub async fn status(&self) -> WorkersStatus {
        let workers = self.workers().await;

        let mut queues = BTreeMap::new();
        let mut tasks = BTreeMap::new();
        for queue in &self.queues {
            let depth = match self.broker.len(queue).await {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(queue = %queue, error = %e, "queue length unavailable");
                    None
                }
            };
            queues.insert(queue.clone(), depth);
            tasks.insert(queue.clone(), self.preview(queue).await);
        }

        WorkersStatus {
            workers,
            queues,
            tasks,
        }
    }

    async fn workers(&self) -> Vec<WorkerRow> {
        let replies = match self.broker.ping(self.ping_timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "worker ping failed");
                Vec::new()
            }
        };

        let mut rows: Vec<WorkerRow> = replies
            .into_iter()
            .map(|r| WorkerRow {
                status: ack(&r.reply),
                worker: r.worker,
            })
            .collect();
        if rows.is_empty() {
            rows.push(WorkerRow::placeholder());
        }
        rows
    }

    async fn preview(&self, queue: &str) -> Vec<PeekedTask> {
        let raw = match self.broker.peek(queue, Some(self.preview_limit)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(queue, error = %e, "queue preview unavailable");
                return Vec::new();
            }
        };
        raw.iter()
            .filter_map(|m| match envelope::peek(m) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!(queue, error = %e, "skipping unreadable message");
                    None
                }
            })
            .collect()
    }
}

/// `{"ok": "pong"}` -> `"pong"`; any other answer means the worker is up.
fn ack(reply: &Value) -> String {
    match reply.get("ok") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "online".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TaskDispatcher;
    use crate::memory::MemoryBroker;
    use crate::QueueBroker;
    use serde_json::json;

    fn setup() -> (Arc<MemoryBroker>, Inspector, TaskDispatcher) {
        let broker = Arc::new(MemoryBroker::new());
        let cfg = BrokerConfig::default();
        (
            broker.clone(),
            Inspector::new(broker.clone(), &cfg),
            TaskDispatcher::new(broker, &cfg),
        )
    }

    #[tokio::test]
    async fn no_workers_yields_placeholder_row() {
        let (_, inspector, _) = setup();
        let status = inspector.status().await;
        assert_eq!(
            status.workers,
            vec![WorkerRow {
                worker: "No workers".into(),
                status: "offline".into()
            }]
        );
    }

    #[tokio::test]
    async fn responding_workers_report_their_ack() {
        let (broker, inspector, _) = setup();
        broker.add_worker("celery@node-1");
        broker.add_worker("celery@node-2");
        let status = inspector.status().await;
        assert_eq!(status.workers.len(), 2);
        assert!(status.workers.iter().all(|w| w.status == "pong"));
    }

    #[tokio::test]
    async fn one_failing_queue_does_not_hide_the_others() {
        let (broker, inspector, dispatcher) = setup();
        dispatcher
            .enqueue("worker.run_scenario", &[json!(1)], None)
            .await
            .unwrap();
        broker.fail_queue("workflows");

        let status = inspector.status().await;
        assert_eq!(status.queues["scenarios"], Some(1));
        assert_eq!(status.queues["workflows"], None);
        assert_eq!(status.tasks["scenarios"].len(), 1);
        assert!(status.tasks["workflows"].is_empty());

        let body = serde_json::to_value(&status).unwrap();
        assert!(body["queues"]["workflows"].is_null());
    }

    #[tokio::test]
    async fn preview_is_bounded_and_skips_garbage() {
        let (broker, inspector, dispatcher) = setup();
        for i in 0..25 {
            dispatcher
                .enqueue("worker.run_workflow", &[json!(i)], None)
                .await
                .unwrap();
        }
        broker.push("workflows", "{broken").await.unwrap();

        let status = inspector.status().await;
        assert_eq!(status.queues["workflows"], Some(26));
        // 20 peeked, the newest of which is the broken one.
        assert_eq!(status.tasks["workflows"].len(), 19);
        assert_eq!(status.tasks["workflows"][0].args, "[24]");
    }

    #[test]
    fn ack_falls_back_to_online() {
        assert_eq!(ack(&json!({"ok": "pong"})), "pong");
        assert_eq!(ack(&json!({})), "online");
    }
}
