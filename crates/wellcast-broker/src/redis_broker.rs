use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::{QueueBroker, WorkerControl, WorkerReply};
use crate::error::{BrokerError, Result};

/// Set of revoked task ids; workers check it before starting a task.
const REVOKED_SET: &str = "wellcast.revoked";
/// Revoked ids are remembered for a day.
const REVOKED_TTL_SECS: i64 = 24 * 60 * 60;

/// Redis-backed broker: queues are Redis lists, worker control goes over a
/// pub/sub channel with replies collected from a per-broadcast list.
///
/// Worker side of the control contract:
///
/// - subscribe to the control channel (`wellcast.control` by default);
/// - on `{"method": "ping", "ticket", "reply_to"}`, `RPUSH` the JSON object
///   `{"<worker name>": {"ok": "pong"}}` onto the `reply_to` list;
/// - on `{"method": "revoke", "arguments": {"task_id", "terminate", "signal"}}`,
///   stop the task, signalling its process when `terminate` is set;
/// - before starting any task, skip it if its id is in `wellcast.revoked`.
///
/// The connection is opened lazily and dropped whenever a command fails at
/// the transport level, so the next call reconnects through
/// [`RedisBroker::ensure_connected`].
pub struct RedisBroker {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    timeout: Duration,
    control_channel: String,
}

impl RedisBroker {
    /// Validate `url` without connecting.
    pub fn new(url: &str, timeout: Duration, control_channel: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            timeout,
            control_channel: control_channel.to_string(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(self.timeout, ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|_| self.timed_out("connect"))??;
        info!("broker connection established");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn disconnect(&self) {
        if self.conn.lock().await.take().is_some() {
            warn!("broker connection dropped; next call reconnects");
        }
    }

    /// Run one command against the shared connection under the configured
    /// timeout, dropping the connection on transport failure.
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut + Send,
        Fut: Future<Output = redis::RedisResult<T>> + Send,
    {
        let conn = self.connection().await?;
        match tokio::time::timeout(self.timeout, f(conn)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.disconnect().await;
                }
                Err(e.into())
            }
            Err(_) => {
                self.disconnect().await;
                Err(self.timed_out(op))
            }
        }
    }

    fn timed_out(&self, op: &'static str) -> BrokerError {
        BrokerError::Timeout {
            op,
            ms: self.timeout.as_millis() as u64,
        }
    }

    /// Publish a control command; returns how many workers received it.
    async fn broadcast(&self, command: &Value) -> Result<usize> {
        let channel = self.control_channel.clone();
        let payload = command.to_string();
        self.run("publish", move |mut c| async move {
            c.publish::<_, _, usize>(channel, payload).await
        })
        .await
    }
}

#[async_trait]
impl QueueBroker for RedisBroker {
    async fn ensure_connected(&self) -> Result<()> {
        self.run("ping", |mut c| async move {
            let _pong: String = redis::cmd("PING").query_async(&mut c).await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        self.run("lpush", |mut c| async move {
            c.lpush::<_, _, ()>(queue, payload).await
        })
        .await
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        self.run("llen", |mut c| async move { c.llen::<_, usize>(queue).await })
            .await
    }

    async fn peek(&self, queue: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let Some(stop) = lrange_stop(limit) else {
            return Ok(Vec::new());
        };
        self.run("lrange", |mut c| async move {
            c.lrange::<_, Vec<String>>(queue, 0, stop).await
        })
        .await
    }

    async fn remove(&self, queue: &str, payload: &str) -> Result<bool> {
        let removed = self
            .run("lrem", |mut c| async move {
                c.lrem::<_, _, usize>(queue, 1, payload).await
            })
            .await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl WorkerControl for RedisBroker {
    async fn ping(&self, timeout: Duration) -> Result<Vec<WorkerReply>> {
        let ticket = uuid::Uuid::new_v4().to_string();
        let reply_key = format!("{}.reply.{}", self.control_channel, ticket);
        let command = json!({
            "method": "ping",
            "arguments": {},
            "ticket": ticket,
            "reply_to": reply_key,
        });

        let listeners = self.broadcast(&command).await?;
        debug!(listeners, "ping broadcast");
        if listeners == 0 {
            return Ok(Vec::new());
        }

        tokio::time::sleep(timeout).await;
        let key = reply_key.clone();
        let raw: Vec<String> = self
            .run("lrange", move |mut c| async move {
                let replies = c.lrange::<_, Vec<String>>(&key, 0, -1).await?;
                c.del::<_, ()>(&key).await?;
                Ok::<_, redis::RedisError>(replies)
            })
            .await?;

        Ok(parse_ping_replies(raw))
    }

    async fn revoke(&self, task_id: &str, terminate: bool) -> Result<()> {
        let signal_err = |e: BrokerError| BrokerError::RevokeSignal {
            task_id: task_id.to_string(),
            reason: e.to_string(),
        };

        let id = task_id.to_string();
        self.run("sadd", move |mut c| async move {
            c.sadd::<_, _, ()>(REVOKED_SET, &id).await?;
            c.expire::<_, ()>(REVOKED_SET, REVOKED_TTL_SECS).await
        })
        .await
        .map_err(signal_err)?;

        let command = json!({
            "method": "revoke",
            "arguments": {
                "task_id": task_id,
                "terminate": terminate,
                "signal": "SIGTERM",
            },
        });
        let listeners = self.broadcast(&command).await.map_err(signal_err)?;
        revoke_delivered(task_id, listeners)?;
        info!(task_id, listeners, terminate, "revoke published");
        Ok(())
    }
}

/// `LRANGE` stop index for a preview of at most `limit` entries; `None` when
/// nothing should be fetched.
fn lrange_stop(limit: Option<usize>) -> Option<isize> {
    match limit {
        Some(0) => None,
        Some(n) => Some(isize::try_from(n).unwrap_or(isize::MAX) - 1),
        None => Some(-1),
    }
}

/// Decode ping replies. Workers push `{"<name>": {"ok": "pong"}}` onto the
/// reply list; one entry may carry several workers.
fn parse_ping_replies(raw: Vec<String>) -> Vec<WorkerReply> {
    let mut replies = Vec::new();
    for entry in raw {
        match serde_json::from_str::<serde_json::Map<String, Value>>(&entry) {
            Ok(map) => replies.extend(
                map.into_iter()
                    .map(|(worker, reply)| WorkerReply { worker, reply }),
            ),
            Err(e) => warn!(error = %e, "unreadable ping reply skipped"),
        }
    }
    replies
}

/// A revoke nobody received leaves the task running, so it must surface.
/// The id stays in the revoked set for workers that pick the task up later.
fn revoke_delivered(task_id: &str, listeners: usize) -> Result<()> {
    if listeners == 0 {
        warn!(task_id, "revoke published with no listening workers");
        return Err(BrokerError::RevokeSignal {
            task_id: task_id.to_string(),
            reason: "no worker is listening on the control channel".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_limit_maps_to_lrange_stop() {
        assert_eq!(lrange_stop(Some(0)), None);
        assert_eq!(lrange_stop(Some(1)), Some(0));
        assert_eq!(lrange_stop(Some(5)), Some(4));
        assert_eq!(lrange_stop(None), Some(-1));
    }

    #[test]
    fn ping_replies_flatten_and_skip_garbage() {
        let raw = vec![
            r#"{"celery@gap-01": {"ok": "pong"}}"#.to_string(),
            "not json".to_string(),
            r#"{"celery@gap-02": {"ok": "pong"}, "celery@gap-03": {"ok": "pong"}}"#.to_string(),
            r#"["a", "list"]"#.to_string(),
        ];
        let replies = parse_ping_replies(raw);
        let names: Vec<_> = replies.iter().map(|r| r.worker.as_str()).collect();
        assert_eq!(names, ["celery@gap-01", "celery@gap-02", "celery@gap-03"]);
        assert_eq!(replies[0].reply, json!({"ok": "pong"}));
        assert!(parse_ping_replies(Vec::new()).is_empty());
    }

    #[test]
    fn revoke_without_listeners_is_a_signal_error() {
        let err = revoke_delivered("t-1", 0).unwrap_err();
        assert!(matches!(
            err,
            BrokerError::RevokeSignal { ref task_id, .. } if task_id == "t-1"
        ));
        assert!(err.to_string().contains("no worker is listening"));
        assert!(revoke_delivered("t-1", 2).is_ok());
    }

    #[tokio::test]
    async fn unreachable_server_leaves_no_connection() {
        let broker = RedisBroker::new(
            "redis://127.0.0.1:1",
            Duration::from_millis(200),
            "wellcast.control",
        )
        .unwrap();

        for _ in 0..2 {
            let err = broker.ensure_connected().await.unwrap_err();
            assert!(
                matches!(err, BrokerError::Unavailable(_) | BrokerError::Timeout { .. }),
                "unexpected error: {err}"
            );
            assert!(broker.conn.lock().await.is_none());
        }
    }
}
