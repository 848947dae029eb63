//! Task message envelope placed on broker queues.
//!
//! The layout follows the Celery message protocol (v2) body and headers.
//! Queue consumption is the only part a Celery-style worker gets for free;
//! ping and revoke use the control contract in [`crate::redis_broker`], which
//! workers must implement on their side.
//!
//! ```json
//! {
//!   "body": "[[17, 4], {}, {...}]",
//!   "content-encoding": "utf-8",
//!   "content-type": "application/json",
//!   "headers": { "id": "...", "task": "worker.run_workflow", "argsrepr": "[17, 4]", ... },
//!   "properties": { "correlation_id": "...", "delivery_info": { "routing_key": "workflows" }, ... }
//! }
//! ```
//!
//! Only two things are ever read back out of a queued message: its task id
//! and a printable argument summary.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{BrokerError, Result};

/// A queued message as shown in the workers-status preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeekedTask {
    pub task_id: Option<String>,
    pub args: String,
}

/// Build the JSON envelope for `task` with positional `args`.
pub fn encode(task_id: &str, task: &str, args: &[Value], queue: &str) -> Result<String> {
    let args_json = Value::Array(args.to_vec());
    let argsrepr = args_json.to_string();
    let body = json!([
        args_json,
        {},
        { "callbacks": null, "errbacks": null, "chain": null, "chord": null }
    ])
    .to_string();

    let envelope = json!({
        "body": body,
        "content-encoding": "utf-8",
        "content-type": "application/json",
        "headers": {
            "lang": "py",
            "task": task,
            "id": task_id,
            "root_id": task_id,
            "parent_id": null,
            "group": null,
            "argsrepr": argsrepr,
            "kwargsrepr": "{}",
            "retries": 0,
            "eta": null,
            "expires": null,
            "origin": origin(),
        },
        "properties": {
            "correlation_id": task_id,
            "reply_to": "",
            "delivery_mode": 2,
            "delivery_info": { "exchange": "", "routing_key": queue },
            "priority": 0,
            "delivery_tag": uuid::Uuid::new_v4().to_string(),
        },
    });
    Ok(serde_json::to_string(&envelope)?)
}

/// Extract the task id: `headers.id`, falling back to `properties.correlation_id`.
pub fn task_id(raw: &str) -> Result<Option<String>> {
    let msg = parse(raw)?;
    Ok(id_of(&msg))
}

/// Decode a raw queued message into its preview row.
pub fn peek(raw: &str) -> Result<PeekedTask> {
    let msg = parse(raw)?;
    let args = msg
        .pointer("/headers/argsrepr")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(PeekedTask {
        task_id: id_of(&msg),
        args,
    })
}

fn parse(raw: &str) -> Result<Value> {
    let msg: Value = serde_json::from_str(raw)?;
    if !msg.is_object() {
        return Err(BrokerError::Malformed("envelope is not a JSON object".into()));
    }
    Ok(msg)
}

fn id_of(msg: &Value) -> Option<String> {
    msg.pointer("/headers/id")
        .and_then(Value::as_str)
        .or_else(|| {
            msg.pointer("/properties/correlation_id")
                .and_then(Value::as_str)
        })
        .map(String::from)
}

fn origin() -> String {
    format!("wellcast@{}", std::process::id())
}
