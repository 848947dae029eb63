use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use wellcast_broker::{envelope, Broker};

use crate::error::Result;
use crate::ledger::RunLedger;
use crate::types::RunStatus;

/// What a cancel request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAction {
    /// The pending message was taken off its queue.
    Deleted,
    /// A termination signal was broadcast to the workers.
    Revoked,
    /// No pending message carried the id.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub action: CancelAction,
    /// Run rows whose status was rewritten.
    pub runs_updated: usize,
}

/// Cancels individual tasks, either before or after a worker picks them up.
pub struct TaskManager {
    broker: Arc<dyn Broker>,
    ledger: RunLedger,
}

impl TaskManager {
    pub fn new(broker: Arc<dyn Broker>, ledger: RunLedger) -> Self {
        Self { broker, ledger }
    }

    /// Cancel `task_id`.
    ///
    /// With `revoke` set the worker pool is told to drop or terminate the task
    /// and its runs become `REVOKED`. Otherwise the first pending message on
    /// `queue` with that id is removed and its runs become `REMOVED`; a message
    /// that a worker popped in the meantime counts as not found.
    pub async fn cancel(&self, task_id: &str, queue: &str, revoke: bool) -> Result<CancelOutcome> {
        if revoke {
            self.broker.revoke(task_id, true).await?;
            let runs_updated = self.ledger.mark(task_id, RunStatus::Revoked)?;
            info!(task_id, runs_updated, "task revoked");
            return Ok(CancelOutcome {
                action: CancelAction::Revoked,
                runs_updated,
            });
        }

        let Some(raw) = self.find(task_id, queue).await? else {
            return Ok(not_found());
        };
        if !self.broker.remove(queue, &raw).await? {
            info!(task_id, queue, "task left the queue before removal");
            return Ok(not_found());
        }
        let runs_updated = self.ledger.mark(task_id, RunStatus::Removed)?;
        info!(task_id, queue, runs_updated, "pending task removed");
        Ok(CancelOutcome {
            action: CancelAction::Deleted,
            runs_updated,
        })
    }

    async fn find(&self, task_id: &str, queue: &str) -> Result<Option<String>> {
        for raw in self.broker.peek(queue, None).await? {
            match envelope::task_id(&raw) {
                Ok(Some(id)) if id == task_id => return Ok(Some(raw)),
                Ok(_) => {}
                Err(e) => warn!(queue, error = %e, "skipping undecodable message"),
            }
        }
        Ok(None)
    }
}

fn not_found() -> CancelOutcome {
    CancelOutcome {
        action: CancelAction::NotFound,
        runs_updated: 0,
    }
}
