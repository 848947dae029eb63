use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted recurring-workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    /// Opaque reference to the workflow the schedule runs.
    pub workflow_id: i64,
    /// Five-field cron expression, evaluated in the configured timezone.
    pub cron_expression: String,
    /// `None` on an active schedule means "not seeded yet".
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when an administrator creates a schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub workflow_id: i64,
    pub cron_expression: String,
    #[serde(default = "bool_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Administrative partial update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulePatch {
    pub cron_expression: Option<String>,
    pub is_active: Option<bool>,
}

fn bool_true() -> bool {
    true
}

/// Outcome of one runner decision about one schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Queued,
    Error,
    NoServer,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogStatus::Queued => "QUEUED",
            LogStatus::Error => "ERROR",
            LogStatus::NoServer => "NO_SERVER",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(LogStatus::Queued),
            "ERROR" => Ok(LogStatus::Error),
            "NO_SERVER" => Ok(LogStatus::NoServer),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleLog {
    pub id: i64,
    pub schedule_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status: LogStatus,
    pub message: Option<String>,
}

/// Lifecycle of a single dispatched run.
///
/// Workers may report statuses this side does not know about; those are
/// kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Queued,
    Started,
    Success,
    Failure,
    /// Termination requested; the worker may still be winding down.
    Revoked,
    /// Taken off its queue before any worker picked it up.
    Removed,
    Other(String),
}

impl RunStatus {
    /// Whether a worker reporting this status is done with the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Revoked | RunStatus::Removed
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Started => "STARTED",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
            RunStatus::Revoked => "REVOKED",
            RunStatus::Removed => "REMOVED",
            RunStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "QUEUED" => RunStatus::Queued,
            "STARTED" => RunStatus::Started,
            "SUCCESS" => RunStatus::Success,
            "FAILURE" => RunStatus::Failure,
            "REVOKED" => RunStatus::Revoked,
            "REMOVED" => RunStatus::Removed,
            _ => RunStatus::Other(s),
        }
    }
}

impl From<RunStatus> for String {
    fn from(s: RunStatus) -> Self {
        s.as_str().to_string()
    }
}

/// One concrete dispatch of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub workflow_id: i64,
    /// `None` for ad-hoc runs.
    pub schedule_id: Option<i64>,
    /// Broker correlation id.
    pub task_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Completion report posted by a worker.
#[derive(Debug, Clone, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A compute server workflows can be routed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub allow_workflows: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewServer {
    pub name: String,
    #[serde(default = "bool_true")]
    pub is_active: bool,
    #[serde(default = "bool_true")]
    pub allow_workflows: bool,
}

/// Per-schedule entry of a runner pass, returned to the HTTP caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub schedule_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: LogStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub workflow_id: i64,
    /// Another pass advanced the schedule first; this dispatch is the
    /// at-least-once duplicate.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_keeps_unknown_values() {
        let s: RunStatus = serde_json::from_str(r#""RETRY""#).unwrap();
        assert_eq!(s, RunStatus::Other("RETRY".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), r#""RETRY""#);
        assert_eq!(serde_json::to_string(&RunStatus::Revoked).unwrap(), r#""REVOKED""#);
    }

    #[test]
    fn log_status_wire_names() {
        assert_eq!(serde_json::to_string(&LogStatus::NoServer).unwrap(), r#""NO_SERVER""#);
        assert_eq!("QUEUED".parse::<LogStatus>(), Ok(LogStatus::Queued));
        assert!("queued".parse::<LogStatus>().is_err());
    }

    #[test]
    fn result_omits_empty_fields() {
        let r = DispatchResult {
            schedule_id: 1,
            task_id: Some("t".into()),
            status: LogStatus::Queued,
            error: None,
            workflow_id: 9,
            duplicate: false,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "QUEUED");
        assert!(v.get("error").is_none());
        assert!(v.get("duplicate").is_none());
    }
}
