use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::info;

use crate::db::{init_db, to_db, ts, ts_opt};
use crate::error::Result;
use crate::store::lock;
use crate::types::{Run, RunReport, RunStatus};

const RUN_COLUMNS: &str =
    "id, workflow_id, schedule_id, task_id, started_at, finished_at, status, output, error";

/// Per-dispatch run records.
///
/// Rows are created at dispatch time with status `QUEUED`; workers report
/// completion through [`RunLedger::report`] and cancellation rewrites the
/// status through [`RunLedger::mark`].
#[derive(Clone)]
pub struct RunLedger {
    conn: Arc<Mutex<Connection>>,
}

impl RunLedger {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&lock(&conn))?;
        Ok(Self { conn })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }

    pub fn record(
        &self,
        workflow_id: i64,
        schedule_id: Option<i64>,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Run> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO runs (workflow_id, schedule_id, task_id, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                workflow_id,
                schedule_id,
                task_id,
                to_db(now),
                RunStatus::Queued.as_str()
            ],
        )?;
        let id = conn.last_insert_rowid();
        let run = conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
            [id],
            run_from_row,
        )?;
        Ok(run)
    }

    /// Runs newest first, optionally for one workflow.
    pub fn list(&self, workflow_id: Option<i64>) -> Result<Vec<Run>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs
             WHERE ?1 IS NULL OR workflow_id = ?1
             ORDER BY started_at DESC, id DESC"
        ))?;
        let runs = stmt
            .query_map([workflow_id], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    pub fn by_task(&self, task_id: &str) -> Result<Vec<Run>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE task_id = ?1 ORDER BY id"
        ))?;
        let runs = stmt
            .query_map([task_id], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Set the status of every run carrying `task_id`. Returns rows touched;
    /// zero is normal for tasks dispatched outside the ledger.
    pub fn mark(&self, task_id: &str, status: RunStatus) -> Result<usize> {
        let n = self.conn().execute(
            "UPDATE runs SET status = ?1 WHERE task_id = ?2",
            params![status.as_str(), task_id],
        )?;
        info!(task_id, %status, rows = n, "run status updated");
        Ok(n)
    }

    /// Apply a worker's progress or completion report. Terminal statuses
    /// stamp `finished_at`.
    pub fn report(&self, task_id: &str, report: &RunReport, now: DateTime<Utc>) -> Result<usize> {
        let finished = report.status.is_terminal().then(|| to_db(now));
        let n = self.conn().execute(
            "UPDATE runs SET status = ?1,
                             output = COALESCE(?2, output),
                             error = COALESCE(?3, error),
                             finished_at = COALESCE(?4, finished_at)
             WHERE task_id = ?5",
            params![
                report.status.as_str(),
                report.output,
                report.error,
                finished,
                task_id
            ],
        )?;
        info!(task_id, status = %report.status, rows = n, "run reported");
        Ok(n)
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        schedule_id: row.get(2)?,
        task_id: row.get(3)?,
        started_at: ts(row, 4)?,
        finished_at: ts_opt(row, 5)?,
        status: RunStatus::from(row.get::<_, String>(6)?),
        output: row.get(7)?,
        error: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ledger() -> RunLedger {
        RunLedger::new(Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 6, 0, 0).unwrap()
    }

    #[test]
    fn record_starts_queued() {
        let l = ledger();
        let run = l.record(5, None, "task-a", t0()).unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.task_id.as_deref(), Some("task-a"));
        assert_eq!(run.schedule_id, None);
        assert_eq!(run.started_at, t0());
        assert_eq!(run.finished_at, None);
    }

    #[test]
    fn list_filters_by_workflow_newest_first() {
        let l = ledger();
        l.record(1, None, "a", t0()).unwrap();
        l.record(2, None, "b", t0()).unwrap();
        l.record(1, None, "c", t0() + Duration::minutes(1)).unwrap();

        let runs = l.list(Some(1)).unwrap();
        let ids: Vec<_> = runs.iter().filter_map(|r| r.task_id.clone()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(l.list(None).unwrap().len(), 3);
    }

    #[test]
    fn mark_touches_only_matching_task() {
        let l = ledger();
        l.record(1, None, "a", t0()).unwrap();
        l.record(1, None, "b", t0()).unwrap();
        assert_eq!(l.mark("a", RunStatus::Removed).unwrap(), 1);
        assert_eq!(l.mark("missing", RunStatus::Revoked).unwrap(), 0);
        assert_eq!(l.by_task("a").unwrap()[0].status, RunStatus::Removed);
        assert_eq!(l.by_task("b").unwrap()[0].status, RunStatus::Queued);
    }

    #[test]
    fn terminal_report_sets_finished_at() {
        let l = ledger();
        l.record(1, None, "a", t0()).unwrap();

        let started = RunReport {
            status: RunStatus::Started,
            output: None,
            error: None,
        };
        l.report("a", &started, t0()).unwrap();
        assert_eq!(l.by_task("a").unwrap()[0].finished_at, None);

        let done = RunReport {
            status: RunStatus::Failure,
            output: Some("partial".into()),
            error: Some("GAP solver diverged".into()),
        };
        let later = t0() + Duration::minutes(3);
        l.report("a", &done, later).unwrap();
        let run = &l.by_task("a").unwrap()[0];
        assert_eq!(run.status, RunStatus::Failure);
        assert_eq!(run.finished_at, Some(later));
        assert_eq!(run.error.as_deref(), Some("GAP solver diverged"));
    }
}
