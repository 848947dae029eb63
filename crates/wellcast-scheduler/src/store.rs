use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::db::{init_db, to_db, ts, ts_opt};
use crate::error::{Result, SchedulerError};
use crate::types::{LogStatus, NewSchedule, NewServer, Schedule, ScheduleLog, SchedulePatch, Server};

const SCHEDULE_COLUMNS: &str =
    "id, workflow_id, cron_expression, next_run, last_run, is_active, created_by, created_at";

/// Durable schedules, their audit log and the workflow server registry.
///
/// Every method takes the connection lock for a single statement and
/// releases it before returning, so callers may hold a `ScheduleStore`
/// across `.await` points freely.
#[derive(Clone)]
pub struct ScheduleStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&lock(&conn))?;
        Ok(Self { conn })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }

    // --- administrative API -------------------------------------------------

    pub fn create(&self, new: &NewSchedule, now: DateTime<Utc>) -> Result<Schedule> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO schedules (workflow_id, cron_expression, next_run, last_run,
                                    is_active, created_by, created_at)
             VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5)",
            params![
                new.workflow_id,
                new.cron_expression.trim(),
                new.is_active,
                new.created_by,
                to_db(now)
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(schedule_id = id, workflow_id = new.workflow_id, "schedule created");
        drop(conn);
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<Schedule> {
        self.conn()
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                [id],
                schedule_from_row,
            )
            .optional()?
            .ok_or(SchedulerError::ScheduleNotFound { id })
    }

    /// All schedules, newest first.
    pub fn list(&self) -> Result<Vec<Schedule>> {
        self.query_schedules(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY created_at DESC, id DESC"),
            &[],
        )
    }

    /// Apply an administrative update. A new cron expression clears
    /// `next_run` so the next seed pass recomputes it.
    pub fn update(&self, id: i64, patch: &SchedulePatch) -> Result<Schedule> {
        {
            let conn = self.conn();
            let mut changed = 0;
            if let Some(active) = patch.is_active {
                changed += conn.execute(
                    "UPDATE schedules SET is_active = ?1 WHERE id = ?2",
                    params![active, id],
                )?;
            }
            if let Some(expr) = &patch.cron_expression {
                changed += conn.execute(
                    "UPDATE schedules SET cron_expression = ?1, next_run = NULL WHERE id = ?2",
                    params![expr.trim(), id],
                )?;
            }
            if changed > 0 {
                info!(schedule_id = id, "schedule updated");
            }
        }
        self.get(id)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let n = self.conn().execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::ScheduleNotFound { id });
        }
        info!(schedule_id = id, "schedule deleted");
        Ok(())
    }

    // --- runner API ---------------------------------------------------------

    /// Active schedules that have never been given a `next_run`.
    pub fn unseeded(&self) -> Result<Vec<Schedule>> {
        self.query_schedules(
            &format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE is_active = 1 AND next_run IS NULL ORDER BY id"
            ),
            &[],
        )
    }

    /// Active schedules whose `next_run` is at or before `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        self.query_schedules(
            &format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE is_active = 1 AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run, id"
            ),
            &[&to_db(now)],
        )
    }

    /// Set `next_run` only if it is still unset. Returns false when another
    /// pass seeded it first.
    pub fn seed(&self, id: i64, next_run: DateTime<Utc>) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE schedules SET next_run = ?1 WHERE id = ?2 AND next_run IS NULL",
            params![to_db(next_run), id],
        )?;
        debug!(schedule_id = id, seeded = n == 1, "seed");
        Ok(n == 1)
    }

    /// Commit a dispatch: move `next_run` from `expected` to `next_run` and
    /// stamp `last_run`, in one conditional statement.
    ///
    /// Returns false when `next_run` no longer equals `expected`, i.e. an
    /// overlapping pass already advanced this schedule.
    pub fn advance(
        &self,
        id: i64,
        expected: DateTime<Utc>,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE schedules SET last_run = ?1, next_run = ?2
             WHERE id = ?3 AND next_run = ?4",
            params![to_db(last_run), to_db(next_run), id, to_db(expected)],
        )?;
        Ok(n == 1)
    }

    // --- audit log ----------------------------------------------------------

    pub fn append_log(
        &self,
        schedule_id: i64,
        status: LogStatus,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO schedule_logs (schedule_id, timestamp, status, message)
             VALUES (?1, ?2, ?3, ?4)",
            params![schedule_id, to_db(now), status.to_string(), message],
        )?;
        Ok(())
    }

    /// Log rows newest first, optionally for one schedule.
    pub fn logs(&self, schedule_id: Option<i64>) -> Result<Vec<ScheduleLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, schedule_id, timestamp, status, message FROM schedule_logs
             WHERE ?1 IS NULL OR schedule_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let logs = stmt
            .query_map([schedule_id], |row| {
                let status = row
                    .get::<_, String>(3)?
                    .parse::<LogStatus>()
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
                Ok(ScheduleLog {
                    id: row.get(0)?,
                    schedule_id: row.get(1)?,
                    timestamp: ts(row, 2)?,
                    status,
                    message: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    // --- workflow servers ---------------------------------------------------

    /// Register a server, or update its flags if the name already exists.
    pub fn upsert_server(&self, new: &NewServer, now: DateTime<Utc>) -> Result<Server> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO servers (name, is_active, allow_workflows, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (name) DO UPDATE SET
                 is_active = excluded.is_active,
                 allow_workflows = excluded.allow_workflows",
            params![new.name, new.is_active, new.allow_workflows, to_db(now)],
        )?;
        let server = conn.query_row(
            "SELECT id, name, is_active, allow_workflows, created_at FROM servers WHERE name = ?1",
            [&new.name],
            server_from_row,
        )?;
        info!(server = %server.name, active = server.is_active, "server registered");
        Ok(server)
    }

    pub fn servers(&self) -> Result<Vec<Server>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, is_active, allow_workflows, created_at FROM servers ORDER BY name",
        )?;
        let servers = stmt
            .query_map([], server_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(servers)
    }

    /// Whether at least one active server accepts workflow runs.
    pub fn has_workflow_server(&self) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM servers WHERE is_active = 1 AND allow_workflows = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    fn query_schedules(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Schedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// Lock a shared connection, recovering it if a panicking holder poisoned it.
pub(crate) fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        cron_expression: row.get(2)?,
        next_run: ts_opt(row, 3)?,
        last_run: ts_opt(row, 4)?,
        is_active: row.get(5)?,
        created_by: row.get(6)?,
        created_at: ts(row, 7)?,
    })
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get(2)?,
        allow_workflows: row.get(3)?,
        created_at: ts(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn store() -> ScheduleStore {
        let conn = Connection::open_in_memory().unwrap();
        ScheduleStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
    }

    fn new_schedule(workflow_id: i64) -> NewSchedule {
        NewSchedule {
            workflow_id,
            cron_expression: "*/5 * * * *".into(),
            is_active: true,
            created_by: Some("admin".into()),
        }
    }

    #[test]
    fn create_starts_unseeded() {
        let s = store();
        let sched = s.create(&new_schedule(3), t0()).unwrap();
        assert_eq!(sched.workflow_id, 3);
        assert_eq!(sched.next_run, None);
        assert_eq!(s.unseeded().unwrap(), vec![sched]);
    }

    #[test]
    fn seed_only_fills_empty_next_run() {
        let s = store();
        let id = s.create(&new_schedule(1), t0()).unwrap().id;
        let first = t0() + Duration::minutes(5);
        assert!(s.seed(id, first).unwrap());
        assert!(!s.seed(id, first + Duration::minutes(5)).unwrap());
        assert_eq!(s.get(id).unwrap().next_run, Some(first));
        assert!(s.unseeded().unwrap().is_empty());
    }

    #[test]
    fn due_respects_time_and_active_flag() {
        let s = store();
        let a = s.create(&new_schedule(1), t0()).unwrap().id;
        let b = s.create(&new_schedule(2), t0()).unwrap().id;
        s.seed(a, t0()).unwrap();
        s.seed(b, t0() + Duration::hours(1)).unwrap();

        let due: Vec<i64> = s.due(t0()).unwrap().iter().map(|x| x.id).collect();
        assert_eq!(due, vec![a]);

        s.update(a, &SchedulePatch { is_active: Some(false), ..Default::default() })
            .unwrap();
        assert!(s.due(t0()).unwrap().is_empty());
    }

    #[test]
    fn advance_is_compare_and_set() {
        let s = store();
        let id = s.create(&new_schedule(1), t0()).unwrap().id;
        s.seed(id, t0()).unwrap();

        let next = t0() + Duration::minutes(5);
        assert!(s.advance(id, t0(), t0(), next).unwrap());
        // A second writer that observed the old next_run loses.
        assert!(!s.advance(id, t0(), t0(), next + Duration::minutes(5)).unwrap());

        let sched = s.get(id).unwrap();
        assert_eq!(sched.next_run, Some(next));
        assert_eq!(sched.last_run, Some(t0()));
    }

    #[test]
    fn cron_change_clears_next_run() {
        let s = store();
        let id = s.create(&new_schedule(1), t0()).unwrap().id;
        s.seed(id, t0()).unwrap();
        let patch = SchedulePatch {
            cron_expression: Some("0 3 * * *".into()),
            ..Default::default()
        };
        let sched = s.update(id, &patch).unwrap();
        assert_eq!(sched.cron_expression, "0 3 * * *");
        assert_eq!(sched.next_run, None);
    }

    #[test]
    fn logs_filter_and_order() {
        let s = store();
        let a = s.create(&new_schedule(1), t0()).unwrap().id;
        let b = s.create(&new_schedule(2), t0()).unwrap().id;
        s.append_log(a, LogStatus::Queued, "first", t0()).unwrap();
        s.append_log(b, LogStatus::Error, "boom", t0()).unwrap();
        s.append_log(a, LogStatus::NoServer, "later", t0() + Duration::minutes(1))
            .unwrap();

        let for_a = s.logs(Some(a)).unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].status, LogStatus::NoServer);
        assert_eq!(s.logs(None).unwrap().len(), 3);
    }

    #[test]
    fn unreadable_log_row_is_an_error() {
        let s = store();
        let id = s.create(&new_schedule(1), t0()).unwrap().id;
        s.append_log(id, LogStatus::Queued, "fine", t0()).unwrap();
        s.conn()
            .execute(
                "INSERT INTO schedule_logs (schedule_id, timestamp, status, message)
                 VALUES (?1, ?2, 'BOGUS', 'written by hand')",
                params![id, to_db(t0())],
            )
            .unwrap();

        assert!(matches!(
            s.logs(Some(id)),
            Err(SchedulerError::Database(rusqlite::Error::FromSqlConversionFailure(3, _, _)))
        ));
    }

    #[test]
    fn missing_schedule_is_not_found() {
        let s = store();
        assert!(matches!(s.get(42), Err(SchedulerError::ScheduleNotFound { id: 42 })));
        assert!(matches!(s.delete(42), Err(SchedulerError::ScheduleNotFound { .. })));
    }

    #[test]
    fn server_upsert_and_gate() {
        let s = store();
        assert!(!s.has_workflow_server().unwrap());
        let srv = NewServer {
            name: "gap-01".into(),
            is_active: true,
            allow_workflows: false,
        };
        s.upsert_server(&srv, t0()).unwrap();
        assert!(!s.has_workflow_server().unwrap());

        let srv = NewServer { allow_workflows: true, ..srv };
        let row = s.upsert_server(&srv, t0()).unwrap();
        assert!(row.allow_workflows);
        assert!(s.has_workflow_server().unwrap());
        assert_eq!(s.servers().unwrap().len(), 1);
    }
}
