use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `schedules`, `schedule_logs`, `runs` and `servers` tables
/// (idempotent). Timestamps are UTC RFC 3339 strings at second precision,
/// so `next_run <= ?` compares correctly as text.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow_id     INTEGER NOT NULL,
            cron_expression TEXT    NOT NULL,
            next_run        TEXT,               -- NULL until seeded
            last_run        TEXT,
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_by      TEXT,
            created_at      TEXT    NOT NULL
        ) STRICT;

        -- Due scan: WHERE is_active = 1 AND next_run <= ?
        CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (is_active, next_run);

        CREATE TABLE IF NOT EXISTS schedule_logs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id INTEGER NOT NULL REFERENCES schedules (id) ON DELETE CASCADE,
            timestamp   TEXT    NOT NULL,
            status      TEXT    NOT NULL,
            message     TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedule_logs_schedule
            ON schedule_logs (schedule_id, timestamp DESC);

        CREATE TABLE IF NOT EXISTS runs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow_id INTEGER NOT NULL,
            schedule_id INTEGER REFERENCES schedules (id) ON DELETE SET NULL,
            task_id     TEXT,
            started_at  TEXT    NOT NULL,
            finished_at TEXT,
            status      TEXT    NOT NULL DEFAULT 'QUEUED',
            output      TEXT,
            error       TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_task ON runs (task_id);
        CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs (workflow_id, started_at DESC);

        CREATE TABLE IF NOT EXISTS servers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT    NOT NULL UNIQUE,
            is_active       INTEGER NOT NULL DEFAULT 1,
            allow_workflows INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Canonical stored form of an instant.
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Read a nullable timestamp column.
pub(crate) fn ts_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

/// Read a non-null timestamp column.
pub(crate) fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    ts_opt(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "timestamp".to_string(),
        Type::Null,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn stored_form_sorts_chronologically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(to_db(b), "2026-01-10T00:00:00Z");
        assert!(to_db(a) < to_db(b));
    }
}
