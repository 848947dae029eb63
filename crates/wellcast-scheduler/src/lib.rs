//! `wellcast-scheduler`: cron-driven workflow dispatch with SQLite persistence.
//!
//! # Overview
//!
//! Schedules live in the `schedules` table of a shared SQLite connection.
//! Each [`runner::SchedulerRunner`] pass fixes `now` once, seeds `next_run`
//! on schedules that never had one, then dispatches every active schedule
//! whose `next_run` has arrived as a `worker.run_workflow` task and moves
//! its `next_run` forward with a compare-and-set.
//!
//! Passes are started either by `POST /workflows/run-schedules/` or by the
//! in-process [`beat::Beat`] loop.
//!
//! | Table           | Written by                                      |
//! |-----------------|-------------------------------------------------|
//! | `schedules`     | admin API (definition), runner (`next_run`/`last_run`) |
//! | `schedule_logs` | runner, one row per decision                    |
//! | `runs`          | runner and manual runs; workers and cancel update status |
//! | `servers`       | admin API; gates dispatch when enabled          |

pub mod beat;
pub mod control;
pub mod cron;
pub mod db;
pub mod error;
pub mod ledger;
pub mod runner;
pub mod store;
pub mod types;

pub use beat::Beat;
pub use control::{CancelAction, CancelOutcome, TaskManager};
pub use crate::cron::CronEvaluator;
pub use error::{Result, SchedulerError};
pub use ledger::RunLedger;
pub use runner::SchedulerRunner;
pub use store::ScheduleStore;
pub use types::{
    DispatchResult, LogStatus, NewSchedule, NewServer, Run, RunReport, RunStatus, Schedule,
    ScheduleLog, SchedulePatch, Server,
};
