use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use wellcast_broker::{TaskDispatcher, TaskHandle};
use wellcast_core::config::SchedulerConfig;

use crate::cron::CronEvaluator;
use crate::error::Result;
use crate::ledger::RunLedger;
use crate::store::ScheduleStore;
use crate::types::{DispatchResult, LogStatus, Schedule};

/// Decides which schedules fire and dispatches them.
///
/// A pass is stateless between calls, so the HTTP trigger and the beat loop
/// share one instance and may overlap. Overlapping passes can both enqueue
/// the same due schedule (at-least-once delivery); only one of them moves
/// `next_run`, because [`ScheduleStore::advance`] is a compare-and-set on
/// the `next_run` both passes observed.
pub struct SchedulerRunner {
    store: ScheduleStore,
    ledger: RunLedger,
    dispatcher: Arc<TaskDispatcher>,
    cron: CronEvaluator,
    workflow_task: String,
    require_server: bool,
}

impl SchedulerRunner {
    pub fn new(
        store: ScheduleStore,
        ledger: RunLedger,
        dispatcher: Arc<TaskDispatcher>,
        cron: CronEvaluator,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            dispatcher,
            cron,
            workflow_task: config.workflow_task.clone(),
            require_server: config.require_workflow_server,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn cron(&self) -> &CronEvaluator {
        &self.cron
    }

    /// One full pass at the current time.
    pub async fn run_due(&self) -> Result<Vec<DispatchResult>> {
        self.run_due_at(Utc::now()).await
    }

    /// One full pass with `now` fixed for every decision in it.
    ///
    /// Errors only when the store cannot be scanned at all; per-schedule
    /// failures are logged and reported in the returned list.
    pub async fn run_due_at(&self, now: DateTime<Utc>) -> Result<Vec<DispatchResult>> {
        self.seed_pass(now)?;

        let due = self.store.due(now)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let server_ready = !self.require_server || self.store.has_workflow_server()?;
        let mut results = Vec::with_capacity(due.len());
        for sched in due {
            if !server_ready {
                self.log(sched.id, LogStatus::NoServer, "No servers available for workflows", now);
                results.push(DispatchResult {
                    schedule_id: sched.id,
                    task_id: None,
                    status: LogStatus::NoServer,
                    error: None,
                    workflow_id: sched.workflow_id,
                    duplicate: false,
                });
                continue;
            }
            results.push(self.dispatch(&sched, now).await);
        }

        let queued = results
            .iter()
            .filter(|r| r.status == LogStatus::Queued)
            .count();
        info!(due = results.len(), queued, "scheduler pass complete");
        Ok(results)
    }

    /// Give every active, never-seeded schedule its first `next_run`.
    /// Running it again before any dispatch changes nothing.
    pub fn seed_pass(&self, now: DateTime<Utc>) -> Result<()> {
        for sched in self.store.unseeded()? {
            match self.cron.next_trigger(&sched.cron_expression, now) {
                Ok(next) => {
                    if let Err(e) = self.store.seed(sched.id, next) {
                        error!(schedule_id = sched.id, error = %e, "seeding next_run failed");
                        self.log(sched.id, LogStatus::Error, &format!("Exception setting next_run: {e}"), now);
                    }
                }
                Err(e) => {
                    warn!(schedule_id = sched.id, error = %e, "cannot seed schedule");
                    self.log(sched.id, LogStatus::Error, &format!("Exception setting next_run: {e}"), now);
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, sched: &Schedule, now: DateTime<Utc>) -> DispatchResult {
        let mut result = DispatchResult {
            schedule_id: sched.id,
            task_id: None,
            status: LogStatus::Error,
            error: None,
            workflow_id: sched.workflow_id,
            duplicate: false,
        };

        // Only due rows get here, and due rows always carry next_run.
        let Some(expected) = sched.next_run else {
            return result;
        };

        // Evaluate before enqueueing so a broken expression never dispatches.
        let next = match self.cron.next_trigger(&sched.cron_expression, now) {
            Ok(next) => next,
            Err(e) => return self.fail(result, format!("Exception: {e}"), now),
        };

        let args = [json!(sched.workflow_id), json!(sched.id)];
        let handle = match self.dispatcher.enqueue(&self.workflow_task, &args, None).await {
            Ok(h) => h,
            Err(e) => return self.fail(result, format!("Exception: {e}"), now),
        };
        result.task_id = Some(handle.id.clone());

        // The task is live from here on; record it before anything else can
        // fail so cancel and worker reports always find a run.
        if let Err(e) = self.ledger.record(sched.workflow_id, Some(sched.id), &handle.id, now) {
            warn!(schedule_id = sched.id, task_id = %handle.id, error = %e, "run not recorded");
        }

        let advanced = match self.store.advance(sched.id, expected, now, next) {
            Ok(advanced) => advanced,
            Err(e) => {
                let msg = format!("Task {} queued but schedule update failed: {e}", handle.id);
                return self.fail(result, msg, now);
            }
        };

        let mut msg = format!("Task {} queued for workflow {}", handle.id, sched.workflow_id);
        if !advanced {
            warn!(schedule_id = sched.id, task_id = %handle.id, "schedule already advanced by a concurrent pass");
            msg.push_str(" (schedule already advanced by a concurrent pass)");
        }
        self.log(sched.id, LogStatus::Queued, &msg, now);
        info!(schedule_id = sched.id, task_id = %handle.id, next_run = %next, "schedule dispatched");

        result.status = LogStatus::Queued;
        result.duplicate = !advanced;
        result
    }

    fn fail(&self, mut result: DispatchResult, message: String, now: DateTime<Utc>) -> DispatchResult {
        error!(schedule_id = result.schedule_id, error = %message, "schedule dispatch failed");
        self.log(result.schedule_id, LogStatus::Error, &message, now);
        result.status = LogStatus::Error;
        result.error = Some(message);
        result
    }

    /// Dispatch a schedule's workflow right away, outside its cron cadence.
    ///
    /// The run is recorded without a schedule reference and the schedule's
    /// own `next_run`/`last_run` are left alone.
    pub async fn run_now(&self, schedule_id: i64) -> Result<TaskHandle> {
        let sched = self.store.get(schedule_id)?;
        let handle = self
            .dispatcher
            .enqueue(&self.workflow_task, &[json!(sched.workflow_id)], None)
            .await?;
        self.ledger.record(sched.workflow_id, None, &handle.id, Utc::now())?;
        info!(schedule_id, task_id = %handle.id, "manual run queued");
        Ok(handle)
    }

    /// Audit rows must never abort a pass; a failed write is only traced.
    fn log(&self, schedule_id: i64, status: LogStatus, message: &str, now: DateTime<Utc>) {
        if let Err(e) = self.store.append_log(schedule_id, status, message, now) {
            error!(schedule_id, %status, error = %e, "schedule log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{Duration, TimeZone};
    use rusqlite::Connection;
    use wellcast_broker::{MemoryBroker, QueueBroker};
    use wellcast_core::config::BrokerConfig;

    use crate::types::{NewSchedule, NewServer, RunStatus, SchedulePatch};

    struct Fixture {
        conn: Arc<Mutex<Connection>>,
        broker: Arc<MemoryBroker>,
        runner: SchedulerRunner,
    }

    fn fixture(require_server: bool) -> Fixture {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let broker = Arc::new(MemoryBroker::new());
        let dispatcher = Arc::new(TaskDispatcher::new(broker.clone(), &BrokerConfig::default()));
        let config = SchedulerConfig {
            timezone: "UTC".into(),
            require_workflow_server: require_server,
            ..SchedulerConfig::default()
        };
        let runner = SchedulerRunner::new(
            ScheduleStore::new(conn.clone()).unwrap(),
            RunLedger::new(conn.clone()).unwrap(),
            dispatcher,
            CronEvaluator::from_name("UTC").unwrap(),
            &config,
        );
        Fixture { conn, broker, runner }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 20).unwrap()
    }

    fn add(f: &Fixture, workflow_id: i64, cron: &str) -> i64 {
        f.runner
            .store()
            .create(
                &NewSchedule {
                    workflow_id,
                    cron_expression: cron.into(),
                    is_active: true,
                    created_by: None,
                },
                t0() - Duration::days(1),
            )
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn seed_pass_is_idempotent() {
        let f = fixture(false);
        let id = add(&f, 1, "0 * * * *");

        f.runner.seed_pass(t0()).unwrap();
        let first = f.runner.store().get(id).unwrap().next_run;
        assert_eq!(first, Some(Utc.with_ymd_and_hms(2026, 4, 10, 10, 0, 0).unwrap()));

        f.runner.seed_pass(t0() + Duration::minutes(30)).unwrap();
        assert_eq!(f.runner.store().get(id).unwrap().next_run, first);
    }

    #[tokio::test]
    async fn malformed_cron_is_logged_and_others_continue() {
        let f = fixture(false);
        let bad = add(&f, 1, "every tuesday");
        let good = add(&f, 2, "* * * * *");

        // Seed at t0, dispatch a minute later.
        f.runner.run_due_at(t0()).await.unwrap();
        let results = f.runner.run_due_at(t0() + Duration::minutes(1)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].schedule_id, good);
        assert_eq!(results[0].status, LogStatus::Queued);

        let logs = f.runner.store().logs(Some(bad)).unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == LogStatus::Error));
        assert!(logs[0].message.as_deref().unwrap().contains("next_run"));
        assert_eq!(f.runner.store().get(bad).unwrap().next_run, None);
    }

    #[tokio::test]
    async fn broker_outage_is_per_schedule_error() {
        let f = fixture(false);
        let id = add(&f, 4, "* * * * *");
        f.runner.seed_pass(t0()).unwrap();
        let due_at = f.runner.store().get(id).unwrap().next_run.unwrap();

        f.broker.set_offline(true);
        let results = f.runner.run_due_at(due_at).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, LogStatus::Error);
        assert!(results[0].error.as_deref().unwrap().contains("workflows"));
        assert_eq!(results[0].task_id, None);

        // Nothing advanced, so the schedule is retried once the broker is back.
        assert_eq!(f.runner.store().get(id).unwrap().next_run, Some(due_at));
        f.broker.set_offline(false);
        let retry = f.runner.run_due_at(due_at).await.unwrap();
        assert_eq!(retry[0].status, LogStatus::Queued);
    }

    #[tokio::test]
    async fn failed_schedule_update_still_records_run() {
        let f = fixture(false);
        let id = add(&f, 6, "* * * * *");
        f.runner.seed_pass(t0()).unwrap();
        let due_at = f.runner.store().get(id).unwrap().next_run.unwrap();

        // Seeding still works; committing a dispatch does not.
        f.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER schedules_frozen BEFORE UPDATE ON schedules
                 WHEN NEW.last_run IS NOT NULL
                 BEGIN SELECT RAISE(FAIL, 'schedules frozen'); END;",
            )
            .unwrap();

        let results = f.runner.run_due_at(due_at).await.unwrap();
        assert_eq!(results[0].status, LogStatus::Error);
        let task_id = results[0].task_id.clone().expect("queued task id reported");
        assert!(results[0].error.as_deref().unwrap().contains(&task_id));

        assert_eq!(f.broker.len("workflows").await.unwrap(), 1);
        let runs = f.runner.ledger().by_task(&task_id).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].schedule_id, Some(id));
        assert_eq!(runs[0].status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn dispatch_records_run_and_payload() {
        let f = fixture(false);
        let id = add(&f, 11, "*/10 * * * *");
        f.runner.seed_pass(t0()).unwrap();
        let due_at = f.runner.store().get(id).unwrap().next_run.unwrap();

        let results = f.runner.run_due_at(due_at).await.unwrap();
        let task_id = results[0].task_id.clone().unwrap();

        let runs = f.runner.ledger().by_task(&task_id).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].schedule_id, Some(id));
        assert_eq!(runs[0].workflow_id, 11);

        let raw = f.broker.peek("workflows", None).await.unwrap();
        let peeked = wellcast_broker::envelope::peek(&raw[0]).unwrap();
        assert_eq!(peeked.args, format!("[11,{id}]"));

        let sched = f.runner.store().get(id).unwrap();
        assert_eq!(sched.last_run, Some(due_at));
        assert_eq!(sched.next_run, Some(due_at + Duration::minutes(10)));
    }

    #[tokio::test]
    async fn inactive_schedules_are_skipped() {
        let f = fixture(false);
        let id = add(&f, 1, "* * * * *");
        f.runner
            .store()
            .update(id, &SchedulePatch { is_active: Some(false), ..Default::default() })
            .unwrap();
        let results = f.runner.run_due_at(t0() + Duration::hours(1)).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(f.runner.store().get(id).unwrap().next_run, None);
    }

    #[tokio::test]
    async fn no_server_blocks_dispatch_without_advancing() {
        let f = fixture(true);
        let id = add(&f, 1, "* * * * *");
        f.runner.seed_pass(t0()).unwrap();
        let due_at = f.runner.store().get(id).unwrap().next_run.unwrap();

        let results = f.runner.run_due_at(due_at).await.unwrap();
        assert_eq!(results[0].status, LogStatus::NoServer);
        assert_eq!(f.broker.len("workflows").await.unwrap(), 0);
        assert_eq!(f.runner.store().get(id).unwrap().next_run, Some(due_at));
        assert_eq!(f.runner.store().logs(Some(id)).unwrap()[0].status, LogStatus::NoServer);

        f.runner
            .store()
            .upsert_server(
                &NewServer {
                    name: "gap-01".into(),
                    is_active: true,
                    allow_workflows: true,
                },
                t0(),
            )
            .unwrap();
        let results = f.runner.run_due_at(due_at).await.unwrap();
        assert_eq!(results[0].status, LogStatus::Queued);
    }

    #[tokio::test]
    async fn run_now_leaves_schedule_untouched() {
        let f = fixture(false);
        let id = add(&f, 8, "0 0 1 1 *");
        f.runner.seed_pass(t0()).unwrap();
        let before = f.runner.store().get(id).unwrap();

        let handle = f.runner.run_now(id).await.unwrap();
        assert_eq!(handle.queue, "workflows");
        let runs = f.runner.ledger().by_task(&handle.id).unwrap();
        assert_eq!(runs[0].schedule_id, None);
        assert_eq!(runs[0].workflow_id, 8);
        assert_eq!(f.runner.store().get(id).unwrap(), before);

        assert!(f.runner.run_now(999).await.is_err());
    }
}
