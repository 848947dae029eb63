use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::runner::SchedulerRunner;

/// Periodic trigger for [`SchedulerRunner::run_due`].
///
/// Stands in for an external cron hitting `POST /workflows/run-schedules/`.
/// Both may be active at once; the runner tolerates overlapping passes.
pub struct Beat {
    runner: Arc<SchedulerRunner>,
    interval: Duration,
}

impl Beat {
    pub fn new(runner: Arc<SchedulerRunner>, interval: Duration) -> Self {
        Self { runner, interval }
    }

    /// Run passes until `shutdown` flips to `true` or its sender is dropped.
    /// The first pass runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "scheduler beat started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.runner.run_due().await {
                        Ok(results) => debug!(results = results.len(), "scheduler beat pass"),
                        Err(e) => error!("scheduler beat pass failed: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again; treat it as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler beat shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{Duration as ChronoDuration, Utc};
    use rusqlite::Connection;
    use wellcast_broker::{MemoryBroker, QueueBroker, TaskDispatcher};
    use wellcast_core::config::{BrokerConfig, SchedulerConfig};

    use crate::cron::CronEvaluator;
    use crate::ledger::RunLedger;
    use crate::store::ScheduleStore;
    use crate::types::NewSchedule;

    fn runner(broker: Arc<MemoryBroker>) -> (ScheduleStore, Arc<SchedulerRunner>) {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let store = ScheduleStore::new(conn.clone()).unwrap();
        let runner = Arc::new(SchedulerRunner::new(
            store.clone(),
            RunLedger::new(conn).unwrap(),
            Arc::new(TaskDispatcher::new(broker, &BrokerConfig::default())),
            CronEvaluator::from_name("UTC").unwrap(),
            &SchedulerConfig::default(),
        ));
        (store, runner)
    }

    #[tokio::test]
    async fn beat_dispatches_then_stops_on_shutdown() {
        let broker = Arc::new(MemoryBroker::new());
        let (store, runner) = runner(broker.clone());

        let id = store
            .create(
                &NewSchedule {
                    workflow_id: 1,
                    cron_expression: "* * * * *".into(),
                    is_active: true,
                    created_by: None,
                },
                Utc::now(),
            )
            .unwrap()
            .id;
        // Pretend it was seeded long ago so the first beat finds it due.
        store.seed(id, Utc::now() - ChronoDuration::minutes(5)).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Beat::new(runner, Duration::from_secs(3600)).run(rx));

        for _ in 0..100 {
            if broker.len("workflows").await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.len("workflows").await.unwrap(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("beat did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn beat_stops_when_shutdown_sender_is_dropped() {
        let (_, runner) = runner(Arc::new(MemoryBroker::new()));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Beat::new(runner, Duration::from_secs(3600)).run(rx));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("beat kept running without a shutdown sender")
            .unwrap();
    }
}
