use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use wellcast_broker::{Broker, Inspector};
use wellcast_core::WellcastConfig;
use wellcast_scheduler::{RunLedger, ScheduleStore, SchedulerRunner, TaskManager};

use crate::http::{health, runs, schedules, servers, workers};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: WellcastConfig,
    pub broker: Arc<dyn Broker>,
    /// Shared with the beat loop when it is enabled.
    pub runner: Arc<SchedulerRunner>,
    pub inspector: Inspector,
    pub tasks: TaskManager,
}

impl AppState {
    pub fn new(config: WellcastConfig, broker: Arc<dyn Broker>, runner: Arc<SchedulerRunner>) -> Self {
        let inspector = Inspector::new(broker.clone(), &config.broker);
        let tasks = TaskManager::new(broker.clone(), runner.ledger().clone());
        Self {
            config,
            broker,
            runner,
            inspector,
            tasks,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        self.runner.store()
    }

    pub fn ledger(&self) -> &RunLedger {
        self.runner.ledger()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/workflows/run-schedules/", post(schedules::run_schedules))
        .route("/workflows/workers-status/", get(workers::workers_status))
        .route(
            "/workflows/task/{task_id}/",
            axum::routing::delete(workers::cancel_task),
        )
        .route(
            "/workflows/schedules/",
            get(schedules::list).post(schedules::create),
        )
        .route(
            "/workflows/schedules/{id}/",
            get(schedules::get_one)
                .patch(schedules::update)
                .delete(schedules::remove),
        )
        .route(
            "/workflows/schedules/{id}/run_now/",
            post(schedules::run_now),
        )
        .route("/workflows/schedule-logs/", get(schedules::logs))
        .route("/workflows/runs/", get(runs::list))
        .route("/workflows/runs/{task_id}/", patch(runs::report))
        .route("/servers/", get(servers::list).post(servers::register))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
