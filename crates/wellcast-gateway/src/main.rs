use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};
use wellcast_broker::{Broker, MemoryBroker, RedisBroker, TaskDispatcher};
use wellcast_core::config::{BrokerKind, WellcastConfig};
use wellcast_gateway::{build_router, AppState};
use wellcast_scheduler::{Beat, CronEvaluator, RunLedger, ScheduleStore, SchedulerRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wellcast_gateway=info,wellcast_scheduler=info,wellcast_broker=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // load config: WELLCAST_CONFIG env > ~/.wellcast/wellcast.toml
    let config_path = std::env::var("WELLCAST_CONFIG").ok();
    let config = WellcastConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        WellcastConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let conn = Arc::new(Mutex::new(db));

    let broker: Arc<dyn Broker> = match config.broker.kind {
        BrokerKind::Redis => {
            info!(url = %config.broker.url, "using Redis broker");
            Arc::new(RedisBroker::new(
                &config.broker.url,
                Duration::from_millis(config.broker.timeout_ms),
                &config.broker.control_channel,
            )?)
        }
        BrokerKind::Memory => {
            warn!("using in-memory broker; queued tasks are lost on restart");
            Arc::new(MemoryBroker::new())
        }
    };
    // Connection is lazy; an unreachable broker only degrades endpoints.
    if let Err(e) = broker.ensure_connected().await {
        warn!(error = %e, "broker not reachable at startup");
    }

    let cron = CronEvaluator::from_name(&config.scheduler.timezone)?;
    let runner = Arc::new(SchedulerRunner::new(
        ScheduleStore::new(conn.clone())?,
        RunLedger::new(conn)?,
        Arc::new(TaskDispatcher::new(broker.clone(), &config.broker)),
        cron,
        &config.scheduler,
    ));
    info!(timezone = %config.scheduler.timezone, "scheduler ready");

    // spawn beat loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if config.scheduler.beat_enabled {
        let beat = Beat::new(
            runner.clone(),
            Duration::from_secs(config.scheduler.beat_interval_secs.max(1)),
        );
        tokio::spawn(async move { beat.run(shutdown_rx).await });
    } else {
        info!("beat loop disabled; passes run only via POST /workflows/run-schedules/");
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(AppState::new(config, broker, runner));
    let router = build_router(state);

    info!("Wellcast gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // signal beat loop to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
