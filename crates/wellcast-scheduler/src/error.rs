use thiserror::Error;
use wellcast_broker::BrokerError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cron expression does not parse or never fires.
    #[error("Malformed schedule '{expression}': {reason}")]
    MalformedSchedule { expression: String, reason: String },

    /// The configured evaluation timezone is not a known IANA zone.
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    /// No schedule with the given ID exists in the store.
    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: i64 },

    /// Queue or worker-control failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
