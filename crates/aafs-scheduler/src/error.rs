//! Error tiers for the scheduler.
//!
//! [`StoreError`] is infrastructure failure: it is the only error a handler
//! may return, and it makes the dispatcher drop its connection and restart.
//! [`TaskError`] is handler-local and is always turned into a result code.

/// Durable store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stored record is malformed: {0}")]
    Malformed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate timeline entry for {event_id} at {action_time}")]
    DuplicateTimeline { event_id: String, action_time: i64 },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Handler-local failure, converted to a result code before the handler returns.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task payload is corrupt: {0}")]
    TaskCorrupt(String),

    #[error("Timeline snapshot is corrupt: {0}")]
    TimelineCorrupt(String),
}

/// Reasons the dispatcher abandons its current store connection.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Task {key} exceeded the {timeout_ms} ms watchdog")]
    Watchdog { key: String, timeout_ms: i64 },
}
