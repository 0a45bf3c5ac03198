//! # AAFS Scheduler
//!
//! Persistent task queue, dispatcher, and per-event timeline state machine
//! for automatic aftershock forecasting.
//!
//! ## Design Principles
//! - One durable store shared by every dispatcher process
//! - Atomic activation: at most one task is active at any instant
//! - Every task has a stable key, so a crashed run is recognized and finished
//! - Handlers never escape an error except a store failure
//!
//! ## Architecture
//! ```text
//! CLI / poll / feed ──submit──▶ Store (pending tasks)
//!                                  │ activate_first_ready
//!                                  ▼
//!                             Dispatcher ──▶ HandlerRegistry
//!                                  │            ├── intake-sync / intake-pdl
//!                                  │            ├── analyst-intervene
//!                                  │            ├── generate-forecast ──▶ EventSource, ForecastEngine
//!                                  │            ├── generate-report   ──▶ PublicationChannel
//!                                  │            ├── generate-expire
//!                                  │            └── control (shutdown, console, poll)
//!                                  ▼
//!                      Disposition: delete | stage | log
//!
//! Timeline (append-only) ◀── one entry per transition ──▶ next chained task
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod local;
pub mod memory;
pub mod outcome;
pub mod payload;
pub mod persistence;
pub mod publish;
pub mod schedule;
pub mod store;
pub mod support;
pub mod task;
pub mod timeline;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use context::{DispatchContext, Services};
pub use dispatcher::{Dispatcher, DispatcherState, DispatcherStatus};
pub use error::{DispatchError, StoreError, StoreResult, TaskError};
pub use handlers::{Handler, HandlerRegistry};
pub use local::{GenericRjEngine, MemoryEventSource, OutboxPublisher};
pub use memory::{MemoryProvider, MemoryStore};
pub use outcome::{Disposition, ResultCode};
pub use persistence::{SqliteProvider, SqliteStore};
pub use publish::{Product, PublicationChannel, PublicationError};
pub use store::{Claim, LogEntry, Store, StoreProvider, TaskQuery, TimelineEntry};
pub use task::{NewTask, Opcode, PendingTask};
pub use timeline::{ActionCode, FcStatus, PdlStatus, TimelineStatus};
pub use upstream::{EventSource, ForecastEngine, UpstreamError};
