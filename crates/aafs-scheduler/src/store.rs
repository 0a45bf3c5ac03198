//! Durable store contract.
//!
//! The dispatcher and handlers see the store only through [`Store`]. Its one
//! concurrency-critical operation is [`Store::activate_first_ready`], which
//! must be atomic across every process sharing the store: at most one task
//! is active at any instant, and two callers never receive the same task.

use std::sync::Arc;

use aafs_core::Rupture;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::outcome::ResultCode;
use crate::task::{NewTask, Opcode, PendingTask};
use crate::timeline::ActionCode;

/// Who is activating, and for how long the activation is theirs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub owner: String,
    /// True time of the activation attempt.
    pub true_time: i64,
    /// Lease length in milliseconds.
    pub lease: i64,
}

impl Claim {
    pub fn lease_until(&self) -> i64 {
        self.true_time.saturating_add(self.lease)
    }
}

/// Task range query. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub event_id: Option<String>,
    /// Inclusive lower bound on `exec_time`.
    pub exec_from: Option<i64>,
    /// Inclusive upper bound on `exec_time`.
    pub exec_to: Option<i64>,
    pub opcodes: Vec<i32>,
    pub waiting_only: bool,
}

impl TaskQuery {
    pub fn for_event(event_id: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            ..Self::default()
        }
    }

    pub fn with_opcodes(mut self, opcodes: &[Opcode]) -> Self {
        self.opcodes = opcodes.iter().map(|op| op.code()).collect();
        self
    }

    pub fn waiting(mut self) -> Self {
        self.waiting_only = true;
        self
    }

    pub fn matches(&self, task: &PendingTask) -> bool {
        if let Some(event_id) = &self.event_id {
            if &task.event_id != event_id {
                return false;
            }
        }
        if self.exec_from.is_some_and(|from| task.exec_time < from) {
            return false;
        }
        if self.exec_to.is_some_and(|to| task.exec_time > to) {
            return false;
        }
        if !self.opcodes.is_empty() && !self.opcodes.contains(&task.opcode) {
            return false;
        }
        !(self.waiting_only && task.active)
    }
}

/// Write-once record of how a task was disposed of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub event_id: String,
    pub opcode: i32,
    pub stage: i32,
    pub submit_id: String,
    pub log_time: i64,
    pub rescode: i32,
    pub remark: String,
}

impl LogEntry {
    pub fn for_task(task: &PendingTask, log_time: i64, code: ResultCode, remark: impl Into<String>) -> Self {
        Self {
            key: task.record_key.clone(),
            event_id: task.event_id.clone(),
            opcode: task.opcode,
            stage: task.stage,
            submit_id: task.submit_id.clone(),
            log_time,
            rescode: code.code(),
            remark: remark.into(),
        }
    }

    pub fn result_code(&self) -> Option<ResultCode> {
        ResultCode::from_code(self.rescode)
    }
}

/// Immutable timeline record. `details` holds a serialized timeline status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Record key of the task that wrote the entry.
    pub key: String,
    pub event_id: String,
    /// Strictly increasing per event.
    pub action_time: i64,
    pub actcode: ActionCode,
    pub details: String,
}

/// Aftershock catalog used by one forecast, keyed by the forecasting task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub key: String,
    pub event_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub ruptures: Vec<Rupture>,
}

/// Operations the scheduler requires of its persistent store.
pub trait Store: Send + Sync {
    // ─── Tasks ────────────────────────────────────────────────

    /// Queue a waiting task. Returns false if its key is already queued.
    fn submit(&self, task: NewTask) -> StoreResult<bool>;

    /// Atomically activate the next task.
    ///
    /// An active task owned by `claim.owner`, or whose lease has lapsed, is
    /// re-activated with its attempt count bumped (a restart). Any other
    /// active task blocks activation. Otherwise the waiting task with the
    /// least `exec_time <= cutoff` is activated, ties broken by submission order.
    fn activate_first_ready(&self, cutoff: i64, claim: &Claim) -> StoreResult<Option<PendingTask>>;

    /// Return an active task to waiting with a new execution time and stage.
    fn stage(&self, task: &PendingTask, exec_time: i64, stage: i32) -> StoreResult<()>;

    /// Remove a task, active or not. Missing tasks are ignored.
    fn delete(&self, task: &PendingTask) -> StoreResult<()>;

    /// Tasks matching the query, in execution order.
    fn query_tasks(&self, query: &TaskQuery) -> StoreResult<Vec<PendingTask>>;

    // ─── Log ──────────────────────────────────────────────────

    fn append_log(&self, entry: &LogEntry) -> StoreResult<()>;
    fn log_for_key(&self, key: &str) -> StoreResult<Option<LogEntry>>;
    fn logs_for_event(&self, event_id: &str) -> StoreResult<Vec<LogEntry>>;

    // ─── Timeline ─────────────────────────────────────────────

    /// Append an entry; a second entry at the same (event, action_time) is rejected.
    fn append_timeline(&self, entry: &TimelineEntry) -> StoreResult<()>;
    fn latest_timeline(&self, event_id: &str) -> StoreResult<Option<TimelineEntry>>;
    fn timeline_for_key(&self, key: &str) -> StoreResult<Option<TimelineEntry>>;
    /// All entries for an event, oldest first.
    fn timeline_history(&self, event_id: &str) -> StoreResult<Vec<TimelineEntry>>;

    // ─── Catalog snapshots ────────────────────────────────────

    fn put_catalog(&self, snapshot: &CatalogSnapshot) -> StoreResult<()>;
    fn catalog_for_key(&self, key: &str) -> StoreResult<Option<CatalogSnapshot>>;
    fn delete_catalog(&self, key: &str) -> StoreResult<usize>;

    // ─── Aliases ──────────────────────────────────────────────

    /// Map an external event id to a timeline id.
    fn put_alias(&self, external_id: &str, timeline_id: &str, time: i64) -> StoreResult<()>;
    fn resolve_alias(&self, external_id: &str) -> StoreResult<Option<String>>;
}

/// Opens store connections; the dispatcher reconnects through it after a failure.
pub trait StoreProvider: Send + Sync {
    fn connect(&self) -> StoreResult<Arc<dyn Store>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SUBID_CLI;

    #[test]
    fn test_query_matching() {
        let mut task = NewTask::new("ev1", Opcode::GenForecast, 500, 0, SUBID_CLI).into_pending();
        let q = TaskQuery::for_event("ev1").with_opcodes(&Opcode::DELAYED_TIMELINE).waiting();
        assert!(q.matches(&task));

        task.active = true;
        assert!(!q.matches(&task));
        assert!(TaskQuery::for_event("ev1").matches(&task));
        assert!(!TaskQuery::for_event("ev2").matches(&task));

        let range = TaskQuery {
            exec_from: Some(100),
            exec_to: Some(400),
            ..TaskQuery::default()
        };
        assert!(!range.matches(&task));
    }

    #[test]
    fn test_claim_lease_saturates() {
        let claim = Claim {
            owner: "a".into(),
            true_time: i64::MAX - 1,
            lease: 10,
        };
        assert_eq!(claim.lease_until(), i64::MAX);
    }
}
