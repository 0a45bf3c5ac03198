//! Execution handlers, one per opcode family.
//!
//! A handler receives an activated task and its dispatch context, and
//! answers with a [`Disposition`]. Only store failures escape as errors;
//! everything else becomes a result code.

pub mod analyst;
pub mod control;
pub mod forecast;
pub mod intake;
pub mod report;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::DispatchContext;
use crate::error::StoreResult;
use crate::outcome::{Disposition, ResultCode};
use crate::task::{Opcode, PendingTask};
use crate::upstream::UpstreamError;

pub use analyst::AnalystHandler;
pub use control::ControlHandler;
pub use forecast::ForecastHandler;
pub use intake::{IntakePdlHandler, IntakeSyncHandler};
pub use report::{ExpireHandler, ReportHandler};

/// Executes one kind of task.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition>;
}

/// Handlers keyed by opcode.
pub struct HandlerRegistry {
    handlers: HashMap<Opcode, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with a handler for every opcode.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        let control: Arc<dyn Handler> = Arc::new(ControlHandler);
        for op in [
            Opcode::NoOp,
            Opcode::Shutdown,
            Opcode::ConsoleMessage,
            Opcode::PollStart,
            Opcode::PollStop,
            Opcode::PollRun,
        ] {
            reg.register(op, control.clone());
        }
        reg.register(Opcode::GenForecast, Arc::new(ForecastHandler));
        reg.register(Opcode::GenPdlReport, Arc::new(ReportHandler));
        reg.register(Opcode::GenExpire, Arc::new(ExpireHandler));
        reg.register(Opcode::IntakeSync, Arc::new(IntakeSyncHandler));
        reg.register(Opcode::IntakePdl, Arc::new(IntakePdlHandler));
        reg.register(Opcode::AnalystIntervene, Arc::new(AnalystHandler));
        reg
    }

    pub fn register(&mut self, opcode: Opcode, handler: Arc<dyn Handler>) {
        tracing::debug!("🧩 Registered handler: {} → {}", opcode.as_str(), handler.name());
        self.handlers.insert(opcode, handler);
    }

    pub fn get(&self, opcode: Opcode) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&opcode).cloned()
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry an upstream failure on `schedule`, measured from the task's sched time.
///
/// Returns `None` once the schedule is exhausted or the failure is not transient.
pub(crate) fn upstream_retry(
    ctx: &DispatchContext,
    task: &PendingTask,
    err: &UpstreamError,
    schedule: fn(i32, &aafs_core::ActionConfig) -> Option<i64>,
) -> Option<Disposition> {
    if !err.is_transient() {
        return None;
    }
    let lag = schedule(task.stage, ctx.action())?;
    let exec_time = task.sched_time + lag;
    tracing::warn!(
        "🔁 {} for {}: {}; retrying at {}",
        task.summary(),
        task.event_id,
        err,
        exec_time
    );
    Some(Disposition::stage(exec_time, ctx.action().lag_to_stage(lag)))
}

/// Decode a payload, or answer with `TASK_CORRUPT`.
macro_rules! payload_or_corrupt {
    ($ctx:expr, $task:expr) => {
        match crate::payload::decode($task) {
            Ok(payload) => payload,
            Err(e) => return Ok($ctx.log_warn(crate::outcome::ResultCode::TaskCorrupt, e.to_string())),
        }
    };
}
pub(crate) use payload_or_corrupt;

pub(crate) fn unknown_opcode(ctx: &DispatchContext, task: &PendingTask) -> Disposition {
    ctx.log_warn(ResultCode::TaskCorrupt, format!("no handler for {}", task.summary()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_opcode() {
        let reg = HandlerRegistry::with_defaults();
        assert_eq!(reg.count(), Opcode::ALL.len());
        for op in Opcode::ALL {
            assert!(reg.get(op).is_some(), "{}", op.as_str());
        }
        assert_eq!(reg.get(Opcode::GenForecast).map(|h| h.name()), Some("generate-forecast"));
    }
}
