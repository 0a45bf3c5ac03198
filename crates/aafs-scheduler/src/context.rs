//! Per-task dispatch context.
//!
//! Built by the dispatcher once per task: the store connection, both clocks
//! as they read when the task was activated, the configuration snapshot, and
//! the external services. Handlers read everything they need from here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use aafs_core::{AafsConfig, ActionConfig};

use crate::outcome::{Disposition, ResultCode};
use crate::publish::PublicationChannel;
use crate::store::Store;
use crate::upstream::{EventSource, ForecastEngine};

/// External collaborators.
#[derive(Clone)]
pub struct Services {
    pub source: Arc<dyn EventSource>,
    pub engine: Arc<dyn ForecastEngine>,
    pub publisher: Arc<dyn PublicationChannel>,
}

pub struct DispatchContext {
    pub store: Arc<dyn Store>,
    /// Dispatch time: all scheduling arithmetic uses this.
    pub time: i64,
    /// Wall-clock time.
    pub true_time: i64,
    pub config: Arc<AafsConfig>,
    pub services: Services,
    shutdown: Arc<AtomicBool>,
}

impl DispatchContext {
    pub fn new(
        store: Arc<dyn Store>,
        time: i64,
        true_time: i64,
        config: Arc<AafsConfig>,
        services: Services,
    ) -> Self {
        Self {
            store,
            time,
            true_time,
            config,
            services,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share the dispatcher's shutdown flag.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn action(&self) -> &ActionConfig {
        &self.config.action
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Log `code` at the current dispatch time, then delete the task.
    pub fn log(&self, code: ResultCode, remark: impl Into<String>) -> Disposition {
        Disposition::Log {
            code,
            log_time: self.time,
            remark: remark.into(),
        }
    }

    /// Log `code`, also echoing the remark to the operator log.
    pub fn log_warn(&self, code: ResultCode, remark: impl Into<String>) -> Disposition {
        let remark = remark.into();
        tracing::warn!("⚠️ {}: {}", code, remark);
        self.log(code, remark)
    }
}
