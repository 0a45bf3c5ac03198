//! Fixtures for unit tests: a compact schedule and in-memory collaborators.

use std::sync::Arc;

use aafs_core::{AafsConfig, IntakeRegion, Rupture};

use crate::context::{DispatchContext, Services};
use crate::local::{GenericRjEngine, MemoryEventSource, OutboxPublisher};
use crate::memory::MemoryStore;
use crate::task::{NewTask, Opcode, PendingTask, SUBID_AAFS};

/// Short schedule with no clock skew, so forecasts land exactly at mainshock + lag.
pub fn test_config() -> AafsConfig {
    let mut config = AafsConfig::default();
    let action = &mut config.action;
    action.forecast_lags = vec![1_200_000, 3_600_000, 10_800_000];
    action.forecast_min_gap = 300_000;
    action.comcat_clock_skew = 0;
    action.comcat_origin_skew = 0;
    action.comcat_retry_lags = vec![300_000, 900_000];
    action.comcat_intake_lags = vec![60_000, 600_000];
    action.pdl_report_retry_lags = vec![0, 300_000, 1_800_000];
    action.intake_regions = vec![IntakeRegion::world(5.0, 4.0)];
    config
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<MemoryEventSource>,
    pub publisher: Arc<OutboxPublisher>,
    pub config: Arc<AafsConfig>,
}

impl Harness {
    pub fn new(config: AafsConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            source: Arc::new(MemoryEventSource::default()),
            publisher: Arc::new(OutboxPublisher::in_memory(b"test-key".to_vec())),
            config: Arc::new(config),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            source: self.source.clone(),
            engine: Arc::new(GenericRjEngine::default()),
            publisher: self.publisher.clone(),
        }
    }

    pub fn ctx_at(&self, time: i64) -> DispatchContext {
        DispatchContext::new(self.store.clone(), time, time, self.config.clone(), self.services())
    }
}

pub fn context_at(time: i64, config: AafsConfig) -> (DispatchContext, Arc<MemoryStore>) {
    let harness = Harness::new(config);
    (harness.ctx_at(time), harness.store)
}

/// A task as the dispatcher hands it to a handler on its first activation.
pub fn activated(task: NewTask) -> PendingTask {
    let mut task = task.into_pending();
    task.active = true;
    task.attempt = 1;
    task
}

pub fn task_for(event_id: &str, opcode: Opcode, time: i64, details: String) -> PendingTask {
    activated(NewTask::new(event_id, opcode, time, time, SUBID_AAFS).with_details(details))
}

pub fn mainshock(event_id: &str, time: i64, mag: f64) -> Rupture {
    Rupture::new(event_id, time, 35.77, -117.6, 8.0, mag)
}
