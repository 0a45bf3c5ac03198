//! Shared scenario harness: a dispatcher over local collaborators and a frozen clock.

#![allow(dead_code)]

use std::sync::Arc;

use aafs_core::{AafsConfig, ConfigHandle, IntakeRegion, Rupture, ServerClock};
use aafs_scheduler::context::Services;
use aafs_scheduler::payload::{self, AnalystIntervene};
use aafs_scheduler::task::SUBID_CLI;
use aafs_scheduler::{
    Dispatcher, GenericRjEngine, LogEntry, MemoryEventSource, MemoryProvider, MemoryStore, NewTask, Opcode,
    OutboxPublisher, PendingTask, SqliteProvider, Store, StoreProvider, TaskQuery, TimelineStatus,
};

pub const LAG_1: i64 = 1_200_000;
pub const LAG_2: i64 = 3_600_000;
pub const LAG_3: i64 = 10_800_000;

pub fn config() -> AafsConfig {
    let mut config = AafsConfig::default();
    let action = &mut config.action;
    action.forecast_lags = vec![LAG_1, LAG_2, LAG_3];
    action.comcat_clock_skew = 0;
    action.comcat_origin_skew = 0;
    action.comcat_retry_lags = vec![300_000, 900_000];
    action.comcat_intake_lags = vec![60_000, 600_000];
    action.pdl_report_retry_lags = vec![0, 300_000, 1_800_000];
    action.intake_regions = vec![IntakeRegion::world(5.0, 4.0)];
    config.dispatcher.restart_delay_min = 1;
    config.dispatcher.restart_delay_max = 5;
    config.dispatcher.poll_delay = 5;
    config
}

pub fn rupture(id: &str, time: i64, mag: f64) -> Rupture {
    Rupture::new(id, time, 35.77, -117.6, 8.0, mag)
}

pub struct World {
    pub provider: Arc<dyn StoreProvider>,
    pub store: Arc<dyn Store>,
    pub source: Arc<MemoryEventSource>,
    pub publisher: Arc<OutboxPublisher>,
    pub clock: Arc<ServerClock>,
    pub config: Arc<ConfigHandle>,
    pub dispatcher: Dispatcher,
}

impl World {
    pub fn memory(config: AafsConfig, start: i64) -> Self {
        let provider = Arc::new(MemoryProvider::new(Arc::new(MemoryStore::new())));
        Self::with_provider(provider, config, start)
    }

    pub fn sqlite(path: &std::path::Path, config: AafsConfig, start: i64) -> Self {
        Self::with_provider(Arc::new(SqliteProvider::new(path)), config, start)
    }

    pub fn with_provider(provider: Arc<dyn StoreProvider>, config: AafsConfig, start: i64) -> Self {
        let store = provider.connect().expect("connect");
        let source = Arc::new(MemoryEventSource::default());
        let publisher = Arc::new(OutboxPublisher::in_memory(b"scenario".to_vec()));
        let clock = Arc::new(ServerClock::frozen(start));
        let config = Arc::new(ConfigHandle::new(config));
        let services = Services {
            source: source.clone(),
            engine: Arc::new(GenericRjEngine::default()),
            publisher: publisher.clone(),
        };
        let dispatcher = Dispatcher::new(provider.clone(), config.clone(), clock.clone(), services);
        Self {
            provider,
            store,
            source,
            publisher,
            clock,
            config,
            dispatcher,
        }
    }

    pub fn submit(&self, task: NewTask) {
        assert!(self.store.submit(task).expect("submit"));
    }

    pub fn intake(&self, event_id: &str, sched_time: i64) {
        self.submit(NewTask::new(event_id, Opcode::IntakeSync, sched_time, sched_time, SUBID_CLI));
    }

    pub fn analyst(&self, event_id: &str, time: i64, request: &AnalystIntervene) {
        self.submit(
            NewTask::new(event_id, Opcode::AnalystIntervene, time, time, SUBID_CLI)
                .with_details(payload::encode(request)),
        );
    }

    /// Run the next task; false when the queue is empty.
    pub async fn step(&self) -> bool {
        self.dispatcher.run_next_task().await.expect("dispatch")
    }

    /// Run every task due at or before `time`.
    pub async fn run_until(&self, time: i64) -> usize {
        let mut ran = 0;
        loop {
            let due = self
                .store
                .query_tasks(&TaskQuery {
                    exec_to: Some(time),
                    ..TaskQuery::default()
                })
                .expect("query");
            if due.is_empty() {
                break;
            }
            assert!(self.step().await);
            ran += 1;
        }
        self.clock.advance_frozen(time);
        ran
    }

    pub fn status(&self, timeline_id: &str) -> TimelineStatus {
        let entry = self.store.latest_timeline(timeline_id).expect("query").expect("timeline");
        TimelineStatus::from_entry(&entry).expect("status")
    }

    pub fn queued(&self, event_id: &str) -> Vec<PendingTask> {
        self.store.query_tasks(&TaskQuery::for_event(event_id)).expect("query")
    }

    pub fn logs(&self, event_id: &str) -> Vec<LogEntry> {
        self.store.logs_for_event(event_id).expect("logs")
    }
}
