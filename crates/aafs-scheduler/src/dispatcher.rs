//! Task dispatcher: the single-threaded loop that drives everything.
//!
//! Connect to the store, activate the next ready task, run its handler under
//! a watchdog, apply the disposition, repeat. Any store failure (or watchdog
//! expiry) drops the connection; after a backoff the loop reconnects and the
//! task that was in flight comes back as a restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aafs_core::{AafsConfig, ConfigHandle, ServerClock};
use serde::Serialize;

use crate::context::{DispatchContext, Services};
use crate::error::{DispatchError, StoreError, StoreResult};
use crate::handlers::{HandlerRegistry, unknown_opcode};
use crate::outcome::{Disposition, ResultCode};
use crate::store::{Claim, LogEntry, Store, StoreProvider, TaskQuery};
use crate::task::{EVID_SHUTDOWN, EXEC_TIME_FAR_FUTURE, Opcode, PendingTask};

/// Dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    Initial,
    FirstConnect,
    Reconnecting,
    Polling,
    Waiting,
    Processing,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherStatus {
    pub state: DispatcherState,
    /// True time the dispatcher started.
    pub start_time: i64,
    /// True time of the last poll or dispatch.
    pub active_time: i64,
    pub restarts: u32,
    pub tasks_dispatched: u64,
}

pub struct Dispatcher {
    provider: Arc<dyn StoreProvider>,
    config: Arc<ConfigHandle>,
    clock: Arc<ServerClock>,
    services: Services,
    handlers: HandlerRegistry,
    owner: String,
    status: Mutex<DispatcherStatus>,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn StoreProvider>,
        config: Arc<ConfigHandle>,
        clock: Arc<ServerClock>,
        services: Services,
    ) -> Self {
        let owner = config.snapshot().dispatcher.owner.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".into())
        });
        Self {
            provider,
            config,
            clock,
            services,
            handlers: HandlerRegistry::with_defaults(),
            owner,
            status: Mutex::new(DispatcherStatus {
                state: DispatcherState::Initial,
                start_time: 0,
                active_time: 0,
                restarts: 0,
                tasks_dispatched: 0,
            }),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the handler registry.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Identity written into the activation lease.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn status(&self) -> DispatcherStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn update_status(&self, f: impl FnOnce(&mut DispatcherStatus)) {
        if let Ok(mut status) = self.status.lock() {
            f(&mut status);
        }
    }

    fn set_state(&self, state: DispatcherState) {
        let now = self.clock.true_time();
        self.update_status(|s| {
            s.state = state;
            s.active_time = now;
        });
    }

    /// Run until a shutdown task is processed.
    ///
    /// A failure on the very first connection is returned as-is; later
    /// failures are retried with backoff.
    pub async fn run(&self) -> Result<(), DispatchError> {
        let start_time = self.clock.true_time();
        self.update_status(|s| {
            s.start_time = start_time;
            s.active_time = start_time;
        });
        self.set_state(DispatcherState::FirstConnect);
        tracing::info!("🚀 Dispatcher {} starting", self.owner);

        let mut restart_time = start_time - self.config.snapshot().dispatcher.restart_delay_max;
        let mut store = match self.first_connect() {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("❌ First connection to the task store failed: {}", e);
                return Err(e.into());
            }
        };

        loop {
            match self.poll_loop(&store).await {
                Ok(()) => break,
                Err(e) => tracing::error!("💥 Dispatcher connection aborted: {}", e),
            }

            // Reconnect with backoff until a connection sticks.
            loop {
                self.set_state(DispatcherState::Reconnecting);
                let cfg = self.config.snapshot();
                let now = self.clock.true_time();
                let delay = restart_delay(&cfg, restart_time, now);
                tracing::warn!("🔄 Reconnecting in {} ms", delay);
                tokio::time::sleep(Duration::from_millis(delay.max(0) as u64)).await;
                restart_time = self.clock.true_time();
                self.update_status(|s| s.restarts += 1);
                if let Err(e) = self.config.reload() {
                    tracing::warn!("⚠️  Keeping previous configuration: {}", e);
                }

                match self.provider.connect() {
                    Ok(conn) => {
                        store = conn;
                        break;
                    }
                    Err(e) => tracing::error!("💥 Reconnect failed: {}", e),
                }
            }
        }

        self.set_state(DispatcherState::Shutdown);
        tracing::info!("👋 Dispatcher {} stopped", self.owner);
        Ok(())
    }

    /// Connect and clear out shutdown requests left over from an earlier run.
    fn first_connect(&self) -> StoreResult<Arc<dyn Store>> {
        let store = self.provider.connect()?;
        let stale = store.query_tasks(&TaskQuery::for_event(EVID_SHUTDOWN).with_opcodes(&[Opcode::Shutdown]))?;
        for task in &stale {
            store.delete(task)?;
        }
        if !stale.is_empty() {
            tracing::info!("🧹 Removed {} stale shutdown requests", stale.len());
        }
        Ok(store)
    }

    async fn poll_loop(&self, store: &Arc<dyn Store>) -> Result<(), DispatchError> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.set_state(DispatcherState::Polling);
            // One configuration snapshot per poll.
            let cfg = self.config.snapshot();
            let claim = self.claim(&cfg);

            match store.activate_first_ready(self.clock.dispatch_time(), &claim)? {
                Some(task) => self.dispatch(store, &cfg, task).await?,
                None => {
                    self.set_state(DispatcherState::Waiting);
                    tokio::time::sleep(Duration::from_millis(cfg.dispatcher.poll_delay.max(1) as u64)).await;
                }
            }
        }
    }

    /// Replay support: run the next task regardless of its execution time,
    /// first advancing a frozen clock to it. Returns false if the queue is empty.
    pub async fn run_next_task(&self) -> Result<bool, DispatchError> {
        self.run_next_task_until(EXEC_TIME_FAR_FUTURE).await
    }

    /// Like [`run_next_task`](Self::run_next_task), limited to tasks due at or
    /// before `cutoff`. Self-restaging tasks such as feed polls eventually move
    /// past the cutoff, so repeated calls terminate.
    pub async fn run_next_task_until(&self, cutoff: i64) -> Result<bool, DispatchError> {
        let store = self.provider.connect()?;
        let cfg = self.config.snapshot();
        let Some(task) = store.activate_first_ready(cutoff, &self.claim(&cfg))? else {
            return Ok(false);
        };
        self.clock.advance_frozen(task.exec_time);
        self.dispatch(&store, &cfg, task).await?;
        Ok(true)
    }

    fn claim(&self, cfg: &AafsConfig) -> Claim {
        Claim {
            owner: self.owner.clone(),
            true_time: self.clock.true_time(),
            lease: cfg.dispatcher.task_lease,
        }
    }

    async fn dispatch(&self, store: &Arc<dyn Store>, cfg: &Arc<AafsConfig>, task: PendingTask) -> Result<(), DispatchError> {
        self.set_state(DispatcherState::Processing);
        self.update_status(|s| s.tasks_dispatched += 1);
        let ctx = DispatchContext::new(
            store.clone(),
            self.clock.dispatch_time(),
            self.clock.true_time(),
            cfg.clone(),
            self.services.clone(),
        )
        .with_shutdown_flag(self.shutdown.clone());
        tracing::info!("⚙️ Dispatching {}", task.summary());

        if task.is_restarted() {
            if store.log_for_key(&task.record_key)?.is_some() {
                tracing::info!("♻️ {} was already logged; removing", task.record_key);
                store.delete(&task)?;
                return Ok(());
            }
            if task.attempt > cfg.dispatcher.max_task_attempts {
                let remark = format!("abandoned after {} attempts", task.attempt - 1);
                tracing::error!("🪦 {} {}", task.summary(), remark);
                return Ok(apply(store.as_ref(), &task, ctx.log(ResultCode::TaskCorrupt, remark))?);
            }
            tracing::warn!("♻️ Restarting {}", task.summary());
        }

        let disposition = match task.opcode().and_then(|op| self.handlers.get(op)) {
            None => unknown_opcode(&ctx, &task),
            Some(handler) => {
                let timeout_ms = cfg.dispatcher.task_timeout;
                let watchdog = Duration::from_millis(timeout_ms.max(1) as u64);
                match tokio::time::timeout(watchdog, handler.execute(&ctx, &task)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(DispatchError::Watchdog {
                            key: task.record_key.clone(),
                            timeout_ms,
                        });
                    }
                }
            }
        };
        Ok(apply(store.as_ref(), &task, disposition)?)
    }
}

/// Delay before reconnecting: the remainder of `restart_delay_max` since the
/// last restart, but never less than `restart_delay_min`.
pub fn restart_delay(cfg: &AafsConfig, last_restart: i64, now: i64) -> i64 {
    let d = &cfg.dispatcher;
    (d.restart_delay_max - (now - last_restart)).max(d.restart_delay_min)
}

fn apply(store: &dyn Store, task: &PendingTask, disposition: Disposition) -> Result<(), StoreError> {
    match disposition {
        Disposition::Delete => store.delete(task),
        Disposition::Stage { exec_time, stage } => {
            tracing::info!("📌 Staged {} to {} (stage {})", task.record_key, exec_time, stage);
            store.stage(task, exec_time, stage)
        }
        Disposition::Log { code, log_time, remark } => {
            tracing::info!("📝 {} → {} {}", task.summary(), code, remark);
            store.append_log(&LogEntry::for_task(task, log_time, code, remark))?;
            store.delete(task)
        }
    }
}
