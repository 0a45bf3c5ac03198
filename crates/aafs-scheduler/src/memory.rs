//! In-memory store for tests, simulation and replay.
//!
//! One mutex guards all state, which makes every operation atomic and gives
//! `activate_first_ready` the same guarantee the SQLite store gets from its
//! write transaction. Failure injection lets tests exercise the dispatcher's
//! reconnect path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::store::{CatalogSnapshot, Claim, LogEntry, Store, StoreProvider, TaskQuery, TimelineEntry};
use crate::task::{NewTask, PendingTask};

#[derive(Default)]
struct Inner {
    /// (submission sequence, task)
    tasks: Vec<(u64, PendingTask)>,
    next_seq: u64,
    logs: Vec<LogEntry>,
    timeline: Vec<TimelineEntry>,
    catalogs: HashMap<String, CatalogSnapshot>,
    aliases: HashMap<String, String>,
}

/// Mutex-guarded store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_ops: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail as if the store were unreachable.
    pub fn fail_next_ops(&self, n: usize) {
        self.fail_ops.store(n, Ordering::SeqCst);
    }

    /// Number of queued tasks, active or waiting.
    pub fn task_count(&self) -> usize {
        self.inner.lock().map(|g| g.tasks.len()).unwrap_or(0)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        let pending = self.fail_ops.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_ops.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected store failure".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn submit(&self, task: NewTask) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        if inner.tasks.iter().any(|(_, t)| t.record_key == task.record_key) {
            return Ok(false);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.push((seq, task.into_pending()));
        Ok(true)
    }

    fn activate_first_ready(&self, cutoff: i64, claim: &Claim) -> StoreResult<Option<PendingTask>> {
        let mut inner = self.lock()?;

        if let Some((_, active)) = inner.tasks.iter_mut().find(|(_, t)| t.active) {
            let ours = active.owner.as_deref() == Some(claim.owner.as_str());
            if !ours && active.lease_until > claim.true_time {
                return Ok(None);
            }
            active.attempt += 1;
            active.owner = Some(claim.owner.clone());
            active.lease_until = claim.lease_until();
            return Ok(Some(active.clone()));
        }

        let next = inner
            .tasks
            .iter_mut()
            .filter(|(_, t)| t.exec_time <= cutoff)
            .min_by_key(|(seq, t)| (t.exec_time, *seq));
        Ok(next.map(|(_, task)| {
            task.active = true;
            task.attempt += 1;
            task.owner = Some(claim.owner.clone());
            task.lease_until = claim.lease_until();
            task.clone()
        }))
    }

    fn stage(&self, task: &PendingTask, exec_time: i64, stage: i32) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let (_, stored) = inner
            .tasks
            .iter_mut()
            .find(|(_, t)| t.record_key == task.record_key)
            .ok_or_else(|| StoreError::TaskNotFound(task.record_key.clone()))?;
        stored.exec_time = exec_time;
        stored.stage = stage;
        stored.active = false;
        stored.attempt = 0;
        stored.owner = None;
        stored.lease_until = 0;
        Ok(())
    }

    fn delete(&self, task: &PendingTask) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.tasks.retain(|(_, t)| t.record_key != task.record_key);
        Ok(())
    }

    fn query_tasks(&self, query: &TaskQuery) -> StoreResult<Vec<PendingTask>> {
        let inner = self.lock()?;
        let mut found: Vec<_> = inner.tasks.iter().filter(|(_, t)| query.matches(t)).collect();
        found.sort_by_key(|(seq, t)| (t.exec_time, *seq));
        Ok(found.into_iter().map(|(_, t)| t.clone()).collect())
    }

    fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        self.lock()?.logs.push(entry.clone());
        Ok(())
    }

    fn log_for_key(&self, key: &str) -> StoreResult<Option<LogEntry>> {
        Ok(self.lock()?.logs.iter().find(|e| e.key == key).cloned())
    }

    fn logs_for_event(&self, event_id: &str) -> StoreResult<Vec<LogEntry>> {
        let inner = self.lock()?;
        let mut logs: Vec<_> = inner.logs.iter().filter(|e| e.event_id == event_id).cloned().collect();
        logs.sort_by_key(|e| e.log_time);
        Ok(logs)
    }

    fn append_timeline(&self, entry: &TimelineEntry) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner
            .timeline
            .iter()
            .any(|e| e.event_id == entry.event_id && e.action_time == entry.action_time)
        {
            return Err(StoreError::DuplicateTimeline {
                event_id: entry.event_id.clone(),
                action_time: entry.action_time,
            });
        }
        inner.timeline.push(entry.clone());
        Ok(())
    }

    fn latest_timeline(&self, event_id: &str) -> StoreResult<Option<TimelineEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .timeline
            .iter()
            .filter(|e| e.event_id == event_id)
            .max_by_key(|e| e.action_time)
            .cloned())
    }

    fn timeline_for_key(&self, key: &str) -> StoreResult<Option<TimelineEntry>> {
        Ok(self.lock()?.timeline.iter().find(|e| e.key == key).cloned())
    }

    fn timeline_history(&self, event_id: &str) -> StoreResult<Vec<TimelineEntry>> {
        let inner = self.lock()?;
        let mut entries: Vec<_> = inner.timeline.iter().filter(|e| e.event_id == event_id).cloned().collect();
        entries.sort_by_key(|e| e.action_time);
        Ok(entries)
    }

    fn put_catalog(&self, snapshot: &CatalogSnapshot) -> StoreResult<()> {
        self.lock()?.catalogs.insert(snapshot.key.clone(), snapshot.clone());
        Ok(())
    }

    fn catalog_for_key(&self, key: &str) -> StoreResult<Option<CatalogSnapshot>> {
        Ok(self.lock()?.catalogs.get(key).cloned())
    }

    fn delete_catalog(&self, key: &str) -> StoreResult<usize> {
        Ok(usize::from(self.lock()?.catalogs.remove(key).is_some()))
    }

    fn put_alias(&self, external_id: &str, timeline_id: &str, _time: i64) -> StoreResult<()> {
        self.lock()?.aliases.insert(external_id.to_string(), timeline_id.to_string());
        Ok(())
    }

    fn resolve_alias(&self, external_id: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.aliases.get(external_id).cloned())
    }
}

/// Hands out one shared [`MemoryStore`]; can refuse connections to simulate an outage.
pub struct MemoryProvider {
    store: Arc<MemoryStore>,
    refuse: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            refuse: AtomicUsize::new(0),
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }
}

impl StoreProvider for MemoryProvider {
    fn connect(&self) -> StoreResult<Arc<dyn Store>> {
        let pending = self.refuse.load(Ordering::SeqCst);
        if pending > 0 {
            self.refuse.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(self.store.clone() as Arc<dyn Store>)
    }
}
