//! Timeline helpers shared by the execution handlers: loading and appending
//! timeline entries, purging superseded tasks, and chaining the next task.

use aafs_core::Rupture;

use crate::context::DispatchContext;
use crate::error::{StoreResult, TaskError};
use crate::outcome::{Disposition, ResultCode};
use crate::payload::{self, GenerateExpire, GenerateForecast, GenerateReport};
use crate::schedule::{next_forecast_lag, next_publication_lag};
use crate::store::{TaskQuery, TimelineEntry};
use crate::task::{NewTask, Opcode, PendingTask, SUBID_AAFS, derive_key};
use crate::timeline::{ActionCode, AnalystOptions, FcOrigin, FcStatus, TimelineStatus};

/// Timeline id assigned to a timeline first seen under `external_id`.
pub fn timeline_id_for(external_id: &str) -> String {
    format!("tl-{external_id}")
}

/// Result of loading the current state of a timeline.
pub enum TimelineLoad {
    Found(TimelineStatus),
    NotFound,
    /// Snapshot unreadable; the disposition has already been decided.
    Corrupt(Disposition),
}

impl DispatchContext {
    /// Delete waiting tasks for an event with the given opcodes, sparing `except`.
    pub fn delete_waiting_tasks(
        &self,
        event_id: &str,
        opcodes: &[Opcode],
        except: Option<&str>,
    ) -> StoreResult<usize> {
        let query = TaskQuery::for_event(event_id).with_opcodes(opcodes).waiting();
        let mut deleted = 0;
        for task in self.store.query_tasks(&query)? {
            if except == Some(task.record_key.as_str()) {
                continue;
            }
            self.store.delete(&task)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Drop every waiting forecast, report and expire task for a timeline.
    pub fn delete_delayed_timeline_tasks(&self, event_id: &str) -> StoreResult<usize> {
        self.delete_waiting_tasks(event_id, &Opcode::DELAYED_TIMELINE, None)
    }

    /// Timeline id for an external or internal event id, if a timeline exists.
    pub fn resolve_timeline(&self, event_id: &str) -> StoreResult<Option<String>> {
        if let Some(id) = self.store.resolve_alias(event_id)? {
            return Ok(Some(id));
        }
        Ok(self.store.latest_timeline(event_id)?.map(|_| event_id.to_string()))
    }

    /// Load the newest status of a timeline.
    ///
    /// A corrupt snapshot gets an `ERROR` entry appended (once) and the task
    /// is logged as `TIMELINE_CORRUPT`.
    pub fn open_timeline(&self, task: &PendingTask, timeline_id: &str) -> StoreResult<TimelineLoad> {
        let Some(entry) = self.store.latest_timeline(timeline_id)? else {
            return Ok(TimelineLoad::NotFound);
        };
        match TimelineStatus::from_entry(&entry) {
            Ok(status) => Ok(TimelineLoad::Found(status)),
            Err(e) => Ok(TimelineLoad::Corrupt(self.timeline_corrupt(task, &entry, &e)?)),
        }
    }

    fn timeline_corrupt(
        &self,
        task: &PendingTask,
        entry: &TimelineEntry,
        err: &TaskError,
    ) -> StoreResult<Disposition> {
        tracing::error!("💥 Corrupt timeline {} (task {}): {}", entry.event_id, task.summary(), err);
        if entry.actcode != ActionCode::Error {
            let marker = TimelineEntry {
                key: task.record_key.clone(),
                event_id: entry.event_id.clone(),
                action_time: self.time.max(entry.action_time + 1),
                actcode: ActionCode::Error,
                details: serde_json::json!({ "error": err.to_string() }).to_string(),
            };
            self.store.append_timeline(&marker)?;
        }
        Ok(self.log(ResultCode::TimelineCorrupt, err.to_string()))
    }

    /// Append `status` as the newest entry, keyed by `task`.
    ///
    /// Action time is the dispatch time, bumped past the previous entry so
    /// entries stay strictly ordered.
    pub fn append_timeline(&self, task: &PendingTask, status: &mut TimelineStatus) -> StoreResult<()> {
        let prev = self.store.latest_timeline(&status.event_id)?;
        status.action_time = match prev {
            Some(prev) => self.time.max(prev.action_time + 1),
            None => self.time,
        };
        let entry = TimelineEntry {
            key: task.record_key.clone(),
            event_id: status.event_id.clone(),
            action_time: status.action_time,
            actcode: status.actcode,
            details: status.to_details()?,
        };
        self.store.append_timeline(&entry)?;
        tracing::info!(
            "🗂️ Timeline {} → {} ({:?}, pdl {:?})",
            status.event_id,
            status.actcode.as_str(),
            status.fc_status,
            status.pdl_status
        );
        Ok(())
    }

    /// Replace the timeline's delayed tasks with the one it now calls for:
    /// a publication retry, else the next forecast, else an expire if the
    /// timeline still wants action, else nothing.
    pub fn next_auto_timeline(&self, task: &PendingTask, status: &TimelineStatus) -> StoreResult<Option<Opcode>> {
        self.delete_delayed_timeline_tasks(&status.event_id)?;

        let action = self.action();
        let next_fc = next_forecast_lag(status, action);
        let next_pdl = next_publication_lag(
            status,
            next_fc,
            status.last_pdl_lag,
            status.pdl_base_time,
            self.time,
            action,
        );

        let next = if let Some(pdl_lag) = next_pdl {
            let forecast_lag = status.last_forecast_lag.unwrap_or_default();
            let payload = GenerateReport {
                forecast_lag,
                base_time: status.pdl_base_time,
                pdl_lag,
            };
            let sched = (status.pdl_base_time + pdl_lag).max(self.time);
            Some((Opcode::GenPdlReport, sched, action.lag_to_stage(pdl_lag), payload::encode(&payload)))
        } else if let Some(fc_lag) = next_fc {
            let payload = GenerateForecast {
                last_forecast_lag: status.last_forecast_lag,
                next_forecast_lag: fc_lag,
            };
            let sched = status.last_mainshock_time() + fc_lag + action.comcat_clock_skew + action.comcat_origin_skew;
            Some((Opcode::GenForecast, sched, 0, payload::encode(&payload)))
        } else if status.is_forecast_state() || status.is_pdl_retry_state() {
            let payload = GenerateExpire {
                last_forecast_lag: status.last_forecast_lag,
            };
            Some((Opcode::GenExpire, self.time, 0, payload::encode(&payload)))
        } else {
            None
        };

        let Some((opcode, sched, stage, details)) = next else {
            return Ok(None);
        };
        let follow_up = NewTask::new(&status.event_id, opcode, sched, self.time, SUBID_AAFS)
            .with_key(derive_key(&task.record_key, opcode.as_str()))
            .with_stage(stage)
            .with_details(details);
        self.store.submit(follow_up)?;
        tracing::info!("⏭️ Chained {} for {} at {}", opcode.as_str(), status.event_id, sched);
        Ok(Some(opcode))
    }

    /// Record every id of the mainshock as an alias of the timeline.
    pub fn alias_timeline(&self, timeline_id: &str, requested_id: &str, mainshock: &Rupture) -> StoreResult<()> {
        let ids = [requested_id, timeline_id, mainshock.event_id.as_str()]
            .into_iter()
            .chain(mainshock.alt_ids.iter().map(String::as_str));
        for id in ids {
            self.store.put_alias(id, timeline_id, self.time)?;
        }
        Ok(())
    }

    /// Create a new timeline for `mainshock`, first seen as `requested_id`.
    /// The timeline id derives from the catalog's authoritative id.
    pub fn create_timeline(
        &self,
        task: &PendingTask,
        requested_id: &str,
        mainshock: Rupture,
        origin: FcOrigin,
        fc_status: FcStatus,
        analyst: Option<AnalystOptions>,
    ) -> StoreResult<TimelineStatus> {
        let timeline_id = timeline_id_for(&mainshock.event_id);
        self.delete_delayed_timeline_tasks(&timeline_id)?;
        let mut status = TimelineStatus::track(&timeline_id, origin, fc_status, mainshock, analyst);
        self.append_timeline(task, &mut status)?;
        self.alias_timeline(&timeline_id, requested_id, &status.mainshock)?;
        self.next_auto_timeline(task, &status)?;
        tracing::info!(
            "🌋 Timeline {} created for {} (M{:.1}, {:?})",
            timeline_id,
            status.mainshock_event_id(),
            status.mainshock.mag,
            fc_status
        );
        Ok(status)
    }

    /// For a restarted task whose timeline entry was already written, redo
    /// the idempotent tail (aliases, chaining) and report the task as done.
    pub fn finish_restarted(&self, task: &PendingTask) -> StoreResult<Option<Disposition>> {
        if !task.is_restarted() {
            return Ok(None);
        }
        let Some(entry) = self.store.timeline_for_key(&task.record_key)? else {
            return Ok(None);
        };
        tracing::info!("♻️ Task {} already wrote its timeline entry; finishing", task.record_key);
        if let TimelineLoad::Found(status) = self.open_timeline(task, &entry.event_id)? {
            if entry.actcode == ActionCode::Track {
                self.alias_timeline(&status.event_id, &task.event_id, &status.mainshock)?;
            }
            self.next_auto_timeline(task, &status)?;
        }
        Ok(Some(self.log(ResultCode::TaskRetrySuccess, "Completed before restart")))
    }
}
