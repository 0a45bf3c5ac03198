//! Control opcodes: no-op, shutdown, console messages, and feed polling.

use aafs_core::region::passes_min_mag;
use async_trait::async_trait;

use super::{Handler, payload_or_corrupt, unknown_opcode};
use crate::context::DispatchContext;
use crate::error::{StoreError, StoreResult};
use crate::outcome::{Disposition, ResultCode};
use crate::payload::ConsoleMessage;
use crate::task::{EVID_POLL, NewTask, Opcode, PendingTask, SUBID_AAFS, derive_key};
use crate::upstream::EventQuery;

pub struct ControlHandler;

#[async_trait]
impl Handler for ControlHandler {
    fn name(&self) -> &'static str {
        "control"
    }

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
        match task.opcode() {
            Some(Opcode::NoOp) => Ok(ctx.log(ResultCode::Success, "no-op")),
            Some(Opcode::Shutdown) => {
                tracing::info!("🛑 Shutdown requested by {}", task.submit_id);
                ctx.request_shutdown();
                Ok(Disposition::Delete)
            }
            Some(Opcode::ConsoleMessage) => console_message(ctx, task),
            Some(Opcode::PollStart) => {
                ctx.delete_waiting_tasks(EVID_POLL, &[Opcode::PollRun], None)?;
                let run = NewTask::new(EVID_POLL, Opcode::PollRun, ctx.time, ctx.time, SUBID_AAFS)
                    .with_key(derive_key(&task.record_key, Opcode::PollRun.as_str()));
                ctx.store.submit(run)?;
                tracing::info!("📡 Feed polling started");
                Ok(ctx.log(ResultCode::Success, "polling started"))
            }
            Some(Opcode::PollStop) => {
                let stopped = ctx.delete_waiting_tasks(EVID_POLL, &[Opcode::PollRun], None)?;
                tracing::info!("📡 Feed polling stopped ({} pending run)", stopped);
                Ok(ctx.log(ResultCode::Success, "polling stopped"))
            }
            Some(Opcode::PollRun) => poll_run(ctx, task).await,
            _ => Ok(unknown_opcode(ctx, task)),
        }
    }
}

/// Stage 0 prints; stage 1 crashes unless restarted; stage 2 always crashes.
fn console_message(ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
    let payload: ConsoleMessage = payload_or_corrupt!(ctx, task);
    match task.stage {
        1 if !task.is_restarted() => Err(StoreError::Unavailable(format!(
            "simulated crash before restart: {}",
            payload.message
        ))),
        2 => Err(StoreError::Unavailable(format!("simulated crash: {}", payload.message))),
        _ => {
            tracing::info!("💬 {}", payload.message);
            Ok(ctx.log(ResultCode::Success, payload.message))
        }
    }
}

/// Query every intake region for recent events and submit intakes for new ones.
async fn poll_run(ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
    let action = ctx.action();
    let next_run = Disposition::stage(ctx.time + action.poll_interval, 0);
    let mut submitted = 0;

    for region in &action.intake_regions {
        let query = EventQuery {
            region: region.shape.clone(),
            start_time: ctx.time - action.poll_lookback,
            end_time: ctx.time,
            min_depth: action.poll_min_depth,
            max_depth: action.poll_max_depth,
            min_mag: region.min_mag,
        };
        let events = match ctx.services.source.fetch_event_list(&query).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("⚠️ Poll of region {} failed: {}", region.name, e);
                return Ok(next_run);
            }
        };

        for event in events {
            // Regions overlap; the first matching region decides.
            if !passes_min_mag(&action.intake_regions, event.lat, event.lon, event.mag) {
                continue;
            }
            if ctx.resolve_timeline(&event.event_id)?.is_some() {
                continue;
            }
            let key = derive_key(&task.record_key, &event.event_id);
            if ctx.store.log_for_key(&key)?.is_some() {
                continue;
            }
            let intake = NewTask::new(&event.event_id, Opcode::IntakeSync, ctx.time, ctx.time, SUBID_AAFS).with_key(key);
            if ctx.store.submit(intake)? {
                submitted += 1;
            }
        }
    }

    if submitted > 0 {
        tracing::info!("📡 Poll submitted {} intakes", submitted);
    } else {
        tracing::debug!("📡 Poll found nothing new");
    }
    Ok(next_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::encode;
    use crate::store::{Store, TaskQuery};
    use crate::testing::{Harness, mainshock, task_for, test_config};

    #[tokio::test]
    async fn test_shutdown_sets_flag() {
        let h = Harness::new(test_config());
        let ctx = h.ctx_at(10);
        let task = task_for(crate::task::EVID_SHUTDOWN, Opcode::Shutdown, 10, "{}".into());
        assert_eq!(ControlHandler.execute(&ctx, &task).await.unwrap(), Disposition::Delete);
        assert!(ctx.shutdown_requested());
    }

    #[tokio::test]
    async fn test_console_message_stages() {
        let h = Harness::new(test_config());
        let ctx = h.ctx_at(10);
        let details = encode(&ConsoleMessage { message: "hello".into() });
        let mut task = task_for("console", Opcode::ConsoleMessage, 10, details);

        let d = ControlHandler.execute(&ctx, &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::Success));

        task.stage = 1;
        assert!(ControlHandler.execute(&ctx, &task).await.is_err());
        task.attempt = 2;
        assert!(ControlHandler.execute(&ctx, &task).await.is_ok());

        task.stage = 2;
        assert!(ControlHandler.execute(&ctx, &task).await.is_err());
    }

    #[tokio::test]
    async fn test_poll_submits_new_events_once() {
        let h = Harness::new(test_config());
        let now = 10 * aafs_core::DAY_MS;
        h.source.insert(mainshock("ci1", now - 3_600_000, 5.5));
        h.source.insert(mainshock("ci2", now - 3_600_000, 3.0));
        h.source.insert(mainshock("old", now - 3 * aafs_core::DAY_MS, 6.0));

        let poll = task_for(EVID_POLL, Opcode::PollRun, now, "{}".into());
        let d = ControlHandler.execute(&h.ctx_at(now), &poll).await.unwrap();
        assert_eq!(d, Disposition::stage(now + 300_000, 0));

        let intakes = h.store.query_tasks(&TaskQuery::default().with_opcodes(&[Opcode::IntakeSync])).unwrap();
        assert_eq!(intakes.len(), 1);
        assert_eq!(intakes[0].event_id, "ci1");

        // Same poll task again: the intake is already queued.
        ControlHandler.execute(&h.ctx_at(now + 300_000), &poll).await.unwrap();
        assert_eq!(h.store.task_count(), 1);
    }

    #[tokio::test]
    async fn test_poll_start_and_stop() {
        let h = Harness::new(test_config());
        let start = task_for(EVID_POLL, Opcode::PollStart, 10, "{}".into());
        ControlHandler.execute(&h.ctx_at(10), &start).await.unwrap();
        let runs = h.store.query_tasks(&TaskQuery::for_event(EVID_POLL)).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].opcode(), Some(Opcode::PollRun));

        let stop = task_for(EVID_POLL, Opcode::PollStop, 20, "{}".into());
        ControlHandler.execute(&h.ctx_at(20), &stop).await.unwrap();
        assert_eq!(h.store.task_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_opcode_is_corrupt() {
        let h = Harness::new(test_config());
        let mut task = task_for("x", Opcode::NoOp, 10, "{}".into());
        task.opcode = 99;
        let d = ControlHandler.execute(&h.ctx_at(10), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TaskCorrupt));
    }
}
