//! Intake handlers: admit an event for forecasting.
//!
//! Sync intake comes from trusted submitters (operator, poll) and creates
//! timelines in `ACTIVE_NORMAL`. Feed intake arrives with the feed's own
//! event parameters; it is filtered twice and may only admit the event
//! provisionally (`ACTIVE_INTAKE`).

use aafs_core::region::{passes_intake_mag, passes_min_mag};
use async_trait::async_trait;

use super::{Handler, payload_or_corrupt, upstream_retry};
use crate::context::DispatchContext;
use crate::error::StoreResult;
use crate::outcome::{Disposition, ResultCode};
use crate::payload;
use crate::schedule::next_intake_retry_lag;
use crate::support::TimelineLoad;
use crate::task::{Opcode, PendingTask};
use crate::timeline::{AnalystOptions, FcOrigin, FcStatus};
use crate::upstream::UpstreamError;

pub struct IntakeSyncHandler;

#[async_trait]
impl Handler for IntakeSyncHandler {
    fn name(&self) -> &'static str {
        "intake-sync"
    }

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
        if let Some(done) = ctx.finish_restarted(task)? {
            return Ok(done);
        }
        let payload: payload::IntakeSync = payload_or_corrupt!(ctx, task);

        if let Some(timeline_id) = ctx.resolve_timeline(&task.event_id)? {
            return update_existing(ctx, task, &timeline_id, payload.analyst);
        }

        let mainshock = match ctx.services.source.fetch_event(&task.event_id).await {
            Ok(Some(rupture)) => rupture,
            Ok(None) => {
                return Ok(ctx.log_warn(
                    ResultCode::TimelineNotFound,
                    format!("event {} not in catalog", task.event_id),
                ));
            }
            Err(e) => return Ok(intake_failed(ctx, task, &e)),
        };

        // Known under its authoritative id.
        if let Some(timeline_id) = ctx.resolve_timeline(&mainshock.event_id)? {
            ctx.store.put_alias(&task.event_id, &timeline_id, ctx.time)?;
            return update_existing(ctx, task, &timeline_id, payload.analyst);
        }

        let regions = &ctx.action().intake_regions;
        if !passes_min_mag(regions, mainshock.lat, mainshock.lon, mainshock.mag) {
            return Ok(ctx.log(
                ResultCode::IntakeRejected,
                format!("M{:.2} at ({:.3}, {:.3}) below intake threshold", mainshock.mag, mainshock.lat, mainshock.lon),
            ));
        }

        ctx.create_timeline(task, &task.event_id, mainshock, FcOrigin::Sync, FcStatus::ActiveNormal, payload.analyst)?;
        Ok(ctx.log(ResultCode::Success, ""))
    }
}

pub struct IntakePdlHandler;

#[async_trait]
impl Handler for IntakePdlHandler {
    fn name(&self) -> &'static str {
        "intake-pdl"
    }

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
        if let Some(done) = ctx.finish_restarted(task)? {
            return Ok(done);
        }
        let payload: payload::IntakePublish = payload_or_corrupt!(ctx, task);
        let reported = &payload.reported;

        if ctx.resolve_timeline(&task.event_id)?.is_some() || ctx.resolve_timeline(&reported.event_id)?.is_some() {
            return Ok(Disposition::Delete);
        }
        let regions = &ctx.action().intake_regions;
        if !passes_intake_mag(regions, reported.lat, reported.lon, reported.mag) {
            return Ok(Disposition::Delete);
        }

        let mainshock = match ctx.services.source.fetch_event(&task.event_id).await {
            Ok(Some(rupture)) => rupture,
            Ok(None) => {
                return Ok(ctx.log(
                    ResultCode::TimelineNotFound,
                    format!("feed event {} not in catalog", task.event_id),
                ));
            }
            Err(e) => {
                // One retry chain per event is enough.
                let dropped = ctx.delete_waiting_tasks(&task.event_id, &[Opcode::IntakePdl], Some(&task.record_key))?;
                if dropped > 0 {
                    tracing::debug!("🧹 Dropped {} duplicate feed intakes for {}", dropped, task.event_id);
                }
                return Ok(intake_failed(ctx, task, &e));
            }
        };

        if let Some(timeline_id) = ctx.resolve_timeline(&mainshock.event_id)? {
            ctx.store.put_alias(&task.event_id, &timeline_id, ctx.time)?;
            return Ok(Disposition::Delete);
        }

        let fc_status = if passes_min_mag(regions, mainshock.lat, mainshock.lon, mainshock.mag) {
            FcStatus::ActiveNormal
        } else if passes_min_mag(regions, reported.lat, reported.lon, reported.mag)
            && passes_intake_mag(regions, mainshock.lat, mainshock.lon, mainshock.mag)
        {
            FcStatus::ActiveIntake
        } else {
            return Ok(Disposition::Delete);
        };

        ctx.create_timeline(task, &task.event_id, mainshock, FcOrigin::Feed, fc_status, payload.analyst)?;
        Ok(ctx.log(ResultCode::Success, ""))
    }
}

/// Timeline already exists: confirm a provisional intake, apply analyst
/// overrides, or report that there is nothing to do.
fn update_existing(
    ctx: &DispatchContext,
    task: &PendingTask,
    timeline_id: &str,
    analyst: Option<AnalystOptions>,
) -> StoreResult<Disposition> {
    let mut status = match ctx.open_timeline(task, timeline_id)? {
        TimelineLoad::Found(status) => status,
        TimelineLoad::NotFound => {
            return Ok(ctx.log_warn(
                ResultCode::TimelineNotFound,
                format!("alias for {} points at missing timeline {timeline_id}", task.event_id),
            ));
        }
        TimelineLoad::Corrupt(disposition) => return Ok(disposition),
    };

    if status.is_intake_state() {
        status.set_status_update(FcStatus::ActiveNormal);
        if analyst.is_some() {
            status.analyst = analyst;
        }
        ctx.append_timeline(task, &mut status)?;
        ctx.next_auto_timeline(task, &status)?;
        return Ok(ctx.log(ResultCode::TimelineStateUpdate, "intake confirmed"));
    }

    if let Some(analyst) = analyst {
        if status.can_analyst_update() {
            status.set_analyst(None, Some(analyst));
            ctx.append_timeline(task, &mut status)?;
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log(ResultCode::TimelineAnalystSet, ""));
        }
    }

    Ok(ctx.log(ResultCode::TimelineExists, timeline_id))
}

fn intake_failed(ctx: &DispatchContext, task: &PendingTask, err: &UpstreamError) -> Disposition {
    match upstream_retry(ctx, task, err, next_intake_retry_lag) {
        Some(retry) => retry,
        None => ctx.log_warn(ResultCode::IntakeComcatFail, err.to_string()),
    }
}
