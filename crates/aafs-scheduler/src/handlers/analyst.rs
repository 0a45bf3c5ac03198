//! Analyst intervention: start, stop, or re-parameterize a timeline.

use async_trait::async_trait;

use super::{Handler, payload_or_corrupt, upstream_retry};
use crate::context::DispatchContext;
use crate::error::StoreResult;
use crate::outcome::{Disposition, ResultCode};
use crate::payload::{self, AnalystStateChange};
use crate::schedule::next_intake_retry_lag;
use crate::support::TimelineLoad;
use crate::task::PendingTask;
use crate::timeline::{FcOrigin, FcStatus};

pub struct AnalystHandler;

#[async_trait]
impl Handler for AnalystHandler {
    fn name(&self) -> &'static str {
        "analyst-intervene"
    }

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
        if let Some(done) = ctx.finish_restarted(task)? {
            return Ok(done);
        }
        let request: payload::AnalystIntervene = payload_or_corrupt!(ctx, task);

        match ctx.resolve_timeline(&task.event_id)? {
            Some(timeline_id) => intervene(ctx, task, &timeline_id, request),
            None if request.create_timeline => create(ctx, task, request).await,
            None => Ok(ctx.log(
                ResultCode::TimelineAnalystNone,
                format!("no timeline for {}", task.event_id),
            )),
        }
    }
}

fn intervene(
    ctx: &DispatchContext,
    task: &PendingTask,
    timeline_id: &str,
    request: payload::AnalystIntervene,
) -> StoreResult<Disposition> {
    let mut status = match ctx.open_timeline(task, timeline_id)? {
        TimelineLoad::Found(status) => status,
        TimelineLoad::NotFound => return Ok(ctx.log(ResultCode::TimelineNotFound, timeline_id)),
        TimelineLoad::Corrupt(disposition) => return Ok(disposition),
    };

    let new_status = match request.state_change {
        AnalystStateChange::Start if status.can_analyst_start() => Some(FcStatus::ActiveNormal),
        AnalystStateChange::Stop if status.can_analyst_stop() => Some(FcStatus::StopAnalyst),
        AnalystStateChange::Start | AnalystStateChange::Stop => {
            return Ok(ctx.log_warn(
                ResultCode::TimelineAnalystFail,
                format!("{:?} not allowed in {:?}", request.state_change, status.fc_status),
            ));
        }
        AnalystStateChange::None => None,
    };

    if new_status.is_some() {
        status.set_analyst(new_status, request.analyst);
        ctx.append_timeline(task, &mut status)?;
        ctx.next_auto_timeline(task, &status)?;
        tracing::info!("🧑‍🔬 Analyst moved {} to {:?}", timeline_id, status.fc_status);
        return Ok(ctx.log(ResultCode::Success, ""));
    }

    match request.analyst {
        Some(analyst) if status.can_analyst_update() => {
            status.set_analyst(None, Some(analyst));
            ctx.append_timeline(task, &mut status)?;
            ctx.next_auto_timeline(task, &status)?;
            Ok(ctx.log(ResultCode::TimelineAnalystSet, ""))
        }
        Some(_) => Ok(ctx.log(
            ResultCode::TimelineAnalystFail,
            format!("cannot update analyst options in {:?}", status.fc_status),
        )),
        None => Ok(ctx.log(ResultCode::TimelineAnalystNone, "nothing to change")),
    }
}

/// Create a timeline on the analyst's say-so, bypassing the intake filter.
async fn create(
    ctx: &DispatchContext,
    task: &PendingTask,
    request: payload::AnalystIntervene,
) -> StoreResult<Disposition> {
    let mainshock = match ctx.services.source.fetch_event(&task.event_id).await {
        Ok(Some(rupture)) => rupture,
        Ok(None) => {
            return Ok(ctx.log_warn(
                ResultCode::TimelineNotFound,
                format!("event {} not in catalog", task.event_id),
            ));
        }
        Err(e) => {
            return Ok(match upstream_retry(ctx, task, &e, next_intake_retry_lag) {
                Some(retry) => retry,
                None => ctx.log_warn(ResultCode::IntakeComcatFail, e.to_string()),
            });
        }
    };

    if let Some(timeline_id) = ctx.resolve_timeline(&mainshock.event_id)? {
        ctx.store.put_alias(&task.event_id, &timeline_id, ctx.time)?;
        return intervene(ctx, task, &timeline_id, request);
    }

    let fc_status = match request.state_change {
        AnalystStateChange::Stop => FcStatus::StopAnalyst,
        AnalystStateChange::Start | AnalystStateChange::None => FcStatus::ActiveNormal,
    };
    ctx.create_timeline(task, &task.event_id, mainshock, FcOrigin::Analyst, fc_status, request.analyst)?;
    Ok(ctx.log(ResultCode::Success, "created by analyst"))
}
