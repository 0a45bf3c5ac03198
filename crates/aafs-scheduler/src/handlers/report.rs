//! Publication retry and expiry handlers.

use async_trait::async_trait;

use super::{Handler, payload_or_corrupt};
use crate::context::DispatchContext;
use crate::error::StoreResult;
use crate::outcome::{Disposition, ResultCode};
use crate::payload::{GenerateExpire, GenerateReport};
use crate::publish::publish_forecast;
use crate::schedule::{next_forecast_lag, next_publication_lag};
use crate::support::TimelineLoad;
use crate::task::PendingTask;
use crate::timeline::{PdlStatus, TimelineStatus};

fn load(ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Result<TimelineStatus, Disposition>> {
    Ok(match ctx.open_timeline(task, &task.event_id)? {
        TimelineLoad::Found(status) => Ok(status),
        TimelineLoad::NotFound => Err(ctx.log_warn(
            ResultCode::TimelineNotFound,
            format!("no timeline {}", task.event_id),
        )),
        TimelineLoad::Corrupt(disposition) => Err(disposition),
    })
}

/// Retries publication of the last forecast.
pub struct ReportHandler;

#[async_trait]
impl Handler for ReportHandler {
    fn name(&self) -> &'static str {
        "generate-report"
    }

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
        if let Some(done) = ctx.finish_restarted(task)? {
            return Ok(done);
        }
        let request: GenerateReport = payload_or_corrupt!(ctx, task);
        let mut status = match load(ctx, task)? {
            Ok(status) => status,
            Err(disposition) => return Ok(disposition),
        };

        if !status.is_pdl_retry_state() {
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log(
                ResultCode::TimelineNotPdlPend,
                format!("publication is {:?}", status.pdl_status),
            ));
        }

        let action = ctx.action();
        let next_fc = next_forecast_lag(&status, action);
        let last = status.last_pdl_lag;
        let Some(pdl_lag) = next_publication_lag(&status, next_fc, last, status.pdl_base_time, ctx.time, action) else {
            status.set_pdl_report(PdlStatus::Failure, last);
            ctx.append_timeline(task, &mut status)?;
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log_warn(ResultCode::TimelinePdlFail, "publication window closed"));
        };

        if request.pdl_lag != pdl_lag
            || request.base_time != status.pdl_base_time
            || Some(request.forecast_lag) != status.last_forecast_lag
        {
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log_warn(
                ResultCode::TimelineTaskMismatch,
                format!("task publication lag {}, timeline expects {}", request.pdl_lag, pdl_lag),
            ));
        }

        let Some(forecast) = status.forecast.clone() else {
            status.set_pdl_report(PdlStatus::Failure, Some(pdl_lag));
            ctx.append_timeline(task, &mut status)?;
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log_warn(ResultCode::TimelinePdlFail, "no forecast to publish"));
        };

        let event_code = status.mainshock_event_id().to_string();
        let reviewed = status.analyst.is_some();
        let (pdl_status, code) =
            match publish_forecast(ctx.services.publisher.as_ref(), &forecast, &event_code, reviewed).await {
                Ok(_) => {
                    tracing::info!("📰 Published forecast for {} on retry lag {}", event_code, pdl_lag);
                    (PdlStatus::Success, ResultCode::Success)
                }
                Err(e) => {
                    let again = next_publication_lag(
                        &status,
                        next_fc,
                        Some(pdl_lag),
                        status.pdl_base_time,
                        ctx.time,
                        action,
                    );
                    tracing::warn!("⚠️ Publication retry for {} failed: {} (again: {:?})", event_code, e, again);
                    match again {
                        Some(_) => (PdlStatus::Pending, ResultCode::Success),
                        None => (PdlStatus::Failure, ResultCode::TimelinePdlFail),
                    }
                }
            };

        status.set_pdl_report(pdl_status, Some(pdl_lag));
        ctx.append_timeline(task, &mut status)?;
        ctx.next_auto_timeline(task, &status)?;
        Ok(ctx.log(code, format!("pdl_lag={pdl_lag} {pdl_status:?}")))
    }
}

/// Closes out a timeline whose schedule is exhausted.
pub struct ExpireHandler;

#[async_trait]
impl Handler for ExpireHandler {
    fn name(&self) -> &'static str {
        "generate-expire"
    }

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
        if let Some(done) = ctx.finish_restarted(task)? {
            return Ok(done);
        }
        let request: GenerateExpire = payload_or_corrupt!(ctx, task);
        let mut status = match load(ctx, task)? {
            Ok(status) => status,
            Err(disposition) => return Ok(disposition),
        };

        if !status.is_forecast_state() && !status.is_pdl_retry_state() {
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log(ResultCode::TimelineNotActive, format!("{:?}", status.fc_status)));
        }

        let action = ctx.action();
        let next_fc = next_forecast_lag(&status, action);
        let next_pdl = next_publication_lag(
            &status,
            next_fc,
            status.last_pdl_lag,
            status.pdl_base_time,
            ctx.time,
            action,
        );
        if next_fc.is_some() || next_pdl.is_some() || request.last_forecast_lag != status.last_forecast_lag {
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log_warn(ResultCode::TimelineTaskMismatch, "timeline still has work scheduled"));
        }

        status.set_expired();
        if status.is_pdl_retry_state() {
            status.set_pdl_outcome(PdlStatus::Failure, status.last_pdl_lag);
        }
        ctx.append_timeline(task, &mut status)?;
        ctx.next_auto_timeline(task, &status)?;
        tracing::info!("🏁 Timeline {} expired", status.event_id);
        Ok(ctx.log(ResultCode::Success, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::encode;
    use crate::store::{Store, TaskQuery};
    use crate::task::Opcode;
    use crate::testing::{Harness, mainshock, task_for, test_config};
    use crate::timeline::{ActionCode, FcOrigin, FcStatus, ForecastSummary};

    const BASE: i64 = 1_200_050;

    /// Timeline that just forecast at 20 minutes and failed its first publication.
    fn pending(h: &Harness) -> TimelineStatus {
        let ms = mainshock("ci1", 50, 6.0);
        let mut status = TimelineStatus::track("tl-ci1", FcOrigin::Sync, FcStatus::ActiveNormal, ms.clone(), None);
        status.set_forecast(
            ForecastSummary {
                lag: 1_200_000,
                mainshock: ms,
                aftershock_count: 0,
                max_aftershock_mag: None,
                sequence_specific: false,
                model: serde_json::Value::Null,
            },
            BASE,
        );
        status.set_pdl_outcome(PdlStatus::Pending, Some(0));
        let task = task_for("tl-ci1", Opcode::GenForecast, BASE, "{}".into());
        h.ctx_at(BASE).append_timeline(&task, &mut status).unwrap();
        status
    }

    fn report_task(pdl_lag: i64) -> PendingTask {
        let details = encode(&GenerateReport {
            forecast_lag: 1_200_000,
            base_time: BASE,
            pdl_lag,
        });
        task_for("tl-ci1", Opcode::GenPdlReport, BASE + pdl_lag, details)
    }

    fn status_of(h: &Harness) -> TimelineStatus {
        TimelineStatus::from_entry(&h.store.latest_timeline("tl-ci1").unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_retry_succeeds() {
        let h = Harness::new(test_config());
        pending(&h);
        let d = ReportHandler.execute(&h.ctx_at(BASE + 300_000), &report_task(300_000)).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::Success));
        let status = status_of(&h);
        assert_eq!(status.actcode, ActionCode::PdlReport);
        assert_eq!(status.pdl_status, PdlStatus::Success);
        assert_eq!(h.publisher.sent().len(), 1);

        let queued = h.store.query_tasks(&TaskQuery::for_event("tl-ci1")).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].opcode(), Some(Opcode::GenForecast));
    }

    #[tokio::test]
    async fn test_retries_until_exhausted() {
        let h = Harness::new(test_config());
        pending(&h);
        h.publisher.fail_next(10);

        let d = ReportHandler.execute(&h.ctx_at(BASE + 300_000), &report_task(300_000)).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::Success));
        assert_eq!(status_of(&h).pdl_status, PdlStatus::Pending);
        let queued = h.store.query_tasks(&TaskQuery::for_event("tl-ci1")).unwrap();
        assert_eq!(queued[0].opcode(), Some(Opcode::GenPdlReport));
        assert_eq!(queued[0].exec_time, BASE + 1_800_000);

        let d = ReportHandler.execute(&h.ctx_at(BASE + 1_800_000), &report_task(1_800_000)).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelinePdlFail));
        let status = status_of(&h);
        assert_eq!(status.pdl_status, PdlStatus::Failure);
        assert_eq!(status.last_pdl_lag, Some(1_800_000));
    }

    #[tokio::test]
    async fn test_report_without_pending_publication() {
        let h = Harness::new(test_config());
        let mut status = pending(&h);
        status.set_pdl_report(PdlStatus::Success, Some(0));
        h.ctx_at(BASE + 10)
            .append_timeline(&task_for("tl-ci1", Opcode::GenPdlReport, BASE, "{}".into()), &mut status)
            .unwrap();
        let d = ReportHandler.execute(&h.ctx_at(BASE + 300_000), &report_task(300_000)).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelineNotPdlPend));
    }

    #[tokio::test]
    async fn test_report_lag_mismatch() {
        let h = Harness::new(test_config());
        pending(&h);
        let d = ReportHandler.execute(&h.ctx_at(BASE + 300_000), &report_task(1_800_000)).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelineTaskMismatch));
        assert!(h.publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expire_after_last_forecast() {
        let h = Harness::new(test_config());
        let mut status = pending(&h);
        status.last_forecast_lag = Some(10_800_000);
        status.set_pdl_report(PdlStatus::Success, Some(0));
        h.ctx_at(BASE + 10)
            .append_timeline(&task_for("tl-ci1", Opcode::GenPdlReport, BASE, "{}".into()), &mut status)
            .unwrap();

        let details = encode(&GenerateExpire {
            last_forecast_lag: Some(10_800_000),
        });
        let task = task_for("tl-ci1", Opcode::GenExpire, BASE + 20, details);
        let d = ExpireHandler.execute(&h.ctx_at(BASE + 20), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::Success));
        let status = status_of(&h);
        assert_eq!(status.fc_status, FcStatus::StopExpired);
        assert_eq!(status.actcode, ActionCode::Expire);
        assert!(h.store.query_tasks(&TaskQuery::for_event("tl-ci1")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_with_forecasts_left_is_mismatch() {
        let h = Harness::new(test_config());
        let mut status = pending(&h);
        status.set_pdl_report(PdlStatus::Success, Some(0));
        h.ctx_at(BASE + 10)
            .append_timeline(&task_for("tl-ci1", Opcode::GenPdlReport, BASE, "{}".into()), &mut status)
            .unwrap();
        let details = encode(&GenerateExpire {
            last_forecast_lag: Some(1_200_000),
        });
        let task = task_for("tl-ci1", Opcode::GenExpire, BASE + 20, details);
        let d = ExpireHandler.execute(&h.ctx_at(BASE + 20), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelineTaskMismatch));
        assert_eq!(status_of(&h).fc_status, FcStatus::ActiveNormal);
    }
}
