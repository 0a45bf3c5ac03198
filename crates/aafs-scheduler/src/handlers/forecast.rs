//! Generate-forecast handler.
//!
//! Runs one scheduled forecast for a timeline: re-checks the timeline still
//! wants this lag, refreshes the mainshock from the catalog, looks for a
//! larger event, computes and stores the forecast, makes the first
//! publication attempt, and chains whatever comes next.

use aafs_core::region::passes_min_mag;
use async_trait::async_trait;

use super::{Handler, payload_or_corrupt, upstream_retry};
use crate::context::DispatchContext;
use crate::error::StoreResult;
use crate::outcome::{Disposition, ResultCode};
use crate::payload::GenerateForecast;
use crate::publish::publish_forecast;
use crate::schedule::{is_sequence_specific, next_comcat_retry_lag, next_forecast_lag, next_publication_lag};
use crate::store::CatalogSnapshot;
use crate::support::TimelineLoad;
use crate::task::PendingTask;
use crate::timeline::{ForecastSummary, PdlStatus, TimelineStatus};
use crate::upstream::{ForecastInput, UpstreamError};

pub struct ForecastHandler;

#[async_trait]
impl Handler for ForecastHandler {
    fn name(&self) -> &'static str {
        "generate-forecast"
    }

    async fn execute(&self, ctx: &DispatchContext, task: &PendingTask) -> StoreResult<Disposition> {
        if task.is_restarted() {
            if let Some(done) = ctx.finish_restarted(task)? {
                return Ok(done);
            }
            // Partial work from the interrupted attempt.
            ctx.delete_delayed_timeline_tasks(&task.event_id)?;
            ctx.store.delete_catalog(&task.record_key)?;
        }
        let request: GenerateForecast = payload_or_corrupt!(ctx, task);

        let mut status = match ctx.open_timeline(task, &task.event_id)? {
            TimelineLoad::Found(status) => status,
            TimelineLoad::NotFound => {
                return Ok(ctx.log_warn(ResultCode::TimelineNotFound, format!("no timeline {}", task.event_id)));
            }
            TimelineLoad::Corrupt(disposition) => return Ok(disposition),
        };

        let action = ctx.action();
        let Some(lag) = next_forecast_lag(&status, action) else {
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log(
                ResultCode::TimelineNotActive,
                format!("{:?} wants no forecast", status.fc_status),
            ));
        };
        if request.next_forecast_lag != lag || request.last_forecast_lag != status.last_forecast_lag {
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log_warn(
                ResultCode::TimelineTaskMismatch,
                format!(
                    "task lag {} after {:?}, timeline expects {} after {:?}",
                    request.next_forecast_lag, request.last_forecast_lag, lag, status.last_forecast_lag
                ),
            ));
        }

        let services = &ctx.services;
        let mainshock = match services.source.fetch_event(status.mainshock_event_id()).await {
            Ok(Some(rupture)) => rupture,
            Ok(None) => return stop_withdrawn(ctx, task, &mut status, "mainshock deleted from catalog"),
            Err(e) => return upstream_failed(ctx, task, &mut status, &e),
        };

        let due = mainshock.time + lag + action.comcat_clock_skew;
        if due > ctx.time {
            tracing::debug!("⏳ {} not due until {}", status.event_id, due);
            return Ok(Disposition::stage(due, task.stage));
        }

        if status.is_intake_state()
            && !passes_min_mag(&action.intake_regions, mainshock.lat, mainshock.lon, mainshock.mag)
        {
            status.mainshock = mainshock;
            return stop_withdrawn(ctx, task, &mut status, "below intake threshold on revision");
        }

        let query = services.engine.aftershock_query(&mainshock, lag);
        let catalog = match services.source.fetch_event_list(&query).await {
            Ok(catalog) => catalog,
            Err(e) => return upstream_failed(ctx, task, &mut status, &e),
        };
        let aftershocks: Vec<_> = catalog.iter().filter(|r| !r.has_id(&mainshock.event_id)).collect();

        if let Some(larger) = aftershocks
            .iter()
            .filter(|r| r.mag > mainshock.mag)
            .max_by(|a, b| a.mag.total_cmp(&b.mag))
        {
            tracing::info!(
                "🔺 {} (M{:.1}) is a foreshock of {} (M{:.1})",
                mainshock.event_id,
                mainshock.mag,
                larger.event_id,
                larger.mag
            );
            let larger_id = larger.event_id.clone();
            status.mainshock = mainshock;
            status.set_foreshock(larger_id.clone());
            ctx.append_timeline(task, &mut status)?;
            ctx.next_auto_timeline(task, &status)?;
            return Ok(ctx.log(ResultCode::TimelineForeshock, larger_id));
        }

        let sequence_specific = is_sequence_specific(lag, action);
        let input = ForecastInput {
            mainshock: &mainshock,
            aftershocks: &catalog,
            lag,
            sequence_specific,
            analyst_params: status.analyst_params(),
        };
        let model = match services.engine.compute(&input) {
            Ok(model) => model,
            Err(e) => {
                let e = UpstreamError::Transient(e.to_string());
                return upstream_failed(ctx, task, &mut status, &e);
            }
        };

        ctx.store.put_catalog(&CatalogSnapshot {
            key: task.record_key.clone(),
            event_id: status.event_id.clone(),
            start_time: query.start_time,
            end_time: query.end_time,
            ruptures: catalog.clone(),
        })?;

        let summary = ForecastSummary {
            lag,
            aftershock_count: aftershocks.len(),
            max_aftershock_mag: aftershocks.iter().map(|r| r.mag).max_by(f64::total_cmp),
            sequence_specific,
            mainshock,
            model,
        };
        status.set_forecast(summary.clone(), ctx.time);
        let next_fc = next_forecast_lag(&status, action);

        if !action.is_pdl_primary {
            status.set_pdl_outcome(PdlStatus::Secondary, None);
        } else {
            let reviewed = status.analyst.is_some();
            let event_code = status.mainshock_event_id().to_string();
            match publish_forecast(services.publisher.as_ref(), &summary, &event_code, reviewed).await {
                Ok(_) => {
                    tracing::info!("📰 Published forecast for {} at lag {}", event_code, lag);
                    status.set_pdl_outcome(PdlStatus::Success, Some(0));
                }
                Err(e) => {
                    tracing::warn!("⚠️ Publication for {} failed: {}", event_code, e);
                    let retry = next_publication_lag(&status, next_fc, Some(0), ctx.time, ctx.time, action);
                    let pdl_status = if retry.is_some() { PdlStatus::Pending } else { PdlStatus::Failure };
                    status.set_pdl_outcome(pdl_status, Some(0));
                }
            }
        }

        ctx.append_timeline(task, &mut status)?;
        ctx.next_auto_timeline(task, &status)?;
        tracing::info!(
            "📈 Forecast {} lag={} aftershocks={} pdl={:?}",
            status.event_id,
            lag,
            summary.aftershock_count,
            status.pdl_status
        );
        Ok(ctx.log(ResultCode::Success, format!("lag={lag}")))
    }
}

fn stop_withdrawn(
    ctx: &DispatchContext,
    task: &PendingTask,
    status: &mut TimelineStatus,
    reason: &str,
) -> StoreResult<Disposition> {
    status.set_withdrawn();
    ctx.append_timeline(task, status)?;
    ctx.next_auto_timeline(task, status)?;
    Ok(ctx.log_warn(ResultCode::TimelineWithdraw, reason))
}

/// Retry on the upstream schedule, or stop the timeline once it is exhausted.
fn upstream_failed(
    ctx: &DispatchContext,
    task: &PendingTask,
    status: &mut TimelineStatus,
    err: &UpstreamError,
) -> StoreResult<Disposition> {
    if let Some(retry) = upstream_retry(ctx, task, err, next_comcat_retry_lag) {
        return Ok(retry);
    }
    status.set_comcat_fail();
    ctx.append_timeline(task, status)?;
    ctx.next_auto_timeline(task, status)?;
    Ok(ctx.log_warn(ResultCode::TimelineComcatFail, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::IntakeSyncHandler;
    use crate::payload::encode;
    use crate::store::{Claim, Store, TaskQuery};
    use crate::task::{EXEC_TIME_FAR_FUTURE, Opcode};
    use crate::testing::{Harness, mainshock, task_for, test_config};
    use crate::timeline::{ActionCode, FcStatus};
    use aafs_core::Rupture;

    const SCHED: i64 = 50 + 1_200_000;

    async fn tracked() -> Harness {
        let h = Harness::new(test_config());
        h.source.insert(mainshock("ci1", 50, 6.0));
        IntakeSyncHandler
            .execute(&h.ctx_at(100), &task_for("ci1", Opcode::IntakeSync, 100, "{}".into()))
            .await
            .unwrap();
        h
    }

    fn next_task(h: &Harness) -> PendingTask {
        let claim = Claim {
            owner: "test".into(),
            true_time: 0,
            lease: 1_000_000,
        };
        h.store.activate_first_ready(EXEC_TIME_FAR_FUTURE, &claim).unwrap().unwrap()
    }

    fn status_of(h: &Harness) -> TimelineStatus {
        TimelineStatus::from_entry(&h.store.latest_timeline("tl-ci1").unwrap().unwrap()).unwrap()
    }

    fn waiting(h: &Harness) -> Vec<PendingTask> {
        h.store.query_tasks(&TaskQuery::for_event("tl-ci1").waiting()).unwrap()
    }

    #[tokio::test]
    async fn test_forecast_publishes_and_chains() {
        let h = tracked().await;
        h.source.insert(Rupture::new("a1", 1_000, 35.8, -117.6, 6.0, 3.4));
        let task = next_task(&h);
        assert_eq!(task.exec_time, SCHED);

        let d = ForecastHandler.execute(&h.ctx_at(SCHED), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::Success));

        let status = status_of(&h);
        assert_eq!(status.actcode, ActionCode::Forecast);
        assert_eq!(status.last_forecast_lag, Some(1_200_000));
        assert_eq!(status.pdl_status, PdlStatus::Success);
        let forecast = status.forecast.unwrap();
        assert_eq!(forecast.aftershock_count, 1);
        assert_eq!(forecast.max_aftershock_mag, Some(3.4));

        let sent = h.publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_code, "ci1");
        assert!(h.publisher.verify(&sent[0]));
        assert!(h.store.catalog_for_key(&task.record_key).unwrap().is_some());

        let next = waiting(&h);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].opcode(), Some(Opcode::GenForecast));
        assert_eq!(next[0].exec_time, 50 + 3_600_000);
    }

    #[tokio::test]
    async fn test_early_forecast_is_restaged() {
        let h = tracked().await;
        let task = next_task(&h);
        let d = ForecastHandler.execute(&h.ctx_at(SCHED - 10_000), &task).await.unwrap();
        assert_eq!(d, Disposition::stage(SCHED, 0));
        assert_eq!(status_of(&h).actcode, ActionCode::Track);
    }

    #[tokio::test]
    async fn test_larger_aftershock_stops_timeline() {
        let h = tracked().await;
        h.source.insert(Rupture::new("big", 600_000, 35.8, -117.6, 6.0, 6.4));
        let task = next_task(&h);

        let d = ForecastHandler.execute(&h.ctx_at(SCHED), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelineForeshock));
        let status = status_of(&h);
        assert_eq!(status.fc_status, FcStatus::StopForeshock);
        assert_eq!(status.foreshock_event_id.as_deref(), Some("big"));
        assert!(waiting(&h).is_empty());
        assert!(h.publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_outage_retries_then_stops() {
        let h = tracked().await;
        h.source.fail_next(100);
        let mut task = next_task(&h);

        let d = ForecastHandler.execute(&h.ctx_at(SCHED), &task).await.unwrap();
        assert_eq!(d, Disposition::stage(SCHED + 300_000, 300));

        task.stage = 900;
        let d = ForecastHandler.execute(&h.ctx_at(SCHED + 900_000), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelineComcatFail));
        assert_eq!(status_of(&h).fc_status, FcStatus::StopComcatFail);
        assert!(waiting(&h).is_empty());
    }

    #[tokio::test]
    async fn test_deleted_mainshock_withdraws() {
        let h = tracked().await;
        h.source.remove("ci1");
        let task = next_task(&h);
        let d = ForecastHandler.execute(&h.ctx_at(SCHED), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelineWithdraw));
        assert_eq!(status_of(&h).fc_status, FcStatus::StopWithdrawn);
    }

    #[tokio::test]
    async fn test_failed_publication_chains_report() {
        let h = tracked().await;
        h.publisher.fail_next(1);
        let task = next_task(&h);

        let d = ForecastHandler.execute(&h.ctx_at(SCHED), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::Success));
        let status = status_of(&h);
        assert_eq!(status.pdl_status, PdlStatus::Pending);
        assert_eq!(status.last_pdl_lag, Some(0));

        let next = waiting(&h);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].opcode(), Some(Opcode::GenPdlReport));
        assert_eq!(next[0].exec_time, SCHED + 300_000);
        assert_eq!(next[0].stage, 300);
    }

    #[tokio::test]
    async fn test_stale_task_is_mismatch() {
        let h = tracked().await;
        let mut task = next_task(&h);
        task.details = encode(&GenerateForecast {
            last_forecast_lag: None,
            next_forecast_lag: 3_600_000,
        });
        let d = ForecastHandler.execute(&h.ctx_at(SCHED), &task).await.unwrap();
        assert_eq!(d.result_code(), Some(ResultCode::TimelineTaskMismatch));

        let next = waiting(&h);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].opcode(), Some(Opcode::GenForecast));
    }

    #[tokio::test]
    async fn test_secondary_does_not_publish() {
        let mut config = test_config();
        config.action.is_pdl_primary = false;
        let h = Harness::new(config);
        h.source.insert(mainshock("ci1", 50, 6.0));
        IntakeSyncHandler
            .execute(&h.ctx_at(100), &task_for("ci1", Opcode::IntakeSync, 100, "{}".into()))
            .await
            .unwrap();
        let task = next_task(&h);
        ForecastHandler.execute(&h.ctx_at(SCHED), &task).await.unwrap();
        assert_eq!(status_of(&h).pdl_status, PdlStatus::Secondary);
        assert!(h.publisher.sent().is_empty());
    }
}
