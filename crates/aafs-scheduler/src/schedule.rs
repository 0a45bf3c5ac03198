//! Schedule calculators: pure functions from configuration and timeline
//! state to the next forecast lag, publication retry lag, and upstream
//! retry lag. `None` means "no next lag".

use aafs_core::ActionConfig;

use crate::timeline::TimelineStatus;

/// Next forecast lag for a timeline, or `None` if it wants no more forecasts.
pub fn next_forecast_lag(status: &TimelineStatus, config: &ActionConfig) -> Option<i64> {
    if !status.is_forecast_state() {
        return None;
    }
    forecast_lag_after(status.last_forecast_lag, status.extra_forecast_lag(), config)
}

/// Forecast lag following `last`, honoring an optional analyst extra lag.
///
/// The scheduled candidate is the least configured lag at or past
/// `last + forecast_min_gap` (or 0 before the first forecast). The extra lag,
/// floored to the lag unit, only has to exceed `last`. The sooner of the two wins.
///
/// The extra lag is not held to `forecast_min_gap`; it may fall closer to the
/// last forecast than any scheduled lag could.
pub fn forecast_lag_after(last: Option<i64>, extra: Option<i64>, config: &ActionConfig) -> Option<i64> {
    let (min_lag, min_extra) = match last {
        None => (0, -1),
        Some(last) => (last + config.forecast_min_gap, last),
    };
    let scheduled = config.next_forecast_lag(min_lag);
    let extra = extra.and_then(|lag| config.floor_unit_lag(lag, min_extra));
    match (scheduled, extra) {
        (Some(s), Some(e)) => Some(s.min(e)),
        (s, e) => s.or(e),
    }
}

/// Next publication retry lag, relative to `base_time`.
///
/// Only a timeline with a pending publication retries. The result is always
/// greater than `last_pdl_lag`, and the retry must land before the next
/// forecast (less the minimum gap) and within `forecast_max_delay` of the last one.
pub fn next_publication_lag(
    status: &TimelineStatus,
    next_forecast_lag: Option<i64>,
    last_pdl_lag: Option<i64>,
    base_time: i64,
    now: i64,
    config: &ActionConfig,
) -> Option<i64> {
    if !status.is_pdl_retry_state() {
        return None;
    }
    publication_lag_after(
        status.last_mainshock_time(),
        status.last_forecast_lag,
        next_forecast_lag,
        last_pdl_lag,
        base_time,
        now,
        config,
    )
}

/// Core of [`next_publication_lag`], free of timeline state.
pub fn publication_lag_after(
    mainshock_time: i64,
    last_forecast_lag: Option<i64>,
    next_forecast_lag: Option<i64>,
    last_pdl_lag: Option<i64>,
    base_time: i64,
    now: i64,
    config: &ActionConfig,
) -> Option<i64> {
    let candidate = match last_pdl_lag {
        None => 0,
        Some(last) => config.next_pdl_report_retry_lag(last + 1)?,
    };

    let mut ceiling = i64::MAX;
    if let Some(next) = next_forecast_lag {
        ceiling = ceiling.min(mainshock_time + next - config.forecast_min_gap);
    }
    if let Some(last) = last_forecast_lag {
        ceiling = ceiling.min(mainshock_time + last + config.forecast_max_delay);
    }

    let projected = (base_time + candidate).max(now);
    (projected < ceiling).then_some(candidate)
}

/// Next upstream retry lag for a forecast task whose stage encodes the last retry lag.
pub fn next_comcat_retry_lag(stage: i32, config: &ActionConfig) -> Option<i64> {
    config.next_comcat_retry_lag(config.stage_to_lag(stage) + 1)
}

/// Next upstream retry lag for an intake task whose stage encodes the last retry lag.
pub fn next_intake_retry_lag(stage: i32, config: &ActionConfig) -> Option<i64> {
    config.next_comcat_intake_lag(config.stage_to_lag(stage) + 1)
}

/// Whether a forecast at `lag` should use the sequence-specific model.
pub fn is_sequence_specific(lag: i64, config: &ActionConfig) -> bool {
    lag >= config.seq_spec_min_lag
}
