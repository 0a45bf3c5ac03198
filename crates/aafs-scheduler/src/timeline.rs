//! Timeline state machine: one event's forecast lifecycle.
//!
//! The persisted timeline is an append-only list of entries, each carrying a
//! serialized [`TimelineStatus`]. The newest entry is the current state.
//! Handlers load it, apply exactly one transition, and append the result.
//!
//! ```text
//!             intake (feed)         intake (sync) / status update
//!   ──────▶ ACTIVE_INTAKE ────────────────────────▶ ACTIVE_NORMAL
//!                │   │                                │   │  │
//!     withdrawn  │   └──────────┬─────────────────────┘   │  │ schedule exhausted
//!                ▼              ▼                         │  ▼
//!         STOP_WITHDRAWN   STOP_FORESHOCK  STOP_COMCAT_FAIL  STOP_EXPIRED
//!                                     ▲ analyst stop          │
//!                    STOP_ANALYST ◀───┘   analyst start ──────┘ (back to ACTIVE_NORMAL)
//! ```

use aafs_core::Rupture;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult, TaskError};
use crate::store::TimelineEntry;

/// Forecast status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FcStatus {
    /// Provisionally admitted from the feed; eligibility not yet confirmed.
    ActiveIntake,
    /// Generating scheduled forecasts.
    ActiveNormal,
    StopAnalyst,
    StopExpired,
    StopForeshock,
    StopWithdrawn,
    StopComcatFail,
}

impl FcStatus {
    pub fn is_active(self) -> bool {
        matches!(self, FcStatus::ActiveIntake | FcStatus::ActiveNormal)
    }
}

/// Publication sub-status of the current forecast cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PdlStatus {
    Unknown,
    Pending,
    Bypassed,
    Secondary,
    Success,
    Failure,
}

/// What produced a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCode {
    Track,
    Forecast,
    PdlReport,
    Expire,
    Analyst,
    StatusUpdate,
    ComcatFail,
    Withdrawn,
    Foreshock,
    /// Written over a corrupt snapshot; never carries a status.
    Error,
}

impl ActionCode {
    pub const ALL: [ActionCode; 10] = [
        ActionCode::Track,
        ActionCode::Forecast,
        ActionCode::PdlReport,
        ActionCode::Expire,
        ActionCode::Analyst,
        ActionCode::StatusUpdate,
        ActionCode::ComcatFail,
        ActionCode::Withdrawn,
        ActionCode::Foreshock,
        ActionCode::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionCode::Track => "TRACK",
            ActionCode::Forecast => "FORECAST",
            ActionCode::PdlReport => "PDL_REPORT",
            ActionCode::Expire => "EXPIRE",
            ActionCode::Analyst => "ANALYST",
            ActionCode::StatusUpdate => "STATUS_UPDATE",
            ActionCode::ComcatFail => "COMCAT_FAIL",
            ActionCode::Withdrawn => "WITHDRAWN",
            ActionCode::Foreshock => "FORESHOCK",
            ActionCode::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == s)
    }
}

/// Where the timeline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FcOrigin {
    Sync,
    Feed,
    Analyst,
}

/// Analyst overrides attached to a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystOptions {
    pub analyst_id: String,
    #[serde(default)]
    pub remark: String,
    pub time: i64,
    /// Model parameter overrides, passed through to the forecast engine.
    #[serde(default)]
    pub params: serde_json::Value,
    /// One extra forecast lag beyond (or between) the configured schedule.
    #[serde(default)]
    pub extra_forecast_lag: Option<i64>,
}

/// Summary of the most recent forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub lag: i64,
    pub mainshock: Rupture,
    pub aftershock_count: usize,
    pub max_aftershock_mag: Option<f64>,
    pub sequence_specific: bool,
    /// Engine output, opaque here.
    #[serde(default)]
    pub model: serde_json::Value,
}

/// Current state of one timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineStatus {
    pub event_id: String,
    pub actcode: ActionCode,
    pub action_time: i64,
    pub origin: FcOrigin,
    pub fc_status: FcStatus,
    pub pdl_status: PdlStatus,
    pub last_forecast_lag: Option<i64>,
    /// Lag of the last publication attempt, relative to `pdl_base_time`.
    pub last_pdl_lag: Option<i64>,
    pub pdl_base_time: i64,
    /// Latest mainshock parameters; `mainshock.time` is the lag origin.
    pub mainshock: Rupture,
    #[serde(default)]
    pub analyst: Option<AnalystOptions>,
    #[serde(default)]
    pub forecast: Option<ForecastSummary>,
    #[serde(default)]
    pub foreshock_event_id: Option<String>,
}

impl TimelineStatus {
    /// Fresh timeline for a newly admitted mainshock.
    pub fn track(
        event_id: impl Into<String>,
        origin: FcOrigin,
        fc_status: FcStatus,
        mainshock: Rupture,
        analyst: Option<AnalystOptions>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            actcode: ActionCode::Track,
            action_time: 0,
            origin,
            fc_status,
            pdl_status: PdlStatus::Unknown,
            last_forecast_lag: None,
            last_pdl_lag: None,
            pdl_base_time: 0,
            mainshock,
            analyst,
            forecast: None,
            foreshock_event_id: None,
        }
    }

    /// Rebuild from a persisted entry.
    pub fn from_entry(entry: &TimelineEntry) -> Result<Self, TaskError> {
        if entry.actcode == ActionCode::Error {
            return Err(TaskError::TimelineCorrupt(format!(
                "timeline {} ends in an error entry",
                entry.event_id
            )));
        }
        let status: Self = serde_json::from_str(&entry.details)
            .map_err(|e| TaskError::TimelineCorrupt(format!("timeline {}: {e}", entry.event_id)))?;
        if status.event_id != entry.event_id || status.actcode != entry.actcode {
            return Err(TaskError::TimelineCorrupt(format!(
                "timeline {}: snapshot does not match its entry",
                entry.event_id
            )));
        }
        Ok(status)
    }

    pub fn to_details(&self) -> StoreResult<String> {
        serde_json::to_string(self)
            .map_err(|e| StoreError::Malformed(format!("timeline {}: {e}", self.event_id)))
    }

    pub fn last_mainshock_time(&self) -> i64 {
        self.mainshock.time
    }

    /// External id used as the publication event code.
    pub fn mainshock_event_id(&self) -> &str {
        &self.mainshock.event_id
    }

    pub fn extra_forecast_lag(&self) -> Option<i64> {
        self.analyst.as_ref().and_then(|a| a.extra_forecast_lag)
    }

    pub fn analyst_params(&self) -> Option<&serde_json::Value> {
        self.analyst.as_ref().map(|a| &a.params).filter(|p| !p.is_null())
    }

    // ─── Predicates ───────────────────────────────────────────

    /// The timeline wants forecasts generated.
    pub fn is_forecast_state(&self) -> bool {
        self.fc_status.is_active()
    }

    /// Admitted provisionally; must pass the full filter or be confirmed by sync intake.
    pub fn is_intake_state(&self) -> bool {
        self.fc_status == FcStatus::ActiveIntake
    }

    /// A publication attempt is still owed for the last forecast.
    pub fn is_pdl_retry_state(&self) -> bool {
        self.pdl_status == PdlStatus::Pending
    }

    pub fn can_analyst_start(&self) -> bool {
        matches!(
            self.fc_status,
            FcStatus::StopAnalyst
                | FcStatus::StopExpired
                | FcStatus::StopForeshock
                | FcStatus::StopWithdrawn
        )
    }

    pub fn can_analyst_stop(&self) -> bool {
        self.fc_status.is_active()
    }

    pub fn can_analyst_update(&self) -> bool {
        self.fc_status.is_active()
    }

    // ─── Transitions ──────────────────────────────────────────

    /// Record a computed forecast; publication starts over as pending.
    pub fn set_forecast(&mut self, summary: ForecastSummary, pdl_base_time: i64) {
        self.actcode = ActionCode::Forecast;
        self.last_forecast_lag = Some(summary.lag);
        self.mainshock = summary.mainshock.clone();
        self.forecast = Some(summary);
        self.pdl_status = PdlStatus::Pending;
        self.last_pdl_lag = None;
        self.pdl_base_time = pdl_base_time;
    }

    /// Record the result of a publication attempt made at `pdl_lag`.
    pub fn set_pdl_outcome(&mut self, pdl_status: PdlStatus, pdl_lag: Option<i64>) {
        self.pdl_status = pdl_status;
        self.last_pdl_lag = pdl_lag;
    }

    /// A retried publication, as its own entry.
    pub fn set_pdl_report(&mut self, pdl_status: PdlStatus, pdl_lag: Option<i64>) {
        self.actcode = ActionCode::PdlReport;
        self.set_pdl_outcome(pdl_status, pdl_lag);
    }

    pub fn set_expired(&mut self) {
        self.actcode = ActionCode::Expire;
        if self.fc_status.is_active() {
            self.fc_status = FcStatus::StopExpired;
        }
    }

    pub fn set_withdrawn(&mut self) {
        self.actcode = ActionCode::Withdrawn;
        self.fc_status = FcStatus::StopWithdrawn;
    }

    pub fn set_foreshock(&mut self, larger_event_id: impl Into<String>) {
        self.actcode = ActionCode::Foreshock;
        self.fc_status = FcStatus::StopForeshock;
        self.foreshock_event_id = Some(larger_event_id.into());
        if self.pdl_status == PdlStatus::Pending {
            self.pdl_status = PdlStatus::Bypassed;
        }
    }

    pub fn set_comcat_fail(&mut self) {
        self.actcode = ActionCode::ComcatFail;
        self.fc_status = FcStatus::StopComcatFail;
    }

    pub fn set_status_update(&mut self, fc_status: FcStatus) {
        self.actcode = ActionCode::StatusUpdate;
        self.fc_status = fc_status;
    }

    /// Analyst intervention: optionally change status, optionally replace overrides.
    pub fn set_analyst(&mut self, fc_status: Option<FcStatus>, analyst: Option<AnalystOptions>) {
        self.actcode = ActionCode::Analyst;
        if let Some(fc_status) = fc_status {
            self.fc_status = fc_status;
        }
        if analyst.is_some() {
            self.analyst = analyst;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mainshock() -> Rupture {
        Rupture::new("ci38457511", 1_562_383_193_040, 35.77, -117.6, 8.0, 7.1)
    }

    fn status() -> TimelineStatus {
        TimelineStatus::track("ci38457511", FcOrigin::Sync, FcStatus::ActiveNormal, mainshock(), None)
    }

    fn entry_for(status: &TimelineStatus) -> TimelineEntry {
        TimelineEntry {
            key: "k1".into(),
            event_id: status.event_id.clone(),
            action_time: 10,
            actcode: status.actcode,
            details: status.to_details().unwrap(),
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut st = status();
        st.analyst = Some(AnalystOptions {
            analyst_id: "jdoe".into(),
            remark: "widen window".into(),
            time: 1_562_400_000_000,
            params: serde_json::json!({"b": 1.0, "p": 0.98}),
            extra_forecast_lag: Some(2_700_000),
        });
        st.set_forecast(
            ForecastSummary {
                lag: 1_200_000,
                mainshock: mainshock(),
                aftershock_count: 42,
                max_aftershock_mag: Some(5.4),
                sequence_specific: false,
                model: serde_json::json!({"a": -1.67}),
            },
            1_562_384_453_040,
        );
        st.set_pdl_outcome(PdlStatus::Pending, Some(0));

        let back = TimelineStatus::from_entry(&entry_for(&st)).unwrap();
        assert_eq!(back, st);
    }

    #[test]
    fn test_details_are_full_snapshot() {
        let details = status().to_details().unwrap();
        let value: serde_json::Value = serde_json::from_str(&details).unwrap();
        assert_eq!(value["event_id"], "ci38457511");
        assert_eq!(value["fc_status"], serde_json::to_value(FcStatus::ActiveNormal).unwrap());
        assert!(value["mainshock"].is_object());
    }

    #[test]
    fn test_error_entry_is_corrupt() {
        let mut entry = entry_for(&status());
        entry.actcode = ActionCode::Error;
        assert!(matches!(
            TimelineStatus::from_entry(&entry),
            Err(TaskError::TimelineCorrupt(_))
        ));
    }

    #[test]
    fn test_garbage_details_are_corrupt() {
        let mut entry = entry_for(&status());
        entry.details = "{\"event_id\": 7}".into();
        assert!(TimelineStatus::from_entry(&entry).is_err());
    }

    #[test]
    fn test_mismatched_event_is_corrupt() {
        let mut entry = entry_for(&status());
        entry.event_id = "other".into();
        assert!(TimelineStatus::from_entry(&entry).is_err());
    }

    #[test]
    fn test_analyst_predicates() {
        let mut st = status();
        assert!(st.can_analyst_stop());
        assert!(st.can_analyst_update());
        assert!(!st.can_analyst_start());

        for stop in [
            FcStatus::StopAnalyst,
            FcStatus::StopExpired,
            FcStatus::StopForeshock,
            FcStatus::StopWithdrawn,
        ] {
            st.fc_status = stop;
            assert!(st.can_analyst_start(), "{stop:?}");
            assert!(!st.can_analyst_stop());
            assert!(!st.can_analyst_update());
        }

        st.fc_status = FcStatus::StopComcatFail;
        assert!(!st.can_analyst_start());
    }

    #[test]
    fn test_forecast_resets_publication() {
        let mut st = status();
        st.set_pdl_outcome(PdlStatus::Failure, Some(1_800_000));
        st.set_forecast(
            ForecastSummary {
                lag: 3_600_000,
                mainshock: mainshock(),
                aftershock_count: 0,
                max_aftershock_mag: None,
                sequence_specific: false,
                model: serde_json::Value::Null,
            },
            99,
        );
        assert_eq!(st.pdl_status, PdlStatus::Pending);
        assert_eq!(st.last_pdl_lag, None);
        assert_eq!(st.pdl_base_time, 99);
        assert_eq!(st.last_forecast_lag, Some(3_600_000));
        assert!(st.is_pdl_retry_state());
    }

    #[test]
    fn test_foreshock_stops_and_bypasses() {
        let mut st = status();
        st.pdl_status = PdlStatus::Pending;
        st.set_foreshock("ci38457999");
        assert_eq!(st.fc_status, FcStatus::StopForeshock);
        assert_eq!(st.pdl_status, PdlStatus::Bypassed);
        assert!(!st.is_forecast_state());
        assert_eq!(st.foreshock_event_id.as_deref(), Some("ci38457999"));
    }

    #[test]
    fn test_expire_keeps_stopped_status() {
        let mut st = status();
        st.fc_status = FcStatus::StopAnalyst;
        st.set_expired();
        assert_eq!(st.fc_status, FcStatus::StopAnalyst);
        assert_eq!(st.actcode, ActionCode::Expire);
    }

    #[test]
    fn test_action_code_parse() {
        for code in ActionCode::ALL {
            assert_eq!(ActionCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ActionCode::parse("NOPE"), None);
    }
}
