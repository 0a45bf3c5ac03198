//! Task payloads, stored as JSON in `PendingTask::details`.

use aafs_core::Rupture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::task::PendingTask;
use crate::timeline::AnalystOptions;

/// Decode a task's payload; a malformed payload makes the task corrupt.
pub fn decode<P: DeserializeOwned>(task: &PendingTask) -> Result<P, TaskError> {
    serde_json::from_str(&task.details)
        .map_err(|e| TaskError::TaskCorrupt(format!("{}: {e}", task.summary())))
}

/// Encode a payload for submission.
pub fn encode<P: Serialize>(payload: &P) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "{}".into())
}

/// Payload-free control tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

/// Intake from a trusted synchronous source (operator, poll).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeSync {
    /// Analyst overrides applied on creation, or to an existing timeline.
    #[serde(default)]
    pub analyst: Option<AnalystOptions>,
}

/// Intake from the publication feed, carrying the feed's own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakePublish {
    pub reported: Rupture,
    #[serde(default)]
    pub analyst: Option<AnalystOptions>,
}

/// Status change requested by an analyst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystStateChange {
    #[default]
    None,
    Start,
    Stop,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalystIntervene {
    #[serde(default)]
    pub state_change: AnalystStateChange,
    /// Create the timeline if it does not exist.
    #[serde(default)]
    pub create_timeline: bool,
    #[serde(default)]
    pub analyst: Option<AnalystOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateForecast {
    /// Last forecast lag when the task was chained.
    pub last_forecast_lag: Option<i64>,
    /// Lag this task is to forecast at.
    pub next_forecast_lag: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateReport {
    /// Forecast being published.
    pub forecast_lag: i64,
    /// Start of the publication sequence.
    pub base_time: i64,
    /// This attempt's lag after `base_time`.
    pub pdl_lag: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateExpire {
    pub last_forecast_lag: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NewTask, Opcode, SUBID_CLI};

    #[test]
    fn test_decode_defaults() {
        let task = NewTask::new("ev", Opcode::AnalystIntervene, 0, 0, SUBID_CLI).into_pending();
        let payload: AnalystIntervene = decode(&task).unwrap();
        assert_eq!(payload.state_change, AnalystStateChange::None);
        assert!(!payload.create_timeline);
        let _: Empty = decode(&task).unwrap();
        let _: IntakeSync = decode(&task).unwrap();
    }

    #[test]
    fn test_decode_corrupt() {
        let task = NewTask::new("ev", Opcode::GenForecast, 0, 0, SUBID_CLI)
            .with_details("{\"next_forecast_lag\": \"soon\"}".into())
            .into_pending();
        assert!(matches!(decode::<GenerateForecast>(&task), Err(TaskError::TaskCorrupt(_))));
    }

    #[test]
    fn test_encode_decode() {
        let payload = GenerateReport {
            forecast_lag: 1_200_000,
            base_time: 5,
            pdl_lag: 300_000,
        };
        let task = NewTask::new("ev", Opcode::GenPdlReport, 0, 0, SUBID_CLI)
            .with_details(encode(&payload))
            .into_pending();
        assert_eq!(decode::<GenerateReport>(&task).unwrap(), payload);
    }
}
