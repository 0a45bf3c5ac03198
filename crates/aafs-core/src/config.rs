//! AAFS configuration system.
//!
//! The file lives at `~/.aafs/config.toml` by default. Every field has a
//! default, so an empty file (or no file at all) yields a working setup.
//! Durations and lags are integer milliseconds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{AafsError, Result};
use crate::region::IntakeRegion;
use crate::{DAY_MS, HOUR_MS, MINUTE_MS, SECOND_MS};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AafsConfig {
    #[serde(default)]
    pub action: ActionConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Default for AafsConfig {
    fn default() -> Self {
        Self {
            action: ActionConfig::default(),
            dispatcher: DispatcherConfig::default(),
            store: StoreConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

impl AafsConfig {
    /// Load config from the default path (~/.aafs/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path, then validate it.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AafsError::Config(format!("Failed to read config {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AafsError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Write config to a path, creating the parent directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AafsError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.action.validate()?;
        self.dispatcher.validate()
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AAFS home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".aafs")
    }
}

// ─── Action configuration ─────────────────────────────────────

/// Forecast schedule, retry schedules and intake thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Minimum spacing between consecutive forecasts.
    #[serde(default = "default_forecast_min_gap")]
    pub forecast_min_gap: i64,
    /// Longest a publication may trail its forecast.
    #[serde(default = "default_forecast_max_delay")]
    pub forecast_max_delay: i64,
    /// Forecast lags after the mainshock, ascending.
    #[serde(default = "default_forecast_lags")]
    pub forecast_lags: Vec<i64>,
    /// Allowance for the upstream catalog lagging real time.
    #[serde(default = "default_comcat_clock_skew")]
    pub comcat_clock_skew: i64,
    /// Allowance for revisions to the mainshock origin time.
    #[serde(default)]
    pub comcat_origin_skew: i64,
    /// Upstream retry lags for forecast tasks, relative to the task's schedule.
    #[serde(default = "default_comcat_retry_lags")]
    pub comcat_retry_lags: Vec<i64>,
    /// Upstream retry lags for intake tasks.
    #[serde(default = "default_comcat_intake_lags")]
    pub comcat_intake_lags: Vec<i64>,
    /// Publication retry lags, relative to the start of the report sequence.
    #[serde(default = "default_pdl_report_retry_lags")]
    pub pdl_report_retry_lags: Vec<i64>,
    /// Forecasts at or beyond this lag request the sequence-specific model.
    #[serde(default = "default_seq_spec_min_lag")]
    pub seq_spec_min_lag: i64,
    /// Granularity of all lags; task stages store lags in these units.
    #[serde(default = "default_lag_unit")]
    pub lag_unit: i64,
    /// Whether this server is the primary publisher.
    #[serde(default = "bool_true")]
    pub is_pdl_primary: bool,
    /// Admission regions, first match wins.
    #[serde(default = "default_intake_regions")]
    pub intake_regions: Vec<IntakeRegion>,
    /// Period of the background feed poll.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: i64,
    /// How far back each feed poll looks for new events.
    #[serde(default = "default_poll_lookback")]
    pub poll_lookback: i64,
    #[serde(default = "default_poll_min_depth")]
    pub poll_min_depth: f64,
    #[serde(default = "default_poll_max_depth")]
    pub poll_max_depth: f64,
}

fn bool_true() -> bool { true }
fn default_forecast_min_gap() -> i64 { 5 * MINUTE_MS }
fn default_forecast_max_delay() -> i64 { DAY_MS }
fn default_forecast_lags() -> Vec<i64> {
    vec![
        20 * MINUTE_MS,
        HOUR_MS,
        3 * HOUR_MS,
        6 * HOUR_MS,
        12 * HOUR_MS,
        DAY_MS,
        3 * DAY_MS,
        7 * DAY_MS,
        14 * DAY_MS,
        30 * DAY_MS,
        60 * DAY_MS,
        90 * DAY_MS,
        180 * DAY_MS,
        365 * DAY_MS,
    ]
}
fn default_comcat_clock_skew() -> i64 { MINUTE_MS }
fn default_comcat_retry_lags() -> Vec<i64> {
    vec![5 * MINUTE_MS, 10 * MINUTE_MS, 20 * MINUTE_MS, 40 * MINUTE_MS, HOUR_MS]
}
fn default_comcat_intake_lags() -> Vec<i64> {
    vec![5 * MINUTE_MS, 15 * MINUTE_MS, 30 * MINUTE_MS, HOUR_MS]
}
fn default_pdl_report_retry_lags() -> Vec<i64> { vec![0, 5 * MINUTE_MS, 30 * MINUTE_MS] }
fn default_seq_spec_min_lag() -> i64 { DAY_MS }
fn default_lag_unit() -> i64 { SECOND_MS }
fn default_intake_regions() -> Vec<IntakeRegion> { vec![IntakeRegion::world(5.0, 4.0)] }
fn default_poll_interval() -> i64 { 5 * MINUTE_MS }
fn default_poll_lookback() -> i64 { DAY_MS }
fn default_poll_min_depth() -> f64 { -5.0 }
fn default_poll_max_depth() -> f64 { 700.0 }

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            forecast_min_gap: default_forecast_min_gap(),
            forecast_max_delay: default_forecast_max_delay(),
            forecast_lags: default_forecast_lags(),
            comcat_clock_skew: default_comcat_clock_skew(),
            comcat_origin_skew: 0,
            comcat_retry_lags: default_comcat_retry_lags(),
            comcat_intake_lags: default_comcat_intake_lags(),
            pdl_report_retry_lags: default_pdl_report_retry_lags(),
            seq_spec_min_lag: default_seq_spec_min_lag(),
            lag_unit: default_lag_unit(),
            is_pdl_primary: true,
            intake_regions: default_intake_regions(),
            poll_interval: default_poll_interval(),
            poll_lookback: default_poll_lookback(),
            poll_min_depth: default_poll_min_depth(),
            poll_max_depth: default_poll_max_depth(),
        }
    }
}

/// Least element of an ascending list that is `>= min`.
fn first_at_least(lags: &[i64], min: i64) -> Option<i64> {
    lags.iter().copied().find(|&lag| lag >= min)
}

impl ActionConfig {
    /// Least scheduled forecast lag `>= min_lag`.
    pub fn next_forecast_lag(&self, min_lag: i64) -> Option<i64> {
        first_at_least(&self.forecast_lags, min_lag)
    }

    /// Least forecast upstream-retry lag `>= min_lag`.
    pub fn next_comcat_retry_lag(&self, min_lag: i64) -> Option<i64> {
        first_at_least(&self.comcat_retry_lags, min_lag)
    }

    /// Least intake upstream-retry lag `>= min_lag`.
    pub fn next_comcat_intake_lag(&self, min_lag: i64) -> Option<i64> {
        first_at_least(&self.comcat_intake_lags, min_lag)
    }

    /// Least publication retry lag `>= min_lag`.
    pub fn next_pdl_report_retry_lag(&self, min_lag: i64) -> Option<i64> {
        first_at_least(&self.pdl_report_retry_lags, min_lag)
    }

    /// Floor `lag` to the lag unit; `None` unless the result exceeds `min_exclusive`.
    pub fn floor_unit_lag(&self, lag: i64, min_exclusive: i64) -> Option<i64> {
        let floored = lag.div_euclid(self.lag_unit) * self.lag_unit;
        (floored > min_exclusive).then_some(floored)
    }

    /// Encode a lag as a task stage, in lag units.
    pub fn lag_to_stage(&self, lag: i64) -> i32 {
        i32::try_from(lag / self.lag_unit).unwrap_or(i32::MAX)
    }

    /// Decode a task stage back into a lag.
    pub fn stage_to_lag(&self, stage: i32) -> i64 {
        i64::from(stage) * self.lag_unit
    }

    pub fn validate(&self) -> Result<()> {
        if self.lag_unit <= 0 {
            return Err(AafsError::Config("action.lag_unit must be positive".into()));
        }
        if self.forecast_min_gap <= 0 {
            return Err(AafsError::Config("action.forecast_min_gap must be positive".into()));
        }
        if self.forecast_max_delay <= 0 {
            return Err(AafsError::Config("action.forecast_max_delay must be positive".into()));
        }
        if self.comcat_clock_skew < 0 || self.comcat_origin_skew < 0 {
            return Err(AafsError::Config("action clock skews must be non-negative".into()));
        }
        self.check_lags("forecast_lags", &self.forecast_lags)?;
        self.check_lags("comcat_retry_lags", &self.comcat_retry_lags)?;
        self.check_lags("comcat_intake_lags", &self.comcat_intake_lags)?;
        self.check_lags("pdl_report_retry_lags", &self.pdl_report_retry_lags)?;
        if self.intake_regions.is_empty() {
            return Err(AafsError::Config("action.intake_regions must not be empty".into()));
        }
        for region in &self.intake_regions {
            region.validate()?;
        }
        if self.poll_interval <= 0 || self.poll_lookback <= 0 {
            return Err(AafsError::Config("action poll interval and lookback must be positive".into()));
        }
        if self.poll_min_depth > self.poll_max_depth {
            return Err(AafsError::Config("action.poll_min_depth exceeds poll_max_depth".into()));
        }
        Ok(())
    }

    fn check_lags(&self, name: &str, lags: &[i64]) -> Result<()> {
        if lags.is_empty() {
            return Err(AafsError::Config(format!("action.{name} must not be empty")));
        }
        for pair in lags.windows(2) {
            if pair[0] >= pair[1] {
                return Err(AafsError::Config(format!(
                    "action.{name} must be strictly ascending ({} then {})",
                    pair[0], pair[1]
                )));
            }
        }
        for &lag in lags {
            if lag < 0 || lag % self.lag_unit != 0 {
                return Err(AafsError::Config(format!(
                    "action.{name}: {lag} is not a non-negative multiple of lag_unit {}",
                    self.lag_unit
                )));
            }
        }
        Ok(())
    }
}

// ─── Dispatcher configuration ─────────────────────────────────

/// Poll loop timing, restart backoff and the per-task watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Sleep between polls of an empty queue.
    #[serde(default = "default_poll_delay")]
    pub poll_delay: i64,
    #[serde(default = "default_restart_delay_min")]
    pub restart_delay_min: i64,
    #[serde(default = "default_restart_delay_max")]
    pub restart_delay_max: i64,
    /// Watchdog limit on a single handler invocation.
    #[serde(default = "default_task_timeout")]
    pub task_timeout: i64,
    /// How long an activation stays owned before another dispatcher may take it over.
    #[serde(default = "default_task_lease")]
    pub task_lease: i64,
    /// Activations allowed before a repeatedly crashing task is abandoned.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,
    /// Lease owner name. Defaults to the host name, so a dispatcher restarted
    /// on the same host takes back its own activations without waiting out
    /// the lease. Give each dispatcher sharing a host and a store its own name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

fn default_poll_delay() -> i64 { 30 * SECOND_MS }
fn default_restart_delay_min() -> i64 { 20 * SECOND_MS }
fn default_restart_delay_max() -> i64 { 5 * MINUTE_MS }
fn default_task_timeout() -> i64 { 10 * MINUTE_MS }
fn default_task_lease() -> i64 { 30 * MINUTE_MS }
fn default_max_task_attempts() -> u32 { 5 }

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_delay: default_poll_delay(),
            restart_delay_min: default_restart_delay_min(),
            restart_delay_max: default_restart_delay_max(),
            task_timeout: default_task_timeout(),
            task_lease: default_task_lease(),
            max_task_attempts: default_max_task_attempts(),
            owner: None,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_delay <= 0 {
            return Err(AafsError::Config("dispatcher.poll_delay must be positive".into()));
        }
        if self.restart_delay_min < 0 || self.restart_delay_min > self.restart_delay_max {
            return Err(AafsError::Config(
                "dispatcher.restart_delay_min must be within [0, restart_delay_max]".into(),
            ));
        }
        if self.task_timeout <= 0 || self.task_lease <= self.task_timeout {
            return Err(AafsError::Config(
                "dispatcher.task_lease must exceed a positive task_timeout".into(),
            ));
        }
        if self.max_task_attempts == 0 {
            return Err(AafsError::Config("dispatcher.max_task_attempts must be at least 1".into()));
        }
        if self.owner.as_deref().is_some_and(|o| o.trim().is_empty()) {
            return Err(AafsError::Config("dispatcher.owner must not be blank".into()));
        }
        Ok(())
    }
}

// ─── Store & services ─────────────────────────────────────────

/// Persistent store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "~/.aafs/aafs.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

/// Local stand-ins for the upstream catalog and the publication channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// JSON file of ruptures served as the upstream catalog.
    #[serde(default)]
    pub catalog_path: Option<String>,
    /// Directory receiving signed products.
    #[serde(default)]
    pub outbox_dir: Option<String>,
    /// HMAC key for product signatures.
    #[serde(default)]
    pub signing_key: String,
}

// ─── Reloadable handle ────────────────────────────────────────

/// Holds the current configuration snapshot and reloads it on request.
///
/// Readers take an `Arc` snapshot once per poll so a reload never changes
/// configuration underneath a running task.
#[derive(Debug)]
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<AafsConfig>>,
}

impl ConfigHandle {
    /// Fixed configuration; `reload` keeps it as is.
    pub fn new(config: AafsConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Configuration backed by a file; a missing file means defaults.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = if path.exists() {
            AafsConfig::load_from(&path)?
        } else {
            AafsConfig::default()
        };
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn snapshot(&self) -> Arc<AafsConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new configuration.
    pub fn replace(&self, config: AafsConfig) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(config);
    }

    /// Re-read the backing file. On error the previous snapshot stays in force.
    pub fn reload(&self) -> Result<Arc<AafsConfig>> {
        let Some(path) = &self.path else {
            return Ok(self.snapshot());
        };
        let config = if path.exists() {
            AafsConfig::load_from(path)?
        } else {
            AafsConfig::default()
        };
        self.replace(config);
        tracing::info!("🔄 Configuration reloaded from {}", path.display());
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AafsConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dispatcher.poll_delay, 30_000);
        assert_eq!(config.dispatcher.restart_delay_min, 20_000);
        assert_eq!(config.dispatcher.restart_delay_max, 300_000);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: AafsConfig = toml::from_str("").unwrap();
        assert_eq!(config, AafsConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config: AafsConfig = toml::from_str(
            "[action]\nforecast_lags = [60000, 120000]\n\n[dispatcher]\npoll_delay = 1000\n",
        )
        .unwrap();
        assert_eq!(config.action.forecast_lags, vec![60_000, 120_000]);
        assert_eq!(config.action.forecast_min_gap, 300_000);
        assert_eq!(config.dispatcher.poll_delay, 1_000);
    }

    #[test]
    fn test_lag_lookup() {
        let mut action = ActionConfig::default();
        action.forecast_lags = vec![60_000, 120_000, 600_000];
        assert_eq!(action.next_forecast_lag(0), Some(60_000));
        assert_eq!(action.next_forecast_lag(60_000), Some(60_000));
        assert_eq!(action.next_forecast_lag(60_001), Some(120_000));
        assert_eq!(action.next_forecast_lag(600_001), None);
    }

    #[test]
    fn test_floor_unit_lag() {
        let action = ActionConfig::default();
        assert_eq!(action.floor_unit_lag(90_500, 0), Some(90_000));
        assert_eq!(action.floor_unit_lag(90_500, 90_000), None);
        assert_eq!(action.floor_unit_lag(999, -1), Some(0));
    }

    #[test]
    fn test_stage_encoding() {
        let action = ActionConfig::default();
        assert_eq!(action.lag_to_stage(300_000), 300);
        assert_eq!(action.stage_to_lag(300), 300_000);
    }

    #[test]
    fn test_validate_rejects_unsorted_lags() {
        let mut action = ActionConfig::default();
        action.pdl_report_retry_lags = vec![0, 300_000, 300_000];
        assert!(action.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unaligned_lag() {
        let mut action = ActionConfig::default();
        action.forecast_lags = vec![1_500];
        assert!(action.validate().is_err());
    }

    #[test]
    fn test_validate_dispatcher_lease() {
        let mut dispatcher = DispatcherConfig::default();
        dispatcher.task_lease = dispatcher.task_timeout;
        assert!(dispatcher.validate().is_err());
    }

    #[test]
    fn test_dispatcher_owner() {
        let config: AafsConfig = toml::from_str("[dispatcher]\nowner = \"aafs-primary\"\n").unwrap();
        assert_eq!(config.dispatcher.owner.as_deref(), Some("aafs-primary"));
        assert!(config.dispatcher.validate().is_ok());

        let mut blank = DispatcherConfig::default();
        blank.owner = Some("  ".into());
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_handle_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatcher]\npoll_delay = 2000\n").unwrap();

        let handle = ConfigHandle::from_path(&path).unwrap();
        let before = handle.snapshot();
        assert_eq!(before.dispatcher.poll_delay, 2_000);

        std::fs::write(&path, "[dispatcher]\npoll_delay = 4000\n").unwrap();
        handle.reload().unwrap();
        assert_eq!(handle.snapshot().dispatcher.poll_delay, 4_000);
        // Earlier snapshots are unaffected.
        assert_eq!(before.dispatcher.poll_delay, 2_000);
    }

    #[test]
    fn test_handle_reload_keeps_old_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatcher]\npoll_delay = 2000\n").unwrap();
        let handle = ConfigHandle::from_path(&path).unwrap();

        std::fs::write(&path, "[dispatcher]\npoll_delay = \"soon\"\n").unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.snapshot().dispatcher.poll_delay, 2_000);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AafsConfig::default();
        config.services.signing_key = "k".into();
        config.save_to(&path).unwrap();
        assert_eq!(AafsConfig::load_from(&path).unwrap(), config);
    }
}
