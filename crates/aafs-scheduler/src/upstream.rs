//! Upstream collaborators: the earthquake catalog and the forecast engine.

use aafs_core::region::RegionShape;
use aafs_core::Rupture;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Catalog service failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    /// Temporarily unreachable; worth retrying later.
    #[error("Upstream unavailable: {0}")]
    Transient(String),

    /// The request itself was rejected.
    #[error("Upstream rejected request: {0}")]
    Rejected(String),
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }
}

/// Catalog search window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    pub region: RegionShape,
    /// Inclusive start, epoch ms.
    pub start_time: i64,
    /// Exclusive end, epoch ms.
    pub end_time: i64,
    pub min_depth: f64,
    pub max_depth: f64,
    pub min_mag: f64,
}

impl EventQuery {
    pub fn matches(&self, rup: &Rupture) -> bool {
        rup.time >= self.start_time
            && rup.time < self.end_time
            && rup.depth >= self.min_depth
            && rup.depth <= self.max_depth
            && rup.mag >= self.min_mag
            && self.region.contains(rup.lat, rup.lon)
    }
}

/// Source of earthquake parameters.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// One event by id. `Ok(None)` means the catalog confirms it does not exist.
    async fn fetch_event(&self, event_id: &str) -> Result<Option<Rupture>, UpstreamError>;

    /// Events matching the query, ordered by time.
    async fn fetch_event_list(&self, query: &EventQuery) -> Result<Vec<Rupture>, UpstreamError>;
}

/// Everything the engine needs for one forecast.
#[derive(Debug, Clone)]
pub struct ForecastInput<'a> {
    pub mainshock: &'a Rupture,
    pub aftershocks: &'a [Rupture],
    /// Forecast lag after the mainshock.
    pub lag: i64,
    pub sequence_specific: bool,
    /// Analyst parameter overrides, if any.
    pub analyst_params: Option<&'a serde_json::Value>,
}

/// Engine failure; retried on the upstream schedule like a catalog outage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Forecast engine failed: {0}")]
pub struct EngineError(pub String);

/// Statistical forecast model, treated as a black box.
pub trait ForecastEngine: Send + Sync {
    /// Catalog window to fetch aftershocks from, for a forecast at `lag`.
    fn aftershock_query(&self, mainshock: &Rupture, lag: i64) -> EventQuery;

    /// Compute the forecast, returning the engine's opaque output.
    fn compute(&self, input: &ForecastInput<'_>) -> Result<serde_json::Value, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matches() {
        let query = EventQuery {
            region: RegionShape::Circle {
                lat: 35.0,
                lon: -117.0,
                radius_km: 50.0,
            },
            start_time: 100,
            end_time: 200,
            min_depth: 0.0,
            max_depth: 30.0,
            min_mag: 2.0,
        };
        assert!(query.matches(&Rupture::new("a", 150, 35.1, -117.1, 8.0, 3.0)));
        assert!(!query.matches(&Rupture::new("b", 200, 35.1, -117.1, 8.0, 3.0)));
        assert!(!query.matches(&Rupture::new("c", 150, 36.5, -117.1, 8.0, 3.0)));
        assert!(!query.matches(&Rupture::new("d", 150, 35.1, -117.1, 8.0, 1.9)));
        assert!(!query.matches(&Rupture::new("e", 150, 35.1, -117.1, 40.0, 3.0)));
    }

    #[test]
    fn test_transient_flag() {
        assert!(UpstreamError::Transient("timeout".into()).is_transient());
        assert!(!UpstreamError::Rejected("bad id".into()).is_transient());
    }
}
