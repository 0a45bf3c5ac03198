//! Earthquake rupture parameters as reported by the upstream catalog.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// One earthquake: origin time, hypocenter and magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rupture {
    /// Authoritative external event id.
    pub event_id: String,
    /// Origin time, epoch milliseconds.
    pub time: i64,
    pub lat: f64,
    pub lon: f64,
    /// Depth in kilometers, positive down.
    pub depth: f64,
    pub mag: f64,
    /// Other ids the upstream catalog knows this event by.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_ids: Vec<String>,
}

impl Rupture {
    pub fn new(event_id: impl Into<String>, time: i64, lat: f64, lon: f64, depth: f64, mag: f64) -> Self {
        Self {
            event_id: event_id.into(),
            time,
            lat,
            lon,
            depth,
            mag,
            alt_ids: Vec::new(),
        }
    }

    /// Great-circle distance to another rupture's epicenter.
    pub fn distance_km(&self, other: &Rupture) -> f64 {
        haversine_km(self.lat, self.lon, other.lat, other.lon)
    }

    /// True if `id` names this event, either as its primary id or an alternate.
    pub fn has_id(&self, id: &str) -> bool {
        self.event_id == id || self.alt_ids.iter().any(|a| a == id)
    }
}

/// Haversine distance in kilometers between two points given in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero() {
        assert_eq!(haversine_km(34.0, -118.0, 34.0, -118.0), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn test_has_id() {
        let mut rup = Rupture::new("us1000abcd", 0, 0.0, 0.0, 10.0, 6.0);
        rup.alt_ids.push("ci38457511".into());
        assert!(rup.has_id("us1000abcd"));
        assert!(rup.has_id("ci38457511"));
        assert!(!rup.has_id("nc1234"));
    }
}
