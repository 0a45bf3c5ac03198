//! Intake regions: where events are admitted and at what magnitude.
//!
//! Each region carries two thresholds. `min_mag` admits an event outright.
//! `intake_mag` is the lower bar a provisional (feed) event must clear while
//! its reported magnitude alone already cleared `min_mag`.

use serde::{Deserialize, Serialize};

use crate::error::{AafsError, Result};
use crate::rupture::haversine_km;

/// Geographic footprint of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RegionShape {
    /// Whole globe.
    World,
    /// Great circle around a center point.
    Circle { lat: f64, lon: f64, radius_km: f64 },
    /// Latitude/longitude box. `min_lon > max_lon` wraps the date line.
    Rectangle {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
}

impl RegionShape {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        match self {
            RegionShape::World => true,
            RegionShape::Circle {
                lat: clat,
                lon: clon,
                radius_km,
            } => haversine_km(*clat, *clon, lat, lon) <= *radius_km,
            RegionShape::Rectangle {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            } => {
                if lat < *min_lat || lat > *max_lat {
                    return false;
                }
                if min_lon <= max_lon {
                    lon >= *min_lon && lon <= *max_lon
                } else {
                    lon >= *min_lon || lon <= *max_lon
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            RegionShape::World => Ok(()),
            RegionShape::Circle { lat, radius_km, .. } => {
                if !(-90.0..=90.0).contains(lat) {
                    return Err(AafsError::Region(format!("circle latitude {lat} out of range")));
                }
                if *radius_km <= 0.0 {
                    return Err(AafsError::Region(format!("circle radius {radius_km} must be positive")));
                }
                Ok(())
            }
            RegionShape::Rectangle { min_lat, max_lat, .. } => {
                if min_lat > max_lat {
                    return Err(AafsError::Region(format!(
                        "rectangle min_lat {min_lat} exceeds max_lat {max_lat}"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// A named admission region with its magnitude thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeRegion {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub shape: RegionShape,
    pub min_mag: f64,
    pub intake_mag: f64,
}

impl IntakeRegion {
    pub fn world(min_mag: f64, intake_mag: f64) -> Self {
        Self {
            name: "world".into(),
            shape: RegionShape::World,
            min_mag,
            intake_mag,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.shape.contains(lat, lon)
    }

    pub fn validate(&self) -> Result<()> {
        self.shape.validate()?;
        if self.intake_mag > self.min_mag {
            return Err(AafsError::Region(format!(
                "region '{}': intake_mag {} exceeds min_mag {}",
                self.name, self.intake_mag, self.min_mag
            )));
        }
        Ok(())
    }
}

/// First region in list order containing the point.
pub fn find_region(regions: &[IntakeRegion], lat: f64, lon: f64) -> Option<&IntakeRegion> {
    regions.iter().find(|r| r.contains(lat, lon))
}

/// True if the location lies in some region and `mag` clears its `min_mag`.
pub fn passes_min_mag(regions: &[IntakeRegion], lat: f64, lon: f64, mag: f64) -> bool {
    find_region(regions, lat, lon).is_some_and(|r| mag >= r.min_mag)
}

/// True if the location lies in some region and `mag` clears its `intake_mag`.
pub fn passes_intake_mag(regions: &[IntakeRegion], lat: f64, lon: f64, mag: f64) -> bool {
    find_region(regions, lat, lon).is_some_and(|r| mag >= r.intake_mag)
}
