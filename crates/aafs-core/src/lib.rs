//! # AAFS Core
//!
//! Shared building blocks for the aftershock forecast scheduler:
//! configuration, the server clock, earthquake ruptures and the
//! geographic intake regions used to admit events for forecasting.
//!
//! All instants and durations are integer milliseconds since the Unix epoch.

pub mod clock;
pub mod config;
pub mod error;
pub mod region;
pub mod rupture;

pub use clock::ServerClock;
pub use config::{AafsConfig, ActionConfig, ConfigHandle, DispatcherConfig};
pub use error::{AafsError, Result};
pub use region::{IntakeRegion, RegionShape};
pub use rupture::Rupture;

/// Milliseconds per second.
pub const SECOND_MS: i64 = 1_000;
/// Milliseconds per minute.
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
/// Milliseconds per hour.
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
/// Milliseconds per day.
pub const DAY_MS: i64 = 24 * HOUR_MS;
