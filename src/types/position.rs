//! Position fixes and location-watch options

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Position Sample
// ============================================================================

/// A single geographic fix produced by a location source.
///
/// Samples are immutable once created; every consumer works on its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Latitude in decimal degrees (WGS84)
    pub latitude: f64,
    /// Longitude in decimal degrees (WGS84)
    pub longitude: f64,
    /// Fix time as Unix epoch milliseconds
    #[serde(alias = "timestamp")]
    pub timestamp_millis: i64,
    /// Ground speed in m/s, when the source reports it
    #[serde(default, alias = "speed")]
    pub speed_mps: Option<f64>,
    /// Course over ground in degrees from true north, when reported
    #[serde(default, alias = "heading")]
    pub heading_deg: Option<f64>,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
            speed_mps: None,
            heading_deg: None,
        }
    }

    /// Attach speed and heading (builder style, used by sources that report motion).
    #[must_use]
    pub fn with_motion(mut self, speed_mps: f64, heading_deg: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self.heading_deg = Some(heading_deg);
        self
    }

    /// Fix time as a UTC instant. Out-of-range timestamps clamp to the epoch.
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Speed in km/h for display (0 when unknown).
    pub fn speed_kmh(&self) -> f64 {
        self.speed_mps.unwrap_or(0.0) * 3.6
    }

    /// Whether the coordinates are finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for PositionSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}

// ============================================================================
// Watch Options
// ============================================================================

/// Requested fix accuracy, passed through to the location source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LocationAccuracy {
    Low,
    Balanced,
    #[default]
    High,
    BestForNavigation,
}

/// Options for a continuous location watch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchOptions {
    pub accuracy: LocationAccuracy,
    pub min_time_millis: u64,
    pub min_distance_meters: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            accuracy: LocationAccuracy::High,
            min_time_millis: 1_000,
            min_distance_meters: 1.0,
        }
    }
}
