//! Presentation state
//!
//! Snapshots published to the UI layer: one [`ObserverView`] per observer
//! subscription (through a `watch` channel) and one [`PublisherStatus`] for
//! the driver side.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::proximity::classify;
use crate::types::{AlarmPhase, PositionSample, TrackingError, Zone};

/// Shown until the first vehicle document arrives.
pub const NO_VEHICLE_DATA: &str = "no location data available";

// ============================================================================
// Observer View
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObserverView {
    /// Publisher being tracked
    pub publisher_id: String,
    /// Display zone, once both positions are known
    pub zone: Option<Zone>,
    /// Great-circle distance to the vehicle in metres
    pub distance_meters: Option<f64>,
    pub alarm_phase: AlarmPhase,
    pub suppressed_until: Option<DateTime<Utc>>,
    /// Latest vehicle position and its write sequence number
    pub vehicle: Option<PositionSample>,
    pub vehicle_seq: Option<u64>,
    /// Observer's own latest position
    pub observer: Option<PositionSample>,
    /// Most recent error on any sub-stream; cleared by a successful retry
    pub last_error: Option<TrackingError>,
    pub suspended: bool,
    /// False once the subscription task has exited
    pub active: bool,
    /// Vehicle updates received on the channel
    pub updates_received: u64,
}

impl ObserverView {
    pub fn new(publisher_id: impl Into<String>, alarm_phase: AlarmPhase) -> Self {
        Self {
            publisher_id: publisher_id.into(),
            zone: None,
            distance_meters: None,
            alarm_phase,
            suppressed_until: None,
            vehicle: None,
            vehicle_seq: None,
            observer: None,
            last_error: None,
            suspended: false,
            active: true,
            updates_received: 0,
        }
    }

    /// Record a fresh distance and derive its zone.
    pub fn set_distance(&mut self, distance_meters: f64) {
        self.distance_meters = Some(distance_meters);
        self.zone = Some(classify(distance_meters));
    }

    /// One-line human summary for logs and the terminal.
    pub fn status_line(&self) -> String {
        if let Some(e) = &self.last_error {
            return format!("{}: error: {e}", self.publisher_id);
        }
        match (self.vehicle, self.distance_meters, self.zone) {
            (None, _, _) => format!("{}: {NO_VEHICLE_DATA}", self.publisher_id),
            (Some(v), Some(d), Some(zone)) => format!(
                "{}: {:.0} m away ({zone}, {}) at {v}, alarm {}",
                self.publisher_id,
                d,
                zone.color(),
                self.alarm_phase
            ),
            (Some(v), _, _) => format!(
                "{}: at {v}, waiting for own position, alarm {}",
                self.publisher_id, self.alarm_phase
            ),
        }
    }
}

// ============================================================================
// Publisher Status
// ============================================================================

/// Driver-side view of the publishing session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublisherStatus {
    pub tracking: bool,
    /// Last fix that passed the throttle, whether or not its publish succeeded
    pub last_sample: Option<PositionSample>,
    pub last_seq: Option<u64>,
    pub published_count: u64,
    pub last_error: Option<TrackingError>,
}

impl PublisherStatus {
    /// Current speed in km/h for display (0 when unknown).
    pub fn speed_kmh(&self) -> f64 {
        self.last_sample.map_or(0.0, |s| s.speed_kmh())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_reports_missing_vehicle_data() {
        let view = ObserverView::new("bus1", AlarmPhase::Armed);
        assert_eq!(view.status_line(), "bus1: no location data available");
    }

    #[test]
    fn status_line_with_distance() {
        let mut view = ObserverView::new("bus1", AlarmPhase::Triggered);
        view.vehicle = Some(PositionSample::new(10.005, 10.0, 0));
        view.set_distance(556.0);
        assert_eq!(view.zone, Some(Zone::Caution));
        let line = view.status_line();
        assert!(line.contains("556 m"), "{line}");
        assert!(line.contains("Triggered"), "{line}");
    }

    #[test]
    fn errors_take_precedence_in_status_line() {
        let mut view = ObserverView::new("bus1", AlarmPhase::Armed);
        view.last_error = Some(TrackingError::RemoteReadFailed("offline".into()));
        assert!(view.status_line().contains("remote read failed: offline"));
    }

    #[test]
    fn publisher_speed_defaults_to_zero() {
        let mut status = PublisherStatus::default();
        assert_eq!(status.speed_kmh(), 0.0);
        status.last_sample = Some(PositionSample::new(0.0, 0.0, 0).with_motion(5.0, 0.0));
        assert!((status.speed_kmh() - 18.0).abs() < 1e-9);
    }
}
