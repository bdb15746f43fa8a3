//! Alarm phases, alarm state and presentational distance zones

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Alarm State
// ============================================================================

/// Phase of one observer's proximity alarm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum AlarmPhase {
    /// Alarm disabled; proximity is tracked but never fires
    Idle,
    /// Waiting for the vehicle to come within the trigger distance
    #[default]
    Armed,
    /// Alert is sounding until the observer acknowledges it
    Triggered,
    /// Acknowledged; ignored until the next daily reset
    Suppressed,
}

impl std::fmt::Display for AlarmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmPhase::Idle => write!(f, "Idle"),
            AlarmPhase::Armed => write!(f, "Armed"),
            AlarmPhase::Triggered => write!(f, "Triggered"),
            AlarmPhase::Suppressed => write!(f, "Suppressed"),
        }
    }
}

/// Alarm state owned by a single subscription.
///
/// `suppressed_until` is an absolute wall-clock deadline and is only set while
/// the phase is [`AlarmPhase::Suppressed`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AlarmState {
    pub phase: AlarmPhase,
    pub suppressed_until: Option<DateTime<Utc>>,
}

impl AlarmState {
    pub fn armed() -> Self {
        Self {
            phase: AlarmPhase::Armed,
            suppressed_until: None,
        }
    }

    pub fn idle() -> Self {
        Self {
            phase: AlarmPhase::Idle,
            suppressed_until: None,
        }
    }
}

// ============================================================================
// Zone
// ============================================================================

/// Presentational distance bucket. Never an input to the alarm logic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Zone {
    /// Closer than 500 m
    Near,
    /// 500 m up to 1 km
    Caution,
    /// 1 km or more
    Far,
}

impl Zone {
    /// Display colour used by the map overlay.
    pub fn color(&self) -> &'static str {
        match self {
            Zone::Near => "green",
            Zone::Caution => "yellow",
            Zone::Far => "red",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Near => write!(f, "Near"),
            Zone::Caution => write!(f, "Caution"),
            Zone::Far => write!(f, "Far"),
        }
    }
}
