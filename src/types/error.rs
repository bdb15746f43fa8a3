//! Engine-wide error taxonomy
//!
//! Module errors (store, channel, actuator, config) convert into
//! [`TrackingError`] at the lifecycle coordinator boundary, where they are
//! logged, surfaced to the presentation layer, and made retryable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which location permission grant was requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    Foreground,
    Background,
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionScope::Foreground => write!(f, "foreground"),
            PermissionScope::Background => write!(f, "background"),
        }
    }
}

/// Errors surfaced by the tracking engine.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingError {
    /// Location permission refused; the session cannot track and does not retry.
    #[error("{scope} location permission denied")]
    PermissionDenied { scope: PermissionScope },

    /// Transient location source failure; manual retry only.
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("remote write failed: {0}")]
    RemoteWriteFailed(String),

    #[error("remote read failed: {0}")]
    RemoteReadFailed(String),

    /// Sound or vibration could not be driven. Never blocks a state transition.
    #[error("actuator failure: {0}")]
    ActuatorFailure(String),
}

impl TrackingError {
    /// Whether a retry action makes sense for this error.
    ///
    /// Permission refusals are fatal for the session.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TrackingError::PermissionDenied { .. })
    }
}
