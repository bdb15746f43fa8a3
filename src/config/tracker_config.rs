//! Tracker Configuration - route, throttling, alarm and storage settings
//!
//! Every tunable number lives in this module. Each struct implements `Default`
//! with the values in [`super::defaults`], so an absent or partial config file
//! keeps the engine behaving exactly as shipped.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::types::{LocationAccuracy, WatchOptions};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "BUS_SENTRY_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sentry.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a tracked route.
///
/// Load with `TrackerConfig::load()` which searches:
/// 1. `$BUS_SENTRY_CONFIG` env var
/// 2. `./sentry.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    /// Which publisher document is tracked
    #[serde(default)]
    pub route: RouteConfig,

    /// Throttling applied to the vehicle's fixes before publication
    #[serde(default = "ThrottleConfig::publisher")]
    pub publisher: ThrottleConfig,

    /// Observer-side location watch and permissions
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Proximity alarm tuning
    #[serde(default)]
    pub alarm: AlarmConfig,

    /// Shared document store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Alert output
    #[serde(default)]
    pub actuator: ActuatorConfig,
}

impl TrackerConfig {
    /// Load configuration using the standard search order:
    /// 1. `$BUS_SENTRY_CONFIG` environment variable
    /// 2. `./sentry.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), route = %config.route.publisher_id, "Loaded tracker config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./sentry.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(route = %config.route.publisher_id, "Loaded tracker config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Range-check every section, collecting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let errors = super::validation::validate_ranges(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Route
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Document key of the tracked vehicle
    #[serde(default = "default_publisher_id")]
    pub publisher_id: String,

    /// Collection holding publisher documents
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_publisher_id() -> String {
    defaults::DEFAULT_PUBLISHER_ID.to_string()
}

fn default_collection() -> String {
    defaults::DEFAULT_COLLECTION.to_string()
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            publisher_id: default_publisher_id(),
            collection: default_collection(),
        }
    }
}

// ============================================================================
// Throttling
// ============================================================================

/// Which threshold lets a fix through the throttler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Emit when either the distance or the time threshold is met
    #[default]
    DistanceOrTime,
    /// Emit only on movement
    DistanceOnly,
    /// Emit only on elapsed time
    TimeOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    pub min_distance_meters: f64,
    pub min_time_millis: u64,
    pub desired_accuracy: LocationAccuracy,
    pub policy: ThrottlePolicy,
}

impl ThrottleConfig {
    /// Vehicle-side defaults: publish on 6 m of movement or every 3 s.
    pub fn publisher() -> Self {
        Self {
            min_distance_meters: defaults::PUBLISHER_MIN_DISTANCE_METERS,
            min_time_millis: defaults::PUBLISHER_MIN_TIME_MILLIS,
            desired_accuracy: LocationAccuracy::High,
            policy: ThrottlePolicy::DistanceOrTime,
        }
    }

    /// Observer-side defaults: 1 m or 1 s.
    pub fn observer() -> Self {
        Self {
            min_distance_meters: defaults::OBSERVER_MIN_DISTANCE_METERS,
            min_time_millis: defaults::OBSERVER_MIN_TIME_MILLIS,
            desired_accuracy: LocationAccuracy::High,
            policy: ThrottlePolicy::DistanceOrTime,
        }
    }

    /// Options handed to the location source when opening a watch.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            accuracy: self.desired_accuracy,
            min_time_millis: self.min_time_millis,
            min_distance_meters: self.min_distance_meters,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::publisher()
    }
}

// ============================================================================
// Observer
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObserverConfig {
    #[serde(default = "default_observer_distance")]
    pub min_distance_meters: f64,

    #[serde(default = "default_observer_time")]
    pub min_time_millis: u64,

    #[serde(default)]
    pub desired_accuracy: LocationAccuracy,

    #[serde(default)]
    pub policy: ThrottlePolicy,

    /// Refuse to start unless background location is granted
    #[serde(default = "default_true")]
    pub require_background_permission: bool,

    /// Stationary observer position used by the CLI when none is given
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_observer_distance() -> f64 {
    defaults::OBSERVER_MIN_DISTANCE_METERS
}

fn default_observer_time() -> u64 {
    defaults::OBSERVER_MIN_TIME_MILLIS
}

impl ObserverConfig {
    /// Throttle settings for the observer's own location watch.
    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            min_distance_meters: self.min_distance_meters,
            min_time_millis: self.min_time_millis,
            desired_accuracy: self.desired_accuracy,
            policy: self.policy,
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        let throttle = ThrottleConfig::observer();
        Self {
            min_distance_meters: throttle.min_distance_meters,
            min_time_millis: throttle.min_time_millis,
            desired_accuracy: throttle.desired_accuracy,
            policy: throttle.policy,
            require_background_permission: true,
            latitude: None,
            longitude: None,
        }
    }
}

// ============================================================================
// Alarm
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmConfig {
    /// Start subscriptions Armed (true) or Idle (false)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fire when the vehicle is strictly closer than this (metres)
    #[serde(default = "default_trigger")]
    pub trigger_distance_meters: f64,

    /// Local hour (0-23) at which an acknowledged alarm re-arms
    #[serde(default = "default_reset_hour")]
    pub reset_hour: u32,

    /// Longest cooldown sleep before re-reading the wall clock (seconds)
    #[serde(default = "default_recheck")]
    pub cooldown_recheck_secs: u64,
}

fn default_trigger() -> f64 {
    defaults::ALARM_TRIGGER_METERS
}

fn default_reset_hour() -> u32 {
    defaults::COOLDOWN_RESET_HOUR
}

fn default_recheck() -> u64 {
    defaults::COOLDOWN_RECHECK_SECS
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_distance_meters: default_trigger(),
            reset_hour: default_reset_hour(),
            cooldown_recheck_secs: default_recheck(),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local, lost on exit
    #[default]
    Memory,
    /// sled database; last-known positions survive restarts
    Sled,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sled" => Ok(StoreBackend::Sled),
            other => Err(format!("unknown store backend '{other}' (expected memory or sled)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_STORE_PATH)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: default_store_path(),
        }
    }
}

// ============================================================================
// Actuator
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActuatorConfig {
    /// Command (argv) started on alert and killed on stop, e.g.
    /// `["paplay", "alarm.ogg"]`. It is started again whenever it exits
    /// while the alert is active. Empty logs only.
    #[serde(default)]
    pub command: Vec<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({0:?}): {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({0:?}): {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}
