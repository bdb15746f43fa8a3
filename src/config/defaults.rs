//! System-wide default constants.
//!
//! Centralises the numbers the engine was tuned with. Grouped by subsystem.

// ============================================================================
// Route
// ============================================================================

/// Publisher id used when no route is configured.
pub const DEFAULT_PUBLISHER_ID: &str = "bus1";

/// Document collection holding one document per publisher.
pub const DEFAULT_COLLECTION: &str = "buses";

// ============================================================================
// Proximity
// ============================================================================

/// Mean Earth radius used by the haversine formula (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Upper bound of the `Near` display zone (metres, exclusive).
pub const NEAR_ZONE_METERS: f64 = 500.0;

/// Upper bound of the `Caution` display zone (metres, exclusive).
pub const CAUTION_ZONE_METERS: f64 = 1000.0;

/// Distance below which the alarm fires (metres, exclusive).
pub const ALARM_TRIGGER_METERS: f64 = 1000.0;

// ============================================================================
// Throttling
// ============================================================================

/// Publisher: minimum movement between published fixes (metres).
pub const PUBLISHER_MIN_DISTANCE_METERS: f64 = 6.0;

/// Publisher: minimum interval between published fixes (ms).
pub const PUBLISHER_MIN_TIME_MILLIS: u64 = 3_000;

/// Observer: minimum movement between own fixes (metres).
pub const OBSERVER_MIN_DISTANCE_METERS: f64 = 1.0;

/// Observer: minimum interval between own fixes (ms).
pub const OBSERVER_MIN_TIME_MILLIS: u64 = 1_000;

// ============================================================================
// Alarm
// ============================================================================

/// Local hour at which an acknowledged alarm re-arms.
pub const COOLDOWN_RESET_HOUR: u32 = 4;

/// Longest single sleep of the cooldown timer before it re-reads the wall clock (seconds).
pub const COOLDOWN_RECHECK_SECS: u64 = 60;

/// Vibration pattern played while triggered (ms on/off, repeating).
pub const VIBRATION_PATTERN_MS: [u64; 3] = [500, 500, 500];

// ============================================================================
// Channels
// ============================================================================

/// Per-publisher broadcast capacity in the in-memory store.
///
/// A subscriber that lags further than this re-reads the current document.
pub const STORE_BROADCAST_CAPACITY: usize = 64;

/// Command queue depth for a subscription handle.
pub const SUBSCRIPTION_COMMAND_CAPACITY: usize = 16;

// ============================================================================
// Storage
// ============================================================================

/// Default sled database path for the persistent store backend.
pub const DEFAULT_STORE_PATH: &str = "./data/locations.db";

// ============================================================================
// Simulation
// ============================================================================

/// Base delay denominator for `--speed` flag.
///
/// `delay_ms = SIMULATION_BASE_DELAY_MS / speed`
pub const SIMULATION_BASE_DELAY_MS: u64 = 3_000;

/// Number of synthetic fixes along the simulated approach path.
pub const SIMULATION_STEPS: usize = 60;

/// Standard deviation-ish jitter applied to synthetic fixes (degrees).
pub const SIMULATION_JITTER_DEG: f64 = 0.00002;

/// Observer latitude used by the CLI when neither flags nor config give one.
pub const DEMO_OBSERVER_LATITUDE: f64 = 10.0;

/// Observer longitude used by the CLI when neither flags nor config give one.
pub const DEMO_OBSERVER_LONGITUDE: f64 = 10.0;
