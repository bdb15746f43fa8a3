//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Unknown keys are reported as warnings and never break a config file.
//! Out-of-range values are hard errors collected by [`validate_ranges`].

use std::collections::HashSet;

use super::TrackerConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ": did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for TrackerConfig.
///
/// Any new field added to TrackerConfig must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [route]
        "route",
        "route.publisher_id",
        "route.collection",
        // [publisher]
        "publisher",
        "publisher.min_distance_meters",
        "publisher.min_time_millis",
        "publisher.desired_accuracy",
        "publisher.policy",
        // [observer]
        "observer",
        "observer.min_distance_meters",
        "observer.min_time_millis",
        "observer.desired_accuracy",
        "observer.policy",
        "observer.require_background_permission",
        "observer.latitude",
        "observer.longitude",
        // [alarm]
        "alarm",
        "alarm.enabled",
        "alarm.trigger_distance_meters",
        "alarm.reset_hour",
        "alarm.cooldown_recheck_secs",
        // [store]
        "store",
        "store.backend",
        "store.path",
        // [actuator]
        "actuator",
        "actuator.command",
    ];
    keys.iter().copied().collect()
}

/// Walk a TOML value and return every dotted key path it contains.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Check every numeric setting for a sensible range.
///
/// Returns one message per problem; an empty vector means the config is valid.
pub fn validate_ranges(config: &TrackerConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.route.publisher_id.trim().is_empty() {
        errors.push("route.publisher_id must not be empty".to_string());
    }
    if config.route.collection.trim().is_empty() {
        errors.push("route.collection must not be empty".to_string());
    }

    check_non_negative(config.publisher.min_distance_meters, "publisher.min_distance_meters", &mut errors);
    check_non_negative(config.observer.min_distance_meters, "observer.min_distance_meters", &mut errors);

    match (config.observer.latitude, config.observer.longitude) {
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) {
                errors.push(format!("observer.latitude ({lat}) must be within [-90, 90]"));
            }
            if !(-180.0..=180.0).contains(&lon) {
                errors.push(format!("observer.longitude ({lon}) must be within [-180, 180]"));
            }
        }
        (None, None) => {}
        _ => errors.push("observer.latitude and observer.longitude must be set together".to_string()),
    }

    let alarm = &config.alarm;
    if !(alarm.trigger_distance_meters.is_finite() && alarm.trigger_distance_meters > 0.0) {
        errors.push(format!(
            "alarm.trigger_distance_meters ({}) must be greater than zero",
            alarm.trigger_distance_meters
        ));
    }
    if alarm.reset_hour > 23 {
        errors.push(format!("alarm.reset_hour ({}) must be within 0-23", alarm.reset_hour));
    }
    if alarm.cooldown_recheck_secs == 0 {
        errors.push("alarm.cooldown_recheck_secs must be at least 1".to_string());
    }

    if config.store.path.as_os_str().is_empty() {
        errors.push("store.path must not be empty".to_string());
    }

    errors
}

fn check_non_negative(value: f64, field: &str, errors: &mut Vec<String>) {
    if !(value.is_finite() && value >= 0.0) {
        errors.push(format!("{field} ({value}) must be a non-negative number"));
    }
}
