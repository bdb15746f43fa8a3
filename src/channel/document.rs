//! Publisher document codec.
//!
//! Wire shape, one JSON object per publisher:
//!
//! ```json
//! {"latitude": 10.0, "longitude": 10.0, "timestamp": "2024-05-01T07:30:00.000Z",
//!  "speed": 0, "heading": 0}
//! ```
//!
//! Other fields already present in a stored document are left alone by a
//! merge write.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use super::ChannelError;
use crate::types::PositionSample;

/// A stored document body.
pub type Document = Map<String, Value>;

pub const FIELD_LATITUDE: &str = "latitude";
pub const FIELD_LONGITUDE: &str = "longitude";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_SPEED: &str = "speed";
pub const FIELD_HEADING: &str = "heading";

/// Encode the geolocation fields of a sample. Missing speed and heading are
/// written as 0.
pub fn encode(sample: &PositionSample) -> Document {
    let mut doc = Map::new();
    doc.insert(FIELD_LATITUDE.into(), Value::from(sample.latitude));
    doc.insert(FIELD_LONGITUDE.into(), Value::from(sample.longitude));
    doc.insert(
        FIELD_TIMESTAMP.into(),
        Value::from(format_timestamp(sample.timestamp_millis)),
    );
    doc.insert(FIELD_SPEED.into(), Value::from(sample.speed_mps.unwrap_or(0.0)));
    doc.insert(FIELD_HEADING.into(), Value::from(sample.heading_deg.unwrap_or(0.0)));
    doc
}

/// Decode a document into a sample.
///
/// Latitude and longitude must be present and numeric. The timestamp may be
/// an ISO-8601 string or epoch milliseconds; anything else decodes as 0.
pub fn decode(publisher_id: &str, doc: &Document) -> Result<PositionSample, ChannelError> {
    let coordinate = |field: &str| {
        doc.get(field)
            .and_then(Value::as_f64)
            .ok_or_else(|| ChannelError::MalformedDocument {
                publisher_id: publisher_id.to_string(),
                reason: format!("missing or non-numeric '{field}'"),
            })
    };

    let latitude = coordinate(FIELD_LATITUDE)?;
    let longitude = coordinate(FIELD_LONGITUDE)?;
    let timestamp_millis = doc.get(FIELD_TIMESTAMP).map_or(0, parse_timestamp);

    Ok(PositionSample {
        latitude,
        longitude,
        timestamp_millis,
        speed_mps: doc.get(FIELD_SPEED).and_then(Value::as_f64),
        heading_deg: doc.get(FIELD_HEADING).and_then(Value::as_f64),
    })
}

/// ISO-8601 UTC with millisecond precision and a `Z` suffix.
pub fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &Value) -> i64 {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).map_or(0, |t| t.timestamp_millis()),
        Value::Number(n) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

/// Overlay `update` onto `base`, replacing fields `update` names.
pub fn merge(base: &mut Document, update: Document) {
    for (k, v) in update {
        base.insert(k, v);
    }
}
