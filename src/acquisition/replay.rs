//! Replayed tracks: pre-loaded CSV / JSON fixes and JSON lines from stdin.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

use super::source::{LocationSource, PositionStream};
use crate::types::{PermissionScope, PositionSample, TrackingError, WatchOptions};

// ============================================================================
// Replay Source (file / synthetic track)
// ============================================================================

/// Replays pre-loaded fixes with an optional inter-fix delay.
///
/// Every `watch()` restarts the track from the beginning. Fixes loaded
/// without a timestamp (0) are stamped with the wall clock when emitted.
pub struct ReplaySource {
    samples: Vec<PositionSample>,
    delay_ms: u64,
}

impl ReplaySource {
    pub fn new(samples: Vec<PositionSample>, delay_ms: u64) -> Self {
        Self { samples, delay_ms }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[async_trait]
impl LocationSource for ReplaySource {
    async fn request_permission(&self, _scope: PermissionScope) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn current_position(&self) -> Result<PositionSample, TrackingError> {
        self.samples
            .first()
            .copied()
            .map(stamp_if_missing)
            .ok_or_else(|| TrackingError::LocationUnavailable("replay track is empty".to_string()))
    }

    async fn watch(&self, _options: WatchOptions) -> Result<PositionStream, TrackingError> {
        let delay_ms = self.delay_ms;
        let state = (self.samples.clone().into_iter(), false);
        let stream = futures::stream::unfold(state, move |(mut samples, yielded_first)| async move {
            // No delay before the first fix.
            if yielded_first && delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            let sample = samples.next()?;
            Some((Ok(stamp_if_missing(sample)), (samples, true)))
        });
        Ok(stream.boxed())
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

fn stamp_if_missing(mut sample: PositionSample) -> PositionSample {
    if sample.timestamp_millis == 0 {
        sample.timestamp_millis = chrono::Utc::now().timestamp_millis();
    }
    sample
}

// ============================================================================
// Track Loading
// ============================================================================

/// Load a track from disk.
///
/// `.json` / `.jsonl` files hold one JSON fix per line; anything else is read
/// as CSV with a header naming at least `latitude` and `longitude` (aliases
/// `lat`, `lon`, `lng`). Optional columns: `timestamp`, `speed`, `heading`.
pub fn load_track(path: impl AsRef<Path>) -> Result<Vec<PositionSample>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read track {}", path.display()))?;

    let is_json = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "jsonl" | "ndjson")
    );
    let samples = if is_json {
        parse_json_lines(&contents)?
    } else {
        parse_csv(&contents)?
    };

    tracing::info!(file = %path.display(), fixes = samples.len(), "Loaded track");
    Ok(samples)
}

/// Parse one JSON fix per non-empty line.
pub fn parse_json_lines(contents: &str) -> Result<Vec<PositionSample>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<PositionSample>(line)
                .with_context(|| format!("line {}: invalid fix", i + 1))
        })
        .collect()
}

/// Column positions discovered from a CSV header.
#[derive(Debug, Default)]
struct ColumnMap {
    latitude: Option<usize>,
    longitude: Option<usize>,
    timestamp: Option<usize>,
    speed: Option<usize>,
    heading: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &str) -> Self {
        let mut map = Self::default();
        for (i, name) in header.split(',').enumerate() {
            match name.trim().to_ascii_lowercase().as_str() {
                "latitude" | "lat" => map.latitude = Some(i),
                "longitude" | "lon" | "lng" => map.longitude = Some(i),
                "timestamp" | "timestamp_millis" | "time" => map.timestamp = Some(i),
                "speed" | "speed_mps" => map.speed = Some(i),
                "heading" | "heading_deg" => map.heading = Some(i),
                _ => {}
            }
        }
        map
    }
}

/// Parse a CSV track with a header row.
pub fn parse_csv(contents: &str) -> Result<Vec<PositionSample>> {
    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| anyhow!("empty track file"))?;
    let columns = ColumnMap::from_header(header);
    let (Some(lat_col), Some(lon_col)) = (columns.latitude, columns.longitude) else {
        return Err(anyhow!("track header must name latitude and longitude columns"));
    };

    let mut samples = Vec::new();
    for (row, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let number = |col: Option<usize>| -> Option<f64> {
            col.and_then(|c| fields.get(c)).and_then(|v| v.parse::<f64>().ok())
        };

        let (Some(latitude), Some(longitude)) = (number(Some(lat_col)), number(Some(lon_col))) else {
            tracing::warn!(row = row + 2, "Skipping track row without numeric coordinates");
            continue;
        };

        #[allow(clippy::cast_possible_truncation)]
        let timestamp_millis = number(columns.timestamp).map_or(0, |t| t as i64);
        let mut sample = PositionSample::new(latitude, longitude, timestamp_millis);
        sample.speed_mps = number(columns.speed);
        sample.heading_deg = number(columns.heading);
        samples.push(sample);
    }

    if samples.is_empty() {
        return Err(anyhow!("track contains no usable fixes"));
    }
    Ok(samples)
}

// ============================================================================
// Stdin Source (JSON fixes, one per line)
// ============================================================================

/// Reads JSON-formatted fixes from stdin.
///
/// Stdin can only be consumed once, so only the first `watch()` succeeds.
pub struct StdinSource {
    reader: Mutex<Option<BufReader<Stdin>>>,
    last: Arc<Mutex<Option<PositionSample>>>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(Some(BufReader::new(tokio::io::stdin()))),
            last: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSource for StdinSource {
    async fn request_permission(&self, _scope: PermissionScope) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn current_position(&self) -> Result<PositionSample, TrackingError> {
        self.last
            .lock()
            .map_err(|e| TrackingError::LocationUnavailable(e.to_string()))?
            .ok_or_else(|| TrackingError::LocationUnavailable("no fix read from stdin yet".to_string()))
    }

    async fn watch(&self, _options: WatchOptions) -> Result<PositionStream, TrackingError> {
        let reader = self
            .reader
            .lock()
            .map_err(|e| TrackingError::LocationUnavailable(e.to_string()))?
            .take()
            .ok_or_else(|| TrackingError::LocationUnavailable("stdin already consumed".to_string()))?;

        let last = Arc::clone(&self.last);
        let stream = futures::stream::unfold(reader, move |mut reader| {
            let last = Arc::clone(&last);
            async move {
                let item = next_fix(&mut reader).await?;
                if let (Ok(sample), Ok(mut slot)) = (&item, last.lock()) {
                    *slot = Some(*sample);
                }
                Some((item, reader))
            }
        });
        Ok(stream.boxed())
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

/// Read lines until one parses as a fix. `None` at end of input.
async fn next_fix(reader: &mut BufReader<Stdin>) -> Option<Result<PositionSample, TrackingError>> {
    let mut line = String::with_capacity(256);
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(TrackingError::LocationUnavailable(e.to_string()))),
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<PositionSample>(trimmed) {
            Ok(sample) => return Some(Ok(stamp_if_missing(sample))),
            Err(e) => {
                // Skip malformed lines and keep reading
                tracing::warn!("[StdinSource] Failed to parse fix: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_with_aliases_and_optional_columns() {
        let csv = "time,lat,lng,speed\n1000,10.0,10.0,4.5\n2000,10.001,10.0,\nbad,row\n";
        let samples = parse_csv(csv).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp_millis, 1000);
        assert_eq!(samples[0].speed_mps, Some(4.5));
        assert_eq!(samples[1].speed_mps, None);
        assert_eq!(samples[1].latitude, 10.001);
    }

    #[test]
    fn csv_without_coordinate_columns_is_rejected() {
        assert!(parse_csv("a,b\n1,2\n").is_err());
    }

    #[test]
    fn json_lines_skip_blank_lines() {
        let text = "{\"latitude\":1.0,\"longitude\":2.0,\"timestamp_millis\":5}\n\n{\"latitude\":1.5,\"longitude\":2.5,\"timestamp\":6}\n";
        let samples = parse_json_lines(text).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].timestamp_millis, 6);
    }

    #[tokio::test]
    async fn replay_restarts_on_every_watch() {
        let track = vec![
            PositionSample::new(1.0, 1.0, 10),
            PositionSample::new(2.0, 2.0, 20),
        ];
        let source = ReplaySource::new(track, 0);

        let first: Vec<_> = source.watch(WatchOptions::default()).await.unwrap().collect().await;
        let second: Vec<_> = source.watch(WatchOptions::default()).await.unwrap().collect().await;
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn replay_stamps_missing_timestamps() {
        let source = ReplaySource::new(vec![PositionSample::new(1.0, 1.0, 0)], 0);
        let fix = source.current_position().await.unwrap();
        assert!(fix.timestamp_millis > 0);
    }
}
