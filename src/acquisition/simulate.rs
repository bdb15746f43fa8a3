//! Synthetic approach track for demos.
//!
//! Generates a vehicle path that starts a few kilometres north of the
//! observer and drives straight towards it, with small GPS jitter on every
//! fix.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::defaults::{SIMULATION_JITTER_DEG, SIMULATION_STEPS};
use crate::types::PositionSample;

/// Metres per degree of latitude (approximately constant).
const METERS_PER_DEG_LAT: f64 = 111_195.0;

/// Where the simulated vehicle starts, in metres north of the observer.
const START_OFFSET_METERS: f64 = 3_000.0;

/// Build a track from `START_OFFSET_METERS` north of `(lat, lon)` to the
/// observer itself. Timestamps are left at 0 so the replay source stamps
/// them with the wall clock.
///
/// `seed` makes the jitter reproducible.
pub fn approach_track(lat: f64, lon: f64, seed: Option<u64>) -> Vec<PositionSample> {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let steps = SIMULATION_STEPS.max(2);
    let start_lat = lat + START_OFFSET_METERS / METERS_PER_DEG_LAT;
    let step_meters = START_OFFSET_METERS / (steps - 1) as f64;

    (0..steps)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let progress = i as f64 / (steps - 1) as f64;
            let jitter_lat = rng.gen_range(-SIMULATION_JITTER_DEG..=SIMULATION_JITTER_DEG);
            let jitter_lon = rng.gen_range(-SIMULATION_JITTER_DEG..=SIMULATION_JITTER_DEG);
            PositionSample::new(
                start_lat + (lat - start_lat) * progress + jitter_lat,
                lon + jitter_lon,
                0,
            )
            // Heading due south, speed as if one step per base delay.
            .with_motion(step_meters / 3.0, 180.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proximity::distance_meters;

    #[test]
    fn track_approaches_the_observer() {
        let observer = PositionSample::new(10.0, 10.0, 0);
        let track = approach_track(10.0, 10.0, Some(7));
        assert_eq!(track.len(), SIMULATION_STEPS);

        let first = distance_meters(&track[0], &observer);
        let last = distance_meters(&track[track.len() - 1], &observer);
        assert!(first > 2_900.0, "start {first}");
        assert!(last < 10.0, "end {last}");
    }

    #[test]
    fn seeded_tracks_are_reproducible() {
        assert_eq!(approach_track(1.0, 1.0, Some(3)), approach_track(1.0, 1.0, Some(3)));
    }
}
