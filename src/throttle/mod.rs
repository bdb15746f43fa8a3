//! Position Throttler
//!
//! Drops fixes that are too close in space and time to the last emitted one,
//! so the shared channel only sees meaningful movement. The throttler keeps
//! no buffer: a rejected fix is gone.

use futures::StreamExt;

use crate::acquisition::PositionStream;
use crate::config::{ThrottleConfig, ThrottlePolicy};
use crate::proximity::distance_meters;
use crate::types::PositionSample;

/// Stateful filter over a sequence of fixes.
#[derive(Debug, Clone)]
pub struct PositionThrottler {
    config: ThrottleConfig,
    last_emitted: Option<PositionSample>,
    dropped: u64,
}

impl PositionThrottler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_emitted: None,
            dropped: 0,
        }
    }

    /// Decide whether `sample` passes. The first valid sample always does.
    ///
    /// Samples with out-of-range coordinates are dropped without touching
    /// the throttle state.
    pub fn accept(&mut self, sample: PositionSample) -> Option<PositionSample> {
        if !sample.is_valid() {
            tracing::warn!(%sample, "[Throttle] Dropping fix with invalid coordinates");
            self.dropped += 1;
            return None;
        }

        let Some(last) = self.last_emitted else {
            self.last_emitted = Some(sample);
            return Some(sample);
        };

        let moved = distance_meters(&last, &sample) >= self.config.min_distance_meters;
        // Clock steps backwards count as no time elapsed.
        let elapsed = sample.timestamp_millis.saturating_sub(last.timestamp_millis).max(0);
        #[allow(clippy::cast_sign_loss)]
        let waited = elapsed as u64 >= self.config.min_time_millis;

        let pass = match self.config.policy {
            ThrottlePolicy::DistanceOrTime => moved || waited,
            ThrottlePolicy::DistanceOnly => moved,
            ThrottlePolicy::TimeOnly => waited,
        };

        if pass {
            self.last_emitted = Some(sample);
            Some(sample)
        } else {
            self.dropped += 1;
            None
        }
    }

    /// Last sample that passed.
    pub fn last_emitted(&self) -> Option<&PositionSample> {
        self.last_emitted.as_ref()
    }

    /// Count of samples rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Lazily throttle a location stream.
///
/// Each call starts with a fresh throttler, so re-opening a watch restarts
/// the filter. The first error from the source is yielded once and ends the
/// stream.
pub fn throttle(source: PositionStream, config: ThrottleConfig) -> PositionStream {
    let state = Some((source, PositionThrottler::new(config)));
    futures::stream::unfold(state, |state| async move {
        let (mut source, mut throttler) = state?;
        loop {
            match source.next().await? {
                Ok(sample) => {
                    if let Some(emitted) = throttler.accept(sample) {
                        return Some((Ok(emitted), Some((source, throttler))));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, dropped = throttler.dropped(), "[Throttle] Source failed, ending stream");
                    return Some((Err(e), None));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LocationAccuracy, TrackingError};

    fn config(min_distance_meters: f64, min_time_millis: u64, policy: ThrottlePolicy) -> ThrottleConfig {
        ThrottleConfig {
            min_distance_meters,
            min_time_millis,
            desired_accuracy: LocationAccuracy::High,
            policy,
        }
    }

    /// ~1.1 m per 0.00001 degrees of latitude.
    fn fix(lat_offset_steps: u32, t: i64) -> PositionSample {
        PositionSample::new(10.0 + f64::from(lat_offset_steps) * 0.00001, 10.0, t)
    }

    #[test]
    fn first_sample_always_passes() {
        let mut throttler = PositionThrottler::new(ThrottleConfig::publisher());
        assert!(throttler.accept(fix(0, 0)).is_some());
    }

    #[test]
    fn small_quick_moves_are_dropped() {
        let mut throttler = PositionThrottler::new(config(6.0, 3_000, ThrottlePolicy::DistanceOrTime));
        throttler.accept(fix(0, 0));
        // ~2.2 m after 1 s
        assert!(throttler.accept(fix(2, 1_000)).is_none());
        // ~7.8 m from the last emitted fix
        assert!(throttler.accept(fix(7, 1_500)).is_some());
        // no movement but 3 s since the last emitted fix
        assert!(throttler.accept(fix(7, 4_500)).is_some());
        assert_eq!(throttler.dropped(), 1);
    }

    #[test]
    fn distance_is_measured_from_last_emitted_not_last_seen() {
        let mut throttler = PositionThrottler::new(config(6.0, 60_000, ThrottlePolicy::DistanceOrTime));
        throttler.accept(fix(0, 0));
        for step in 1..=5 {
            assert!(throttler.accept(fix(step, i64::from(step))).is_none());
        }
        // Cumulative ~6.7 m from the emitted origin
        assert!(throttler.accept(fix(6, 6)).is_some());
    }

    #[test]
    fn single_criterion_policies() {
        let mut distance_only = PositionThrottler::new(config(6.0, 1_000, ThrottlePolicy::DistanceOnly));
        distance_only.accept(fix(0, 0));
        assert!(distance_only.accept(fix(0, 60_000)).is_none());

        let mut time_only = PositionThrottler::new(config(6.0, 1_000, ThrottlePolicy::TimeOnly));
        time_only.accept(fix(0, 0));
        assert!(time_only.accept(fix(100, 10)).is_none());
        assert!(time_only.accept(fix(100, 1_000)).is_some());
    }

    #[test]
    fn backwards_clock_counts_as_no_elapsed_time() {
        let mut throttler = PositionThrottler::new(config(6.0, 1_000, ThrottlePolicy::DistanceOrTime));
        throttler.accept(fix(0, 10_000));
        assert!(throttler.accept(fix(0, 0)).is_none());
    }

    #[test]
    fn invalid_coordinates_are_dropped() {
        let mut throttler = PositionThrottler::new(ThrottleConfig::publisher());
        assert!(throttler.accept(PositionSample::new(120.0, 0.0, 0)).is_none());
        assert!(throttler.last_emitted().is_none());
    }

    #[test]
    fn emitted_pairs_respect_distance_unless_time_elapsed() {
        let cfg = config(6.0, 3_000, ThrottlePolicy::DistanceOrTime);
        let mut throttler = PositionThrottler::new(cfg);
        let mut emitted = Vec::new();
        // Jittery walk: small steps, occasional jumps, uneven timing.
        let offsets = [0, 1, 3, 2, 9, 10, 10, 11, 25, 24, 24, 26, 40];
        for (i, offset) in offsets.iter().enumerate() {
            let t = i64::try_from(i).unwrap() * 700;
            if let Some(s) = throttler.accept(fix(*offset, t)) {
                emitted.push(s);
            }
        }
        for pair in emitted.windows(2) {
            let d = distance_meters(&pair[0], &pair[1]);
            let dt = pair[1].timestamp_millis - pair[0].timestamp_millis;
            assert!(d >= cfg.min_distance_meters || dt >= 3_000, "d={d} dt={dt}");
        }
    }

    #[tokio::test]
    async fn adaptor_yields_error_once_then_ends() {
        let items = vec![
            Ok(fix(0, 0)),
            Ok(fix(1, 10)),
            Err(TrackingError::LocationUnavailable("gps lost".into())),
            Ok(fix(50, 20)),
        ];
        let source = futures::stream::iter(items).boxed();
        let out: Vec<_> = throttle(source, ThrottleConfig::publisher()).collect().await;

        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert_eq!(out[1], Err(TrackingError::LocationUnavailable("gps lost".into())));
    }

    #[test]
    fn adaptor_restarts_state_per_call() {
        let make = || futures::stream::iter(vec![Ok(fix(0, 0)), Ok(fix(0, 1))]).boxed();
        let first: Vec<_> = tokio_test::block_on(throttle(make(), ThrottleConfig::publisher()).collect());
        let second: Vec<_> = tokio_test::block_on(throttle(make(), ThrottleConfig::publisher()).collect());
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }
}
