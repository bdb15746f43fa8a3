//! Engine Integration Tests
//!
//! Drives the lifecycle coordinator end to end with driven location sources,
//! a settable clock and a recording actuator over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;
use futures::StreamExt;
use tokio::sync::watch;

use bus_sentry::acquisition::{LocationSource, ManualSource};
use bus_sentry::alarm::{Actuator, ActuatorCall, Clock, ManualClock, RecordingActuator};
use bus_sentry::channel::document::Document;
use bus_sentry::channel::{
    DocumentStream, InMemoryStore, RemoteStore, SharedLocationChannel, StoreError, StoredDocument,
};
use bus_sentry::config::TrackerConfig;
use bus_sentry::pipeline::{LifecycleCoordinator, ObserverView, SessionError};
use bus_sentry::types::{AlarmPhase, PermissionScope, PositionSample, TrackingError, Zone};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    coordinator: LifecycleCoordinator,
    vehicle: Arc<ManualSource>,
    observer: Arc<ManualSource>,
    actuator: Arc<RecordingActuator>,
    store: Arc<InMemoryStore>,
}

fn harness_with(config: TrackerConfig, clock: Option<Arc<ManualClock>>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let channel = SharedLocationChannel::new(Arc::clone(&store) as Arc<dyn RemoteStore>, config.route.collection.clone());
    let vehicle = Arc::new(ManualSource::new());
    let observer = Arc::new(ManualSource::at(10.0, 10.0));
    let actuator = Arc::new(RecordingActuator::new());

    let mut coordinator = LifecycleCoordinator::new(config, channel)
        .with_publisher_source(Arc::clone(&vehicle) as Arc<dyn LocationSource>)
        .with_observer_source(Arc::clone(&observer) as Arc<dyn LocationSource>)
        .with_actuator(Arc::clone(&actuator) as Arc<dyn Actuator>);
    if let Some(clock) = clock {
        coordinator = coordinator.with_clock(clock as Arc<dyn Clock>);
    }

    Harness {
        coordinator,
        vehicle,
        observer,
        actuator,
        store,
    }
}

fn harness() -> Harness {
    harness_with(TrackerConfig::default(), None)
}

fn fix(lat: f64, lon: f64, millis: i64) -> PositionSample {
    PositionSample::new(lat, lon, millis)
}

/// Wait until the view satisfies `pred`, failing the test after a timeout.
async fn wait_view(
    view: &mut watch::Receiver<ObserverView>,
    what: &str,
    pred: impl FnMut(&ObserverView) -> bool,
) -> ObserverView {
    let seen = match tokio::time::timeout(WAIT, view.wait_for(pred)).await {
        Ok(Ok(v)) => Some(v.clone()),
        Ok(Err(_)) => panic!("view closed while waiting for {what}"),
        Err(_) => None,
    };
    seen.unwrap_or_else(|| panic!("timed out waiting for {what}: {:?}", view.borrow().clone()))
}

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn approaching_vehicle_triggers_alarm_exactly_once() {
    let h = harness();
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    h.vehicle.push(fix(10.000, 10.000, 1_000));
    let v = wait_view(&mut view, "first vehicle update", |v| v.vehicle_seq == Some(1)).await;
    assert_eq!(v.alarm_phase, AlarmPhase::Triggered);
    assert_eq!(v.zone, Some(Zone::Near));

    h.vehicle.push(fix(10.005, 10.000, 5_000));
    let v = wait_view(&mut view, "second vehicle update", |v| v.vehicle_seq == Some(2)).await;
    let distance = v.distance_meters.unwrap();
    assert!(distance < 1000.0, "distance {distance}");
    assert!((distance - 556.0).abs() < 5.0, "distance {distance}");
    assert_eq!(v.zone, Some(Zone::Caution));
    assert_eq!(v.alarm_phase, AlarmPhase::Triggered);

    assert_eq!(h.actuator.starts(), 1);
    assert_eq!(h.actuator.stops(), 0);

    let status = h.coordinator.publisher_status().await;
    assert!(status.tracking);
    assert_eq!(status.published_count, 2);
    assert_eq!(status.last_seq, Some(2));

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn far_vehicle_stays_armed_until_it_crosses_the_trigger() {
    let h = harness();
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    h.vehicle.push(fix(10.020, 10.000, 0));
    let v = wait_view(&mut view, "far update", |v| v.vehicle_seq == Some(1)).await;
    assert_eq!(v.zone, Some(Zone::Far));
    assert_eq!(v.alarm_phase, AlarmPhase::Armed);
    assert_eq!(h.actuator.starts(), 0);

    h.vehicle.push(fix(10.008, 10.000, 4_000));
    h.vehicle.push(fix(10.006, 10.000, 8_000));
    let v = wait_view(&mut view, "close updates", |v| v.vehicle_seq == Some(3)).await;
    assert_eq!(v.alarm_phase, AlarmPhase::Triggered);
    assert_eq!(h.actuator.starts(), 1);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn observer_without_vehicle_data_reports_it() {
    let h = harness();
    let view = h.coordinator.start_observer().await.unwrap();
    let v = view.borrow().clone();
    assert!(v.vehicle.is_none());
    assert!(v.status_line().contains("no location data available"));
    assert_eq!(v.alarm_phase, AlarmPhase::Armed);
    assert_eq!(v.observer, Some(fix(10.0, 10.0, 0)));
    h.coordinator.shutdown().await;
}

// ============================================================================
// Cancellation and lifecycle
// ============================================================================

#[tokio::test]
async fn stopping_observer_while_triggered_stops_the_alert() {
    let h = harness();
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    h.vehicle.push(fix(10.001, 10.000, 0));
    wait_view(&mut view, "trigger", |v| v.alarm_phase == AlarmPhase::Triggered).await;

    h.coordinator.stop_observer().await;
    assert_eq!(h.actuator.calls(), vec![ActuatorCall::Start, ActuatorCall::Stop]);
    assert!(!view.borrow().active);
    assert_eq!(h.store.listener_count("buses", "bus1"), 0);

    // Nothing reaches the actuator after teardown.
    h.vehicle.push(fix(10.0005, 10.000, 5_000));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.actuator.calls().len(), 2);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let h = harness();
    h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_observer().await.unwrap();
    assert_eq!(h.store.listener_count("buses", "bus1"), 1);

    h.coordinator.start_publisher().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;
    assert_eq!(h.vehicle.watcher_count(), 1);
    assert!(h.coordinator.is_publishing().await);
    assert!(h.coordinator.is_observing().await);

    h.coordinator.stop_publisher().await;
    h.coordinator.stop_publisher().await;
    h.coordinator.stop_observer().await;
    h.coordinator.stop_observer().await;

    assert!(!h.coordinator.is_publishing().await);
    assert!(!h.coordinator.is_observing().await);
    assert_eq!(h.vehicle.watcher_count(), 0);
    assert_eq!(h.store.listener_count("buses", "bus1"), 0);
    assert!(!h.coordinator.publisher_status().await.tracking);
}

#[tokio::test]
async fn commands_without_observer_are_rejected() {
    let h = harness();
    let err = h.coordinator.stop_alarm().await.unwrap_err();
    assert!(matches!(err, SessionError::NotRunning("observer")));
}

#[tokio::test]
async fn resume_reattaches_a_single_feed() {
    let h = harness();
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    h.coordinator.suspend().await.unwrap();
    wait_view(&mut view, "suspended", |v| v.suspended).await;

    // Tracking continues in the background.
    h.vehicle.push(fix(10.020, 10.000, 0));
    wait_view(&mut view, "background update", |v| v.vehicle_seq == Some(1)).await;

    h.coordinator.resume().await.unwrap();
    let v = wait_view(&mut view, "resumed", |v| !v.suspended).await;
    assert_eq!(v.vehicle_seq, Some(1));
    assert_eq!(h.store.listener_count("buses", "bus1"), 1);

    h.vehicle.push(fix(10.019, 10.000, 4_000));
    let v = wait_view(&mut view, "update after resume", |v| v.vehicle_seq == Some(2)).await;
    assert_eq!(v.alarm_phase, AlarmPhase::Armed);

    h.coordinator.shutdown().await;
}

// ============================================================================
// Cooldown
// ============================================================================

#[tokio::test]
async fn acknowledged_alarm_rearms_after_the_daily_reset() {
    let clock = Arc::new(ManualClock::at_utc(2026, 3, 10, 23, 30).unwrap());
    let h = harness_with(TrackerConfig::default(), Some(Arc::clone(&clock)));
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    h.vehicle.push(fix(10.001, 10.000, 0));
    wait_view(&mut view, "trigger", |v| v.alarm_phase == AlarmPhase::Triggered).await;

    h.coordinator.stop_alarm().await.unwrap();
    let v = wait_view(&mut view, "suppressed", |v| v.alarm_phase == AlarmPhase::Suppressed).await;
    let expected = chrono::Utc.with_ymd_and_hms(2026, 3, 11, 4, 0, 0).unwrap();
    assert_eq!(v.suppressed_until, Some(expected));
    assert_eq!(h.actuator.calls(), vec![ActuatorCall::Start, ActuatorCall::Stop]);

    // Still suppressed: close fixes are ignored.
    h.vehicle.push(fix(10.0005, 10.000, 4_000));
    wait_view(&mut view, "update while suppressed", |v| v.vehicle_seq == Some(2)).await;
    assert_eq!(h.actuator.starts(), 1);

    // Host slept through the reset; resume re-checks the wall clock.
    clock.set(expected + chrono::Duration::minutes(5));
    h.coordinator.resume().await.unwrap();
    let v = wait_view(&mut view, "re-armed", |v| v.alarm_phase == AlarmPhase::Armed).await;
    assert!(v.suppressed_until.is_none());

    h.vehicle.push(fix(10.001, 10.000, 8_000));
    wait_view(&mut view, "second trigger", |v| v.alarm_phase == AlarmPhase::Triggered).await;
    assert_eq!(h.actuator.starts(), 2);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn disabled_alarm_never_sounds() {
    let mut config = TrackerConfig::default();
    config.alarm.enabled = false;
    let h = harness_with(config, None);
    let mut view = h.coordinator.start_observer().await.unwrap();
    assert_eq!(view.borrow().alarm_phase, AlarmPhase::Idle);

    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;
    h.vehicle.push(fix(10.0, 10.0, 0));
    let v = wait_view(&mut view, "update", |v| v.vehicle_seq == Some(1)).await;
    assert_eq!(v.alarm_phase, AlarmPhase::Idle);
    assert_eq!(h.actuator.starts(), 0);

    h.coordinator.enable_alarm().await.unwrap();
    wait_view(&mut view, "armed", |v| v.alarm_phase == AlarmPhase::Armed).await;

    // The next qualifying evaluation triggers.
    h.observer.push(fix(10.00001, 10.0, 2_000));
    wait_view(&mut view, "trigger", |v| v.alarm_phase == AlarmPhase::Triggered).await;
    assert_eq!(h.actuator.starts(), 1);

    h.coordinator.shutdown().await;
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn denied_foreground_permission_fails_publisher_start() {
    let h = harness();
    h.vehicle.deny(PermissionScope::Foreground);

    let err = h.coordinator.start_publisher().await.unwrap_err();
    assert_eq!(
        err.tracking(),
        Some(&TrackingError::PermissionDenied {
            scope: PermissionScope::Foreground
        })
    );
    assert!(!h.coordinator.is_publishing().await);
    let status = h.coordinator.publisher_status().await;
    assert!(matches!(status.last_error, Some(TrackingError::PermissionDenied { .. })));
}

#[tokio::test]
async fn denied_background_permission_fails_observer_start() {
    let h = harness();
    h.observer.deny(PermissionScope::Background);

    let err = h.coordinator.start_observer().await.unwrap_err();
    assert_eq!(
        err.tracking(),
        Some(&TrackingError::PermissionDenied {
            scope: PermissionScope::Background
        })
    );
    assert!(!h.coordinator.is_observing().await);
    assert_eq!(h.store.listener_count("buses", "bus1"), 0);
}

#[tokio::test]
async fn background_permission_is_optional_when_not_required() {
    let mut config = TrackerConfig::default();
    config.observer.require_background_permission = false;
    let h = harness_with(config, None);
    h.observer.deny(PermissionScope::Background);

    h.coordinator.start_observer().await.unwrap();
    assert!(h.coordinator.is_observing().await);
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn publisher_location_error_is_recoverable_with_retry() {
    let h = harness();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    let coordinator = &h.coordinator;
    h.vehicle.fail(TrackingError::LocationUnavailable("gps lost".into()));
    wait_until("publisher to stop", || async move { !coordinator.is_publishing().await }).await;
    let status = h.coordinator.publisher_status().await;
    assert!(!status.tracking);
    assert_eq!(
        status.last_error,
        Some(TrackingError::LocationUnavailable("gps lost".into()))
    );

    h.coordinator.retry().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;
    h.vehicle.push(fix(10.0, 10.0, 0));
    wait_until("publish after retry", || async move {
        coordinator.publisher_status().await.published_count == 1
    })
    .await;
    assert!(h.coordinator.publisher_status().await.last_error.is_none());

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn observer_location_error_is_recoverable_with_retry() {
    let h = harness();
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.observer.wait_for_watchers(1).await;

    h.observer.fail(TrackingError::LocationUnavailable("no fix".into()));
    wait_view(&mut view, "location error", |v| v.last_error.is_some()).await;
    let observer = &h.observer;
    wait_until("observer watch released", || async move { observer.watcher_count() == 0 }).await;

    h.coordinator.retry().await.unwrap();
    let v = wait_view(&mut view, "retry", |v| v.last_error.is_none()).await;
    assert!(v.active);
    assert_eq!(h.observer.watcher_count(), 1);

    h.coordinator.shutdown().await;
}

/// A store whose writes always fail.
struct ReadOnlyStore;

#[async_trait]
impl RemoteStore for ReadOnlyStore {
    async fn merge_write(&self, _collection: &str, key: &str, _fields: Document) -> Result<StoredDocument, StoreError> {
        Err(StoreError::Poisoned(key.to_string()))
    }

    async fn get(&self, _collection: &str, _key: &str) -> Result<Option<StoredDocument>, StoreError> {
        Ok(None)
    }

    async fn listen(&self, _collection: &str, _key: &str) -> Result<DocumentStream, StoreError> {
        Ok(futures::stream::pending().boxed())
    }

    fn backend_name(&self) -> &str {
        "read-only"
    }
}

#[tokio::test]
async fn publish_failures_are_surfaced_and_not_fatal() {
    let channel = SharedLocationChannel::new(Arc::new(ReadOnlyStore), "buses");
    let vehicle = Arc::new(ManualSource::new());
    let coordinator = LifecycleCoordinator::new(TrackerConfig::default(), channel)
        .with_publisher_source(Arc::clone(&vehicle) as Arc<dyn LocationSource>);

    coordinator.start_publisher().await.unwrap();
    vehicle.wait_for_watchers(1).await;
    vehicle.push(fix(10.0, 10.0, 0));

    let coord = &coordinator;
    wait_until("write failure", || async move {
        coord.publisher_status().await.last_error.is_some()
    })
    .await;
    let status = coordinator.publisher_status().await;
    assert!(matches!(status.last_error, Some(TrackingError::RemoteWriteFailed(_))));
    assert_eq!(status.published_count, 0);
    assert_eq!(status.last_sample, Some(fix(10.0, 10.0, 0)));
    assert!(coordinator.is_publishing().await);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn failing_actuator_does_not_block_transitions() {
    let h = harness();
    h.actuator.set_failing(true);
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    h.vehicle.push(fix(10.0, 10.0, 0));
    let v = wait_view(&mut view, "trigger", |v| v.alarm_phase == AlarmPhase::Triggered).await;
    assert!(matches!(v.last_error, Some(TrackingError::ActuatorFailure(_))));

    h.coordinator.stop_alarm().await.unwrap();
    wait_view(&mut view, "suppressed", |v| v.alarm_phase == AlarmPhase::Suppressed).await;

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn actuator_failure_clears_on_retry_and_does_not_mask_later_errors() {
    let h = harness();
    h.actuator.set_failing(true);
    let mut view = h.coordinator.start_observer().await.unwrap();
    h.coordinator.start_publisher().await.unwrap();
    h.vehicle.wait_for_watchers(1).await;

    h.vehicle.push(fix(10.0, 10.0, 0));
    wait_view(&mut view, "actuator failure", |v| {
        matches!(v.last_error, Some(TrackingError::ActuatorFailure(_)))
    })
    .await;

    h.actuator.set_failing(false);
    h.coordinator.retry().await.unwrap();
    wait_view(&mut view, "retry", |v| v.last_error.is_none()).await;

    h.vehicle.push(fix(10.001, 10.0, 4_000));
    let v = wait_view(&mut view, "update after retry", |v| v.vehicle_seq == Some(2)).await;
    assert!(v.last_error.is_none(), "{:?}", v.last_error);

    h.observer.wait_for_watchers(1).await;
    h.observer.fail(TrackingError::LocationUnavailable("no fix".into()));
    let v = wait_view(&mut view, "location error", |v| v.last_error.is_some()).await;
    assert_eq!(v.last_error, Some(TrackingError::LocationUnavailable("no fix".into())));

    h.vehicle.push(fix(10.002, 10.0, 8_000));
    let v = wait_view(&mut view, "update after location error", |v| v.vehicle_seq == Some(3)).await;
    assert_eq!(v.last_error, Some(TrackingError::LocationUnavailable("no fix".into())));

    h.coordinator.shutdown().await;
}
