//! Driven sources: a stationary fix and a manually pushed stream.
//!
//! `ManualSource` is the test double used throughout the integration tests;
//! the CLI uses `FixedSource` for a stationary observer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use super::source::{LocationSource, PositionStream};
use crate::types::{PermissionScope, PositionSample, TrackingError, WatchOptions};

// ============================================================================
// Fixed Source
// ============================================================================

/// A stationary position. Every watch emits the fix once and then stays open.
pub struct FixedSource {
    fix: PositionSample,
}

impl FixedSource {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            fix: PositionSample::new(latitude, longitude, 0),
        }
    }

    fn stamped(&self) -> PositionSample {
        let mut fix = self.fix;
        fix.timestamp_millis = chrono::Utc::now().timestamp_millis();
        fix
    }
}

#[async_trait]
impl LocationSource for FixedSource {
    async fn request_permission(&self, _scope: PermissionScope) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn current_position(&self) -> Result<PositionSample, TrackingError> {
        Ok(self.stamped())
    }

    async fn watch(&self, _options: WatchOptions) -> Result<PositionStream, TrackingError> {
        let first = futures::stream::once(futures::future::ready(Ok(self.stamped())));
        Ok(first.chain(futures::stream::pending()).boxed())
    }

    fn source_name(&self) -> &str {
        "fixed"
    }
}

// ============================================================================
// Manual Source
// ============================================================================

/// A source driven from code: `push` delivers a fix to every open watch,
/// `fail` delivers an error, and permissions can be revoked per scope.
///
/// Fixes pushed while no watch is open are not buffered; only the latest one
/// is kept for `current_position()`.
pub struct ManualSource {
    tx: broadcast::Sender<Result<PositionSample, TrackingError>>,
    current: Mutex<Option<PositionSample>>,
    foreground: AtomicBool,
    background: AtomicBool,
}

impl ManualSource {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            current: Mutex::new(None),
            foreground: AtomicBool::new(true),
            background: AtomicBool::new(true),
        }
    }

    /// Start with a known current position.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        let source = Self::new();
        source.set_current(PositionSample::new(latitude, longitude, 0));
        source
    }

    /// Deliver a fix to every open watch and remember it as current.
    pub fn push(&self, sample: PositionSample) {
        self.set_current(sample);
        // No receivers is fine: nobody is watching yet.
        let _ = self.tx.send(Ok(sample));
    }

    /// Deliver an error to every open watch.
    pub fn fail(&self, error: TrackingError) {
        let _ = self.tx.send(Err(error));
    }

    pub fn set_current(&self, sample: PositionSample) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(sample);
        }
    }

    pub fn deny(&self, scope: PermissionScope) {
        self.flag(scope).store(false, Ordering::SeqCst);
    }

    pub fn grant(&self, scope: PermissionScope) {
        self.flag(scope).store(true, Ordering::SeqCst);
    }

    /// Number of open watches.
    pub fn watcher_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait until at least `n` watches are open.
    pub async fn wait_for_watchers(&self, n: usize) {
        while self.watcher_count() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn flag(&self, scope: PermissionScope) -> &AtomicBool {
        match scope {
            PermissionScope::Foreground => &self.foreground,
            PermissionScope::Background => &self.background,
        }
    }

    fn check(&self, scope: PermissionScope) -> Result<(), TrackingError> {
        if self.flag(scope).load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TrackingError::PermissionDenied { scope })
        }
    }
}

impl Default for ManualSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSource for ManualSource {
    async fn request_permission(&self, scope: PermissionScope) -> Result<(), TrackingError> {
        self.check(scope)
    }

    async fn current_position(&self) -> Result<PositionSample, TrackingError> {
        self.check(PermissionScope::Foreground)?;
        self.current
            .lock()
            .map_err(|e| TrackingError::LocationUnavailable(e.to_string()))?
            .ok_or_else(|| TrackingError::LocationUnavailable("no fix yet".to_string()))
    }

    async fn watch(&self, _options: WatchOptions) -> Result<PositionStream, TrackingError> {
        self.check(PermissionScope::Foreground)?;
        let rx = self.tx.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(item) => return Some((item, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "[ManualSource] Watch lagged, skipping to newest fix");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    fn source_name(&self) -> &str {
        "manual"
    }
}
