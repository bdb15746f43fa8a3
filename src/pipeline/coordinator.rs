//! Lifecycle Coordinator
//!
//! Wires sources, throttling, the shared channel and the alarm together and
//! owns the running sessions:
//!
//! ```text
//! publisher source → throttle → channel.publish          (PublisherSession)
//! channel.subscribe ─┐
//!                    ├→ proximity → alarm → actuator     (SubscriptionHandle)
//! observer source ───┘
//! ```
//!
//! Start and stop operations are idempotent. Stops wait for the task to
//! finish, so nothing runs after they return.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::publisher::PublisherSession;
use super::state::{ObserverView, PublisherStatus};
use super::subscription::{SubscriptionCommand, SubscriptionHandle, SubscriptionParams};
use crate::acquisition::LocationSource;
use crate::alarm::{Actuator, AlarmMachine, Clock, LogActuator, SystemClock};
use crate::channel::SharedLocationChannel;
use crate::config::TrackerConfig;
use crate::throttle::throttle;
use crate::types::{PermissionScope, TrackingError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error("No {0} location source configured")]
    NoSource(&'static str),

    #[error("No {0} session is running")]
    NotRunning(&'static str),
}

impl SessionError {
    /// The underlying tracking error, if this failure came from tracking.
    pub fn tracking(&self) -> Option<&TrackingError> {
        match self {
            SessionError::Tracking(e) => Some(e),
            _ => None,
        }
    }
}

pub struct LifecycleCoordinator {
    config: TrackerConfig,
    channel: SharedLocationChannel,
    publisher_source: Option<Arc<dyn LocationSource>>,
    observer_source: Option<Arc<dyn LocationSource>>,
    actuator: Arc<dyn Actuator>,
    clock: Arc<dyn Clock>,
    /// Parent of every session token; cancelled on shutdown
    root: CancellationToken,
    publisher: Mutex<Option<PublisherSession>>,
    observer: Mutex<Option<SubscriptionHandle>>,
    publisher_status: Arc<RwLock<PublisherStatus>>,
}

impl LifecycleCoordinator {
    /// Coordinator with a log-only actuator and the system clock.
    pub fn new(config: TrackerConfig, channel: SharedLocationChannel) -> Self {
        Self {
            config,
            channel,
            publisher_source: None,
            observer_source: None,
            actuator: Arc::new(LogActuator::new()),
            clock: Arc::new(SystemClock),
            root: CancellationToken::new(),
            publisher: Mutex::new(None),
            observer: Mutex::new(None),
            publisher_status: Arc::new(RwLock::new(PublisherStatus::default())),
        }
    }

    #[must_use]
    pub fn with_publisher_source(mut self, source: Arc<dyn LocationSource>) -> Self {
        self.publisher_source = Some(source);
        self
    }

    #[must_use]
    pub fn with_observer_source(mut self, source: Arc<dyn LocationSource>) -> Self {
        self.observer_source = Some(source);
        self
    }

    #[must_use]
    pub fn with_actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.actuator = actuator;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Tie every session to an outer token (e.g. Ctrl+C).
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.root = token;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn channel(&self) -> &SharedLocationChannel {
        &self.channel
    }

    fn publisher_id(&self) -> &str {
        &self.config.route.publisher_id
    }

    // ========================================================================
    // Publisher
    // ========================================================================

    /// Start publishing the vehicle's position. No-op while already running.
    pub async fn start_publisher(&self) -> Result<(), SessionError> {
        let mut slot = self.publisher.lock().await;
        if slot.as_ref().is_some_and(|s| !s.is_finished()) {
            return Ok(());
        }
        let source = self
            .publisher_source
            .clone()
            .ok_or(SessionError::NoSource("publisher"))?;

        let throttle_config = self.config.publisher;
        if let Err(e) = self.open_publisher(&source, throttle_config, &mut slot).await {
            warn!(publisher_id = %self.publisher_id(), error = %e, "Publisher failed to start");
            self.publisher_status.write().await.last_error = e.tracking().cloned();
            return Err(e);
        }
        Ok(())
    }

    async fn open_publisher(
        &self,
        source: &Arc<dyn LocationSource>,
        throttle_config: crate::config::ThrottleConfig,
        slot: &mut Option<PublisherSession>,
    ) -> Result<(), SessionError> {
        source.request_permission(PermissionScope::Foreground).await?;
        let fixes = source.watch(throttle_config.watch_options()).await?;

        // Replace a finished session, if any.
        if let Some(old) = slot.take() {
            old.stop().await;
        }
        *slot = Some(PublisherSession::spawn(
            self.publisher_id().to_string(),
            self.channel.clone(),
            throttle(fixes, throttle_config),
            Arc::clone(&self.publisher_status),
            self.root.child_token(),
        ));
        info!(publisher_id = %self.publisher_id(), source = source.source_name(), "📡 Publisher started");
        Ok(())
    }

    /// Stop publishing. No-op when not running.
    pub async fn stop_publisher(&self) {
        if let Some(session) = self.publisher.lock().await.take() {
            session.stop().await;
            info!(publisher_id = %self.publisher_id(), "Publisher stopped");
        }
    }

    pub async fn publisher_status(&self) -> PublisherStatus {
        self.publisher_status.read().await.clone()
    }

    pub async fn is_publishing(&self) -> bool {
        self.publisher.lock().await.as_ref().is_some_and(|s| !s.is_finished())
    }

    // ========================================================================
    // Observer
    // ========================================================================

    /// Start watching the configured publisher. Returns the presentation
    /// receiver; a second call while running returns the existing one.
    pub async fn start_observer(&self) -> Result<watch::Receiver<ObserverView>, SessionError> {
        let mut slot = self.observer.lock().await;
        if let Some(handle) = slot.as_ref().filter(|h| !h.is_finished()) {
            return Ok(handle.view());
        }
        let source = self
            .observer_source
            .clone()
            .ok_or(SessionError::NoSource("observer"))?;

        source.request_permission(PermissionScope::Foreground).await?;
        if self.config.observer.require_background_permission {
            source.request_permission(PermissionScope::Background).await?;
        }

        let initial_fix = match source.current_position().await {
            Ok(fix) => Some(fix),
            Err(e @ TrackingError::PermissionDenied { .. }) => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "No initial observer fix, waiting for the watch");
                None
            }
        };

        let throttle_config = self.config.observer.throttle();
        let locations = throttle(source.watch(throttle_config.watch_options()).await?, throttle_config);
        let feed = self
            .channel
            .subscribe(self.publisher_id())
            .await
            .map_err(|e| SessionError::Tracking(e.as_read_failure()))?;

        let machine = AlarmMachine::new(&self.config.alarm, Arc::clone(&self.actuator), Arc::clone(&self.clock));
        let params = SubscriptionParams {
            publisher_id: self.publisher_id().to_string(),
            channel: self.channel.clone(),
            source: Arc::clone(&source),
            throttle: throttle_config,
            machine,
            recheck: Duration::from_secs(self.config.alarm.cooldown_recheck_secs.max(1)),
            initial_fix,
            feed,
            locations,
        };

        if let Some(old) = slot.take() {
            old.cancel().await;
        }
        let handle = SubscriptionHandle::spawn(params, self.root.child_token());
        let view = handle.view();
        *slot = Some(handle);
        info!(publisher_id = %self.publisher_id(), source = source.source_name(), "👀 Observer started");
        Ok(view)
    }

    /// Stop watching. Returns once the subscription has released everything.
    pub async fn stop_observer(&self) {
        if let Some(handle) = self.observer.lock().await.take() {
            handle.cancel().await;
            info!(publisher_id = %self.publisher_id(), "Observer stopped");
        }
    }

    pub async fn observer_view(&self) -> Option<ObserverView> {
        self.observer.lock().await.as_ref().map(SubscriptionHandle::snapshot)
    }

    pub async fn is_observing(&self) -> bool {
        self.observer.lock().await.as_ref().is_some_and(|h| !h.is_finished())
    }

    // ========================================================================
    // User and lifecycle actions
    // ========================================================================

    /// Acknowledge a sounding alarm.
    pub async fn stop_alarm(&self) -> Result<(), SessionError> {
        self.command(SubscriptionCommand::StopAlarm).await
    }

    pub async fn enable_alarm(&self) -> Result<(), SessionError> {
        self.command(SubscriptionCommand::Enable).await
    }

    pub async fn disable_alarm(&self) -> Result<(), SessionError> {
        self.command(SubscriptionCommand::Disable).await
    }

    /// Host moved to the background. Tracking continues.
    pub async fn suspend(&self) -> Result<(), SessionError> {
        self.command(SubscriptionCommand::Suspend).await
    }

    /// Host returned to the foreground.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.command(SubscriptionCommand::Resume).await
    }

    /// Re-open whatever stopped on an error: a finished publisher session is
    /// restarted, and the observer re-opens its feed and location watch.
    pub async fn retry(&self) -> Result<(), SessionError> {
        let publisher_stopped = self.publisher.lock().await.as_ref().is_some_and(PublisherSession::is_finished);
        if publisher_stopped {
            info!(publisher_id = %self.publisher_id(), "Retrying publisher");
            self.start_publisher().await?;
        }

        let observing = self.observer.lock().await.is_some();
        if observing {
            self.command(SubscriptionCommand::Retry).await?;
        }
        Ok(())
    }

    /// Stop everything and wait for teardown.
    pub async fn shutdown(&self) {
        self.stop_observer().await;
        self.stop_publisher().await;
        info!("Coordinator shut down");
    }

    async fn command(&self, command: SubscriptionCommand) -> Result<(), SessionError> {
        let slot = self.observer.lock().await;
        let handle = slot.as_ref().ok_or(SessionError::NotRunning("observer"))?;
        handle.send(command).await
    }
}
