//! Observer subscription task.
//!
//! One tokio task per [`SubscriptionHandle`]. The task owns the alarm state
//! machine and multiplexes, in priority order:
//!
//! 1. cancellation
//! 2. user / lifecycle commands
//! 3. vehicle updates from the shared channel
//! 4. the observer's own location fixes
//! 5. the cooldown timer
//!
//! Everything the task holds (channel listener, location stream, timer,
//! actuator) is released when the task returns, on every exit path.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::ObserverView;
use super::SessionError;
use crate::acquisition::{LocationSource, PositionStream};
use crate::alarm::AlarmMachine;
use crate::channel::{ChannelError, LocationFeed, PublisherState, SharedLocationChannel};
use crate::config::defaults::SUBSCRIPTION_COMMAND_CAPACITY;
use crate::config::ThrottleConfig;
use crate::proximity::distance_meters;
use crate::throttle::throttle;
use crate::types::{PositionSample, TrackingError};

/// Requests handled by the subscription task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionCommand {
    /// Acknowledge a sounding alarm
    StopAlarm,
    /// Host moved to the background
    Suspend,
    /// Host returned to the foreground: re-attach the feed, re-check the cooldown
    Resume,
    /// Re-open any sub-stream that stopped on an error
    Retry,
    Enable,
    Disable,
}

/// Everything a subscription task needs. Streams are opened by the caller so
/// that setup errors surface before the task exists.
pub struct SubscriptionParams {
    pub publisher_id: String,
    pub channel: SharedLocationChannel,
    pub source: Arc<dyn LocationSource>,
    pub throttle: ThrottleConfig,
    pub machine: AlarmMachine,
    /// Longest single cooldown sleep before re-reading the wall clock
    pub recheck: Duration,
    pub initial_fix: Option<PositionSample>,
    pub feed: LocationFeed,
    pub locations: PositionStream,
}

// ============================================================================
// Handle
// ============================================================================

/// An observer's live link to one publisher.
///
/// Dropping the handle cancels the task without waiting for it; use
/// [`SubscriptionHandle::cancel`] to wait for teardown to finish.
pub struct SubscriptionHandle {
    publisher_id: String,
    cancel: CancellationToken,
    commands: mpsc::Sender<SubscriptionCommand>,
    view: watch::Receiver<ObserverView>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Spawn the subscription task.
    pub fn spawn(params: SubscriptionParams, cancel: CancellationToken) -> Self {
        let mut view = ObserverView::new(params.publisher_id.clone(), params.machine.phase());
        view.observer = params.initial_fix;
        let (view_tx, view_rx) = watch::channel(view);
        let (cmd_tx, cmd_rx) = mpsc::channel(SUBSCRIPTION_COMMAND_CAPACITY);

        let publisher_id = params.publisher_id.clone();
        let task = SubscriptionTask::new(params, view_tx);
        let handle = tokio::spawn(task.run(cancel.clone(), cmd_rx));

        Self {
            publisher_id,
            cancel,
            commands: cmd_tx,
            view: view_rx,
            task: Some(handle),
        }
    }

    pub fn publisher_id(&self) -> &str {
        &self.publisher_id
    }

    /// A new receiver for the presentation snapshot.
    pub fn view(&self) -> watch::Receiver<ObserverView> {
        self.view.clone()
    }

    /// Current presentation snapshot.
    pub fn snapshot(&self) -> ObserverView {
        self.view.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Queue a command for the task.
    pub async fn send(&self, command: SubscriptionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::NotRunning("observer"))
    }

    /// Cancel the task and wait until it has released everything.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(publisher_id = %self.publisher_id, error = %e, "[Subscription] Task ended abnormally");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Task
// ============================================================================

enum Event {
    Cancelled,
    Command(SubscriptionCommand),
    Vehicle(Option<Result<PublisherState, ChannelError>>),
    Observer(Option<Result<PositionSample, TrackingError>>),
    CooldownTick,
}

struct SubscriptionTask {
    publisher_id: String,
    channel: SharedLocationChannel,
    source: Arc<dyn LocationSource>,
    throttle: ThrottleConfig,
    machine: AlarmMachine,
    recheck: Duration,
    view_tx: watch::Sender<ObserverView>,
    view: ObserverView,
    feed: Option<LocationFeed>,
    locations: Option<PositionStream>,
}

impl SubscriptionTask {
    fn new(params: SubscriptionParams, view_tx: watch::Sender<ObserverView>) -> Self {
        let view = view_tx.borrow().clone();
        Self {
            publisher_id: params.publisher_id,
            channel: params.channel,
            source: params.source,
            throttle: params.throttle,
            machine: params.machine,
            recheck: params.recheck,
            view_tx,
            view,
            feed: Some(params.feed),
            locations: Some(params.locations),
        }
    }

    async fn run(mut self, cancel: CancellationToken, mut commands: mpsc::Receiver<SubscriptionCommand>) {
        info!(
            publisher_id = %self.publisher_id,
            source = self.source.source_name(),
            phase = ?self.machine.phase(),
            "[Subscription] Started"
        );

        loop {
            let cooldown = self.cooldown_delay();
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => Event::Cancelled,
                Some(command) = commands.recv() => Event::Command(command),
                item = next_or_pending(&mut self.feed) => Event::Vehicle(item),
                item = next_or_pending(&mut self.locations) => Event::Observer(item),
                () = sleep_or_pending(cooldown) => Event::CooldownTick,
            };

            match event {
                Event::Cancelled => break,
                Event::Command(command) => self.on_command(command).await,
                Event::Vehicle(item) => self.on_vehicle(item),
                Event::Observer(item) => self.on_observer(item),
                Event::CooldownTick => {
                    self.machine.on_tick();
                }
            }
            self.publish_view();
        }

        // Teardown: stop the alert, then drop the listener and the watch.
        self.machine.shutdown();
        self.feed = None;
        self.locations = None;
        self.view.active = false;
        self.publish_view();
        info!(publisher_id = %self.publisher_id, "[Subscription] Stopped");
    }

    /// Time until the next cooldown check, if suppressed.
    fn cooldown_delay(&self) -> Option<Duration> {
        let until = self.machine.deadline()?;
        let remaining = (until - self.machine.now()).to_std().unwrap_or(Duration::ZERO);
        Some(remaining.min(self.recheck))
    }

    async fn on_command(&mut self, command: SubscriptionCommand) {
        debug!(publisher_id = %self.publisher_id, ?command, "[Subscription] Command");
        match command {
            SubscriptionCommand::StopAlarm => {
                self.machine.acknowledge();
            }
            SubscriptionCommand::Suspend => {
                // Location delivery continues in the background.
                self.view.suspended = true;
                info!(publisher_id = %self.publisher_id, "[Subscription] Suspended");
            }
            SubscriptionCommand::Resume => {
                self.view.suspended = false;
                self.resubscribe().await;
                self.machine.on_tick();
                info!(publisher_id = %self.publisher_id, phase = ?self.machine.phase(), "[Subscription] Resumed");
            }
            SubscriptionCommand::Retry => self.retry().await,
            SubscriptionCommand::Enable => self.machine.enable(),
            SubscriptionCommand::Disable => self.machine.disable(),
        }
    }

    /// Replace the channel feed. The old listener is released first, so
    /// there is never more than one.
    async fn resubscribe(&mut self) {
        self.feed = None;
        match self.channel.subscribe(&self.publisher_id).await {
            Ok(feed) => self.feed = Some(feed),
            Err(e) => {
                warn!(publisher_id = %self.publisher_id, error = %e, "[Subscription] Re-subscribe failed");
                self.view.last_error = Some(e.as_read_failure());
            }
        }
    }

    async fn retry(&mut self) {
        let mut ok = true;

        if self.feed.is_none() {
            self.resubscribe().await;
            ok &= self.feed.is_some();
        }

        if self.locations.is_none() {
            match self.source.watch(self.throttle.watch_options()).await {
                Ok(stream) => self.locations = Some(throttle(stream, self.throttle)),
                Err(e) => {
                    warn!(publisher_id = %self.publisher_id, error = %e, "[Subscription] Location watch retry failed");
                    self.view.last_error = Some(e);
                    ok = false;
                }
            }
        }

        if ok {
            self.machine.take_error();
            self.view.last_error = None;
            info!(publisher_id = %self.publisher_id, "[Subscription] Retry succeeded");
        }
    }

    fn on_vehicle(&mut self, item: Option<Result<PublisherState, ChannelError>>) {
        match item {
            Some(Ok(state)) => {
                self.view.vehicle = Some(state.sample);
                self.view.vehicle_seq = Some(state.seq);
                self.view.updates_received += 1;
                if matches!(self.view.last_error, Some(TrackingError::RemoteReadFailed(_))) {
                    self.view.last_error = None;
                }
                self.evaluate();
            }
            Some(Err(e @ ChannelError::MalformedDocument { .. })) => {
                // Keep listening; the next write may be well-formed.
                warn!(publisher_id = %self.publisher_id, error = %e, "[Subscription] Ignoring malformed vehicle document");
                self.view.last_error = Some(e.as_read_failure());
            }
            Some(Err(e)) => {
                warn!(publisher_id = %self.publisher_id, error = %e, "[Subscription] Channel failed, feed stopped");
                self.view.last_error = Some(e.as_read_failure());
                self.feed = None;
            }
            None => {
                warn!(publisher_id = %self.publisher_id, "[Subscription] Channel feed closed");
                self.view.last_error = Some(TrackingError::RemoteReadFailed("subscription closed".to_string()));
                self.feed = None;
            }
        }
    }

    fn on_observer(&mut self, item: Option<Result<PositionSample, TrackingError>>) {
        match item {
            Some(Ok(sample)) => {
                self.view.observer = Some(sample);
                self.evaluate();
            }
            Some(Err(e)) => {
                warn!(publisher_id = %self.publisher_id, error = %e, "[Subscription] Location stream failed");
                self.view.last_error = Some(e);
                self.locations = None;
            }
            None => {
                debug!(publisher_id = %self.publisher_id, "[Subscription] Location source ended");
                self.locations = None;
            }
        }
    }

    fn evaluate(&mut self) {
        let (Some(vehicle), Some(observer)) = (self.view.vehicle, self.view.observer) else {
            return;
        };
        let distance = distance_meters(&vehicle, &observer);
        self.view.set_distance(distance);
        debug!(publisher_id = %self.publisher_id, distance_m = distance, zone = ?self.view.zone, "[Subscription] Proximity");
        self.machine.on_distance(distance);
    }

    fn publish_view(&mut self) {
        let state = self.machine.state();
        self.view.alarm_phase = state.phase;
        self.view.suppressed_until = state.suppressed_until;
        if let Some(e) = self.machine.take_error() {
            self.view.last_error = Some(e);
        }
        self.view_tx.send_replace(self.view.clone());
    }
}

async fn next_or_pending<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(s) => s.next().await,
        None => futures::future::pending().await,
    }
}

async fn sleep_or_pending(delay: Option<Duration>) {
    match delay {
        Some(d) => tokio::time::sleep(d).await,
        None => futures::future::pending().await,
    }
}
