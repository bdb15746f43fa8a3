//! Bus Sentry: vehicle location sharing and proximity alarm engine
//!
//! A vehicle publishes throttled position fixes to a shared document; any
//! number of observers subscribe to it, compare it with their own position,
//! and get an alarm when the vehicle comes within range.
//!
//! ## Architecture
//!
//! - **Acquisition**: location sources (replay, stdin, fixed, manual)
//! - **Throttle**: time/distance filter before publication
//! - **Channel**: last-known position per publisher over a document store
//! - **Proximity**: haversine distance and display zones
//! - **Alarm**: Idle/Armed/Triggered/Suppressed with a daily wall-clock reset
//! - **Pipeline**: lifecycle coordinator, publisher session, subscription tasks

pub mod config;
pub mod types;
pub mod acquisition;
pub mod throttle;
pub mod channel;
pub mod proximity;
pub mod alarm;
pub mod pipeline;

// Re-export configuration
pub use config::TrackerConfig;

// Re-export commonly used types
pub use types::{
    AlarmPhase, AlarmState, LocationAccuracy, PermissionScope, PositionSample, TrackingError,
    WatchOptions, Zone,
};

pub use acquisition::{LocationSource, PositionStream};
pub use throttle::{throttle, PositionThrottler};
pub use channel::{ChannelError, LocationFeed, PublisherState, RemoteStore, SharedLocationChannel};
pub use alarm::{Actuator, AlarmMachine, Clock};
pub use pipeline::{LifecycleCoordinator, ObserverView, PublisherStatus, SessionError, SubscriptionHandle};
