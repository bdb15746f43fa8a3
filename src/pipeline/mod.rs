//! Lifecycle pipeline
//!
//! ```text
//! LocationSource ─▶ throttle ─▶ SharedLocationChannel ─┬─▶ SubscriptionHandle ─▶ AlarmMachine ─▶ Actuator
//!                   (PublisherSession)                 └─▶ ...one per observer
//! ```
//!
//! [`LifecycleCoordinator`] starts and stops both sides and routes user
//! actions to the running subscription.

mod state;
mod coordinator;
pub mod publisher;
pub mod subscription;

pub use state::*;
pub use coordinator::{LifecycleCoordinator, SessionError};
pub use publisher::PublisherSession;
pub use subscription::{SubscriptionCommand, SubscriptionHandle, SubscriptionParams};
