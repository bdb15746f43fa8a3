//! Shared data structures for the location sharing and proximity alarm engine
//!
//! - PositionSample / WatchOptions: fixes flowing from location sources
//! - AlarmState / AlarmPhase / Zone: per-observer alarm and display state
//! - TrackingError: the error taxonomy surfaced to callers

mod position;
mod alarm;
mod error;

pub use position::*;
pub use alarm::*;
pub use error::*;
