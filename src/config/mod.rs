//! Tracker Configuration Module
//!
//! Provides route, throttling, alarm and storage settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `BUS_SENTRY_CONFIG` environment variable (path to TOML file)
//! 2. `sentry.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! The binary loads a [`TrackerConfig`] once at startup and hands each
//! component the sections it needs as explicit arguments.
//!
//! ```ignore
//! let config = TrackerConfig::load();
//! let channel = SharedLocationChannel::from_config(&config.store, config.route.collection.clone())?;
//! ```

mod tracker_config;
pub mod defaults;
pub mod validation;

pub use tracker_config::*;

