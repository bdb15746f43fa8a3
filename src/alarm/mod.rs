//! Proximity alarm: state machine, wall clock and alert outputs.

pub mod actuator;
pub mod clock;
pub mod machine;

use std::sync::Arc;

pub use actuator::{Actuator, ActuatorCall, ActuatorError, CommandActuator, LogActuator, RecordingActuator};
pub use clock::{next_local_in, Clock, ManualClock, SystemClock};
pub use machine::AlarmMachine;

use crate::config::ActuatorConfig;

/// Actuator for the configured command, or a log-only actuator when none is set.
pub fn actuator_from_config(config: &ActuatorConfig) -> Arc<dyn Actuator> {
    match CommandActuator::new(config.command.clone()) {
        Some(command) => Arc::new(command),
        None => Arc::new(LogActuator::new()),
    }
}
