//! Alarm State Machine
//!
//! ```text
//!  Idle --enable--> Armed --distance < trigger--> Triggered
//!   ^                 ^                               |
//!   +----disable------+----deadline reached----- Suppressed <--acknowledge--+
//! ```
//!
//! The machine is owned by exactly one subscription task. It never sleeps;
//! the owner schedules a timer for the deadline returned by
//! [`AlarmMachine::acknowledge`] and calls [`AlarmMachine::on_tick`] when it
//! fires (or on resume).

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{info, warn};

use super::actuator::Actuator;
use super::clock::Clock;
use crate::config::defaults::COOLDOWN_RESET_HOUR;
use crate::config::AlarmConfig;
use crate::proximity::should_alarm;
use crate::types::{AlarmPhase, AlarmState, TrackingError};

pub struct AlarmMachine {
    state: AlarmState,
    trigger_meters: f64,
    reset_at: NaiveTime,
    actuator: Arc<dyn Actuator>,
    clock: Arc<dyn Clock>,
    last_error: Option<TrackingError>,
}

impl AlarmMachine {
    /// New machine, Armed when the alarm is enabled and Idle otherwise.
    pub fn new(config: &AlarmConfig, actuator: Arc<dyn Actuator>, clock: Arc<dyn Clock>) -> Self {
        let reset_at = NaiveTime::from_hms_opt(config.reset_hour, 0, 0)
            .or_else(|| NaiveTime::from_hms_opt(COOLDOWN_RESET_HOUR, 0, 0))
            .unwrap_or_default();
        Self {
            state: if config.enabled { AlarmState::armed() } else { AlarmState::idle() },
            trigger_meters: config.trigger_distance_meters,
            reset_at,
            actuator,
            clock,
            last_error: None,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn phase(&self) -> AlarmPhase {
        self.state.phase
    }

    /// Deadline of the current suppression, if suppressed.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.state.suppressed_until
    }

    /// Most recent actuator failure, cleared by the next successful call.
    pub fn last_error(&self) -> Option<&TrackingError> {
        self.last_error.as_ref()
    }

    /// Hand the pending actuator failure to the caller. Each failure is
    /// returned once.
    pub fn take_error(&mut self) -> Option<TrackingError> {
        self.last_error.take()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Feed a fresh distance. Returns `true` when this call triggered the alarm.
    ///
    /// A suppression whose deadline has already passed is lifted first, so a
    /// qualifying distance right after the reset fires without waiting for
    /// the timer.
    pub fn on_distance(&mut self, distance_meters: f64) -> bool {
        if self.state.phase == AlarmPhase::Suppressed {
            self.on_tick();
        }
        if self.state.phase != AlarmPhase::Armed || !should_alarm(distance_meters, self.trigger_meters) {
            return false;
        }

        self.state.phase = AlarmPhase::Triggered;
        info!(distance_m = distance_meters, trigger_m = self.trigger_meters, "🚨 Vehicle within range, alarm triggered");
        let result = self.actuator.start_alert();
        self.record(result);
        true
    }

    /// User acknowledgement. Stops the alert and suppresses until the next
    /// reset time. No-op (returning `None`) unless Triggered.
    pub fn acknowledge(&mut self) -> Option<DateTime<Utc>> {
        if self.state.phase != AlarmPhase::Triggered {
            return None;
        }

        let result = self.actuator.stop_alert();
        self.record(result);

        let now = self.clock.now();
        let until = self.clock.next_local(now, self.reset_at);
        self.state = AlarmState {
            phase: AlarmPhase::Suppressed,
            suppressed_until: Some(until),
        };
        info!(suppressed_until = %until, "Alarm acknowledged, suppressed until reset");
        Some(until)
    }

    /// Re-check the suppression deadline against the wall clock. Returns
    /// `true` when the alarm re-armed.
    pub fn on_tick(&mut self) -> bool {
        match (self.state.phase, self.state.suppressed_until) {
            (AlarmPhase::Suppressed, Some(until)) if self.clock.now() >= until => {
                self.state = AlarmState::armed();
                info!("Suppression expired, alarm re-armed");
                true
            }
            (AlarmPhase::Suppressed, None) => {
                warn!("Suppressed without a deadline, re-arming");
                self.state = AlarmState::armed();
                true
            }
            _ => false,
        }
    }

    /// Idle -> Armed. No effect in any other phase.
    pub fn enable(&mut self) {
        if self.state.phase == AlarmPhase::Idle {
            self.state = AlarmState::armed();
            info!("Alarm enabled");
        }
    }

    /// Any phase -> Idle, stopping an active alert.
    pub fn disable(&mut self) {
        if self.state.phase == AlarmPhase::Triggered {
            let result = self.actuator.stop_alert();
            self.record(result);
        }
        if self.state.phase != AlarmPhase::Idle {
            self.state = AlarmState::idle();
            info!("Alarm disabled");
        }
    }

    /// Release the actuator before the owner goes away.
    pub fn shutdown(&mut self) {
        if self.state.phase == AlarmPhase::Triggered {
            let result = self.actuator.stop_alert();
            self.record(result);
            self.state = AlarmState::armed();
        }
    }

    fn record(&mut self, result: Result<(), super::actuator::ActuatorError>) {
        match result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                warn!(actuator = self.actuator.name(), error = %e, "Actuator call failed");
                self.last_error = Some(e.into());
            }
        }
    }
}

impl std::fmt::Debug for AlarmMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmMachine")
            .field("state", &self.state)
            .field("trigger_meters", &self.trigger_meters)
            .field("reset_at", &self.reset_at)
            .field("actuator", &self.actuator.name())
            .finish_non_exhaustive()
    }
}
