//! Alert outputs (sound / vibration).
//!
//! `start_alert` and `stop_alert` are idempotent; stopping an alert that was
//! never started is a no-op.

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::config::defaults::VIBRATION_PATTERN_MS;
use crate::types::TrackingError;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Failed to start alert command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stop alert command: {0}")]
    Kill(std::io::Error),

    #[error("Actuator state lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Other(String),
}

impl From<ActuatorError> for TrackingError {
    fn from(e: ActuatorError) -> Self {
        TrackingError::ActuatorFailure(e.to_string())
    }
}

/// Drives the alert hardware.
pub trait Actuator: Send + Sync + 'static {
    fn start_alert(&self) -> Result<(), ActuatorError>;

    fn stop_alert(&self) -> Result<(), ActuatorError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Log Actuator
// ============================================================================

/// Logs the alert instead of driving hardware.
#[derive(Debug, Default)]
pub struct LogActuator {
    active: AtomicBool,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Actuator for LogActuator {
    fn start_alert(&self) -> Result<(), ActuatorError> {
        if !self.active.swap(true, Ordering::SeqCst) {
            tracing::warn!(pattern_ms = ?VIBRATION_PATTERN_MS, "🔔 ALERT: vehicle approaching, vibrating");
        }
        Ok(())
    }

    fn stop_alert(&self) -> Result<(), ActuatorError> {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::info!("🔕 Alert stopped");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

// ============================================================================
// Command Actuator
// ============================================================================

/// How often a running alert command is checked and restarted if it exited.
const RESPAWN_INTERVAL: Duration = Duration::from_millis(200);

/// Runs an external command (typically an audio player) for the duration
/// of the alert and kills it on stop.
///
/// A command that exits on its own while the alert is active is started
/// again, so a one-shot player repeats until the alert stops.
#[derive(Debug)]
pub struct CommandActuator {
    inner: Arc<CommandState>,
}

#[derive(Debug)]
struct CommandState {
    argv: Vec<String>,
    child: Mutex<Option<Child>>,
    active: AtomicBool,
    supervising: AtomicBool,
}

impl CommandActuator {
    /// Returns `None` for an empty argv.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self {
            inner: Arc::new(CommandState {
                argv,
                child: Mutex::new(None),
                active: AtomicBool::new(false),
                supervising: AtomicBool::new(false),
            }),
        })
    }

    fn supervise(&self) {
        if self.inner.supervising.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("alert-command".to_string())
            .spawn(move || state.supervise());
        if let Err(e) = spawned {
            self.inner.supervising.store(false, Ordering::SeqCst);
            tracing::warn!(error = %e, "Failed to start alert command supervisor; the command will not repeat");
        }
    }
}

impl CommandState {
    fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    fn spawn(&self) -> Result<Child, ActuatorError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| ActuatorError::Other("empty alert command".to_string()))?;
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ActuatorError::Spawn {
                command: self.command_line(),
                source,
            })
    }

    fn supervise(&self) {
        loop {
            thread::sleep(RESPAWN_INTERVAL);
            if self.keep_alive() {
                continue;
            }
            self.supervising.store(false, Ordering::SeqCst);
            // A start that raced with the exit above hands supervision back.
            if !self.active.load(Ordering::SeqCst) || self.supervising.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Restart the command if it exited while active. Returns whether
    /// supervision should continue.
    fn keep_alive(&self) -> bool {
        let Ok(mut child) = self.child.lock() else {
            return false;
        };
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(running) = child.as_mut() {
            if matches!(running.try_wait(), Ok(None)) {
                return true;
            }
        }

        match self.spawn() {
            Ok(spawned) => {
                tracing::debug!(command = %self.command_line(), pid = spawned.id(), "Alert command restarted");
                *child = Some(spawned);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Alert command could not be restarted");
                *child = None;
                self.active.store(false, Ordering::SeqCst);
                false
            }
        }
    }
}

impl Actuator for CommandActuator {
    fn start_alert(&self) -> Result<(), ActuatorError> {
        let state = &self.inner;
        {
            let mut child = state.child.lock().map_err(|_| ActuatorError::Poisoned)?;
            let running = child.as_mut().is_some_and(|c| matches!(c.try_wait(), Ok(None)));
            if !running {
                let spawned = state.spawn()?;
                tracing::warn!(command = %state.command_line(), pid = spawned.id(), pattern_ms = ?VIBRATION_PATTERN_MS, "🔔 ALERT: vehicle approaching");
                *child = Some(spawned);
            }
            state.active.store(true, Ordering::SeqCst);
        }
        self.supervise();
        Ok(())
    }

    fn stop_alert(&self) -> Result<(), ActuatorError> {
        let state = &self.inner;
        state.active.store(false, Ordering::SeqCst);
        let mut child = state.child.lock().map_err(|_| ActuatorError::Poisoned)?;
        let Some(mut running) = child.take() else {
            return Ok(());
        };

        if matches!(running.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        running.kill().map_err(ActuatorError::Kill)?;
        // Reap so the process does not linger as a zombie.
        let _ = running.wait();
        tracing::info!(command = %state.command_line(), "🔕 Alert command stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "command"
    }
}

impl Drop for CommandActuator {
    fn drop(&mut self) {
        if let Err(e) = self.stop_alert() {
            tracing::warn!(error = %e, "Failed to stop alert command on drop");
        }
    }
}

// ============================================================================
// Recording Actuator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    Start,
    Stop,
}

/// Records every call. Can be told to fail to exercise error paths.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    calls: Mutex<Vec<ActuatorCall>>,
    failing: AtomicBool,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call return an error (still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn starts(&self) -> usize {
        self.count(ActuatorCall::Start)
    }

    pub fn stops(&self) -> usize {
        self.count(ActuatorCall::Stop)
    }

    fn count(&self, call: ActuatorCall) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: ActuatorCall) -> Result<(), ActuatorError> {
        self.calls
            .lock()
            .map_err(|_| ActuatorError::Poisoned)?
            .push(call);
        if self.failing.load(Ordering::SeqCst) {
            Err(ActuatorError::Other(format!("simulated {call:?} failure")))
        } else {
            Ok(())
        }
    }
}

impl Actuator for RecordingActuator {
    fn start_alert(&self) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::Start)
    }

    fn stop_alert(&self) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::Stop)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandActuator::new(Vec::new()).is_none());
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let actuator = CommandActuator::new(vec!["true".into()]).unwrap();
        assert!(actuator.stop_alert().is_ok());
        assert!(LogActuator::new().stop_alert().is_ok());
    }

    #[test]
    fn missing_program_reports_spawn_error() {
        let actuator = CommandActuator::new(vec!["/nonexistent/alarm-player".into()]).unwrap();
        let err = actuator.start_alert().unwrap_err();
        assert!(matches!(err, ActuatorError::Spawn { .. }));
        assert!(matches!(TrackingError::from(err), TrackingError::ActuatorFailure(_)));
    }

    fn line_count(path: &std::path::Path) -> usize {
        std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
    }

    #[test]
    fn exited_command_repeats_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let runs = dir.path().join("runs");
        let script = format!("echo run >> '{}'", runs.display());
        let actuator = CommandActuator::new(vec!["sh".into(), "-c".into(), script]).unwrap();

        actuator.start_alert().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while line_count(&runs) < 3 {
            assert!(std::time::Instant::now() < deadline, "command was not restarted");
            thread::sleep(Duration::from_millis(20));
        }

        actuator.stop_alert().unwrap();
        let after_stop = line_count(&runs);
        thread::sleep(RESPAWN_INTERVAL * 3);
        assert_eq!(line_count(&runs), after_stop);
    }

    #[test]
    fn log_actuator_tracks_activity() {
        let actuator = LogActuator::new();
        actuator.start_alert().unwrap();
        assert!(actuator.is_active());
        actuator.stop_alert().unwrap();
        assert!(!actuator.is_active());
    }

    #[test]
    fn recording_actuator_records_failed_calls() {
        let actuator = RecordingActuator::new();
        actuator.set_failing(true);
        assert!(actuator.start_alert().is_err());
        assert_eq!(actuator.calls(), vec![ActuatorCall::Start]);
    }
}
