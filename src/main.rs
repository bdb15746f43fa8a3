//! Bus Sentry - vehicle location sharing and proximity alarm
//!
//! Runs a publisher (the vehicle) and an observer (someone waiting at a
//! stop) in one process over a shared location store.
//!
//! # Usage
//!
//! ```bash
//! # Simulated bus approaching an observer at the default position
//! cargo run --release -- --simulate --speed 10
//!
//! # Replay a recorded track against a fixed observer
//! ./bus-sentry --csv track.csv --observer-lat 51.5 --observer-lon -0.12
//!
//! # Live fixes as JSON lines on stdin
//! gps-feed | ./bus-sentry --stdin
//! ```
//!
//! While running, type `stop` to acknowledge an alarm, or `suspend`,
//! `resume`, `retry`, `status`, `quit`.
//!
//! # Environment Variables
//!
//! - `BUS_SENTRY_CONFIG`: path to a TOML config file (default: ./sentry.toml)
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bus_sentry::acquisition::{simulate, FixedSource, LocationSource, ReplaySource, StdinSource};
use bus_sentry::alarm::actuator_from_config;
use bus_sentry::channel::SharedLocationChannel;
use bus_sentry::config::{defaults, StoreBackend, TrackerConfig};
use bus_sentry::pipeline::{LifecycleCoordinator, ObserverView};
use bus_sentry::types::AlarmPhase;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "bus-sentry")]
#[command(about = "Bus Sentry vehicle location sharing and proximity alarm")]
#[command(version)]
struct CliArgs {
    /// Read vehicle fixes from stdin (JSON lines) instead of a track
    #[arg(long, conflicts_with_all = ["csv", "simulate"])]
    stdin: bool,

    /// Replay vehicle fixes from a CSV or JSON-lines track file
    #[arg(long, conflicts_with = "simulate")]
    csv: Option<PathBuf>,

    /// Drive a synthetic vehicle towards the observer (default when no input is given)
    #[arg(long)]
    simulate: bool,

    /// Random seed for the simulated track
    #[arg(long)]
    seed: Option<u64>,

    /// Speed multiplier for replay (1 = realtime, 10 = 10x faster, 0 = no delay)
    #[arg(long, default_value = "1")]
    speed: u64,

    /// Which side(s) of the engine to run
    #[arg(long, value_enum, default_value = "both")]
    role: Role,

    /// Observer latitude (default from config)
    #[arg(long, allow_negative_numbers = true)]
    observer_lat: Option<f64>,

    /// Observer longitude (default from config)
    #[arg(long, allow_negative_numbers = true)]
    observer_lon: Option<f64>,

    /// Publisher id to publish / watch (default from config)
    #[arg(long)]
    publisher_id: Option<String>,

    /// Store backend override: memory or sled
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Explicit config file (overrides BUS_SENTRY_CONFIG and ./sentry.toml)
    #[arg(long, env = "BUS_SENTRY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    Both,
    Publisher,
    Observer,
}

impl Role {
    fn publishes(self) -> bool {
        matches!(self, Role::Both | Role::Publisher)
    }

    fn observes(self) -> bool {
        matches!(self, Role::Both | Role::Observer)
    }
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    CommandReader,
    ViewPrinter,
    PublisherMonitor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::CommandReader => write!(f, "CommandReader"),
            TaskName::ViewPrinter => write!(f, "ViewPrinter"),
            TaskName::PublisherMonitor => write!(f, "PublisherMonitor"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Load config and apply command-line overrides.
fn load_config(args: &CliArgs) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TrackerConfig::load(),
    };

    if let Some(backend) = args.store {
        config.store.backend = backend;
    }
    if let Some(id) = &args.publisher_id {
        config.route.publisher_id.clone_from(id);
    }
    if args.observer_lat.is_some() || args.observer_lon.is_some() {
        config.observer.latitude = args.observer_lat.or(config.observer.latitude);
        config.observer.longitude = args.observer_lon.or(config.observer.longitude);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn observer_position(config: &TrackerConfig) -> (f64, f64) {
    (
        config.observer.latitude.unwrap_or(defaults::DEMO_OBSERVER_LATITUDE),
        config.observer.longitude.unwrap_or(defaults::DEMO_OBSERVER_LONGITUDE),
    )
}

/// Build the vehicle's location source from the input flags.
fn publisher_source(args: &CliArgs, observer: (f64, f64)) -> Result<Arc<dyn LocationSource>> {
    if args.stdin {
        info!("📥 Input: stdin (JSON fixes)");
        return Ok(Arc::new(StdinSource::new()));
    }

    let delay_ms = if args.speed == 0 {
        0
    } else {
        defaults::SIMULATION_BASE_DELAY_MS / args.speed
    };
    info!(
        "⏱️  Speed: {}x ({}ms delay between fixes)",
        if args.speed == 0 { "max".to_string() } else { args.speed.to_string() },
        delay_ms
    );

    let track = match &args.csv {
        Some(path) => {
            info!("📂 Loading track: {}", path.display());
            bus_sentry::acquisition::load_track(path)?
        }
        None => {
            info!("🧪 Input: simulated approach to ({:.5}, {:.5})", observer.0, observer.1);
            simulate::approach_track(observer.0, observer.1, args.seed)
        }
    };
    info!("📊 {} fixes queued for replay", track.len());
    Ok(Arc::new(ReplaySource::new(track, delay_ms)))
}

// ============================================================================
// Background Tasks
// ============================================================================

/// Read user commands from the terminal.
fn spawn_command_reader(
    task_set: &mut JoinSet<Result<TaskName>>,
    coordinator: Arc<LifecycleCoordinator>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[CommandReader] Task starting (commands: stop, suspend, resume, retry, status, quit)");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                () = cancel_token.cancelled() => break,
                line = lines.next_line() => line.context("Failed to read command")?,
            };
            let Some(line) = line else {
                info!("[CommandReader] stdin closed");
                break;
            };

            let result = match line.trim() {
                "" => Ok(()),
                "stop" | "s" => coordinator.stop_alarm().await,
                "suspend" => coordinator.suspend().await,
                "resume" => coordinator.resume().await,
                "retry" => coordinator.retry().await,
                "enable" => coordinator.enable_alarm().await,
                "disable" => coordinator.disable_alarm().await,
                "status" => {
                    print_status(&coordinator).await;
                    Ok(())
                }
                "quit" | "q" => {
                    cancel_token.cancel();
                    break;
                }
                other => {
                    warn!("Unknown command '{}'", other);
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!("Command failed: {}", e);
            }
        }
        Ok(TaskName::CommandReader)
    });
}

/// Log observer view changes that matter to a person waiting.
fn spawn_view_printer(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut view: watch::Receiver<ObserverView>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[ViewPrinter] Task starting");
        let mut last_line = String::new();
        let mut last_phase = view.borrow().alarm_phase;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                changed = view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let snapshot = view.borrow_and_update().clone();
            if snapshot.alarm_phase != last_phase {
                match snapshot.alarm_phase {
                    AlarmPhase::Triggered => warn!("🚨 Bus is close! Type 'stop' to silence the alarm"),
                    AlarmPhase::Suppressed => info!(
                        "🔕 Alarm silenced until {}",
                        snapshot
                            .suppressed_until
                            .map_or_else(|| "reset".to_string(), |t| t.with_timezone(&chrono::Local).to_string())
                    ),
                    phase => info!("Alarm {}", phase),
                }
                last_phase = snapshot.alarm_phase;
            }

            let line = snapshot.status_line();
            if line != last_line {
                info!("{}", line);
                last_line = line;
            }
            if !snapshot.active {
                break;
            }
        }
        Ok(TaskName::ViewPrinter)
    });
}

/// End the run when a publisher-only session runs out of fixes.
fn spawn_publisher_monitor(
    task_set: &mut JoinSet<Result<TaskName>>,
    coordinator: Arc<LifecycleCoordinator>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = interval.tick() => {
                    if !coordinator.is_publishing().await {
                        info!("[PublisherMonitor] Publisher finished");
                        cancel_token.cancel();
                        break;
                    }
                }
            }
        }
        Ok(TaskName::PublisherMonitor)
    });
}

async fn print_status(coordinator: &LifecycleCoordinator) {
    let status = coordinator.publisher_status().await;
    info!(
        "Publisher: tracking={} published={} speed={:.1} km/h last={}",
        status.tracking,
        status.published_count,
        status.speed_kmh(),
        status.last_sample.map_or_else(|| "-".to_string(), |s| s.to_string())
    );
    if let Some(e) = status.last_error {
        warn!("Publisher error: {}", e);
    }
    if let Some(view) = coordinator.observer_view().await {
        info!("Observer: {}", view.status_line());
    }
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        // Nothing left to supervise; the engine keeps running until Ctrl+C.
                        cancel_token.cancelled().await;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let tracker_config = load_config(&args)?;
    let observer = observer_position(&tracker_config);
    info!(
        "Route: {}/{} | Store: {:?} | Trigger: {:.0} m",
        tracker_config.route.collection,
        tracker_config.route.publisher_id,
        tracker_config.store.backend,
        tracker_config.alarm.trigger_distance_meters
    );

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  BUS SENTRY - Location Sharing & Proximity Alarm");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let channel = SharedLocationChannel::from_config(&tracker_config.store, tracker_config.route.collection.clone())
        .context("Failed to open location store")?;
    info!("💾 Store backend: {}", channel.backend_name());

    let mut coordinator = LifecycleCoordinator::new(tracker_config.clone(), channel)
        .with_actuator(actuator_from_config(&tracker_config.actuator))
        .with_cancel_token(cancel_token.clone());
    if args.role.publishes() {
        coordinator = coordinator.with_publisher_source(publisher_source(&args, observer)?);
    }
    if args.role.observes() {
        info!("📍 Observer at ({:.5}, {:.5})", observer.0, observer.1);
        coordinator = coordinator.with_observer_source(Arc::new(FixedSource::new(observer.0, observer.1)));
    }
    let coordinator = Arc::new(coordinator);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    if args.role.observes() {
        let view = coordinator.start_observer().await.context("Failed to start observer")?;
        spawn_view_printer(&mut task_set, view, cancel_token.clone());
    }
    if args.role.publishes() {
        coordinator.start_publisher().await.context("Failed to start publisher")?;
        if args.role == Role::Publisher {
            spawn_publisher_monitor(&mut task_set, Arc::clone(&coordinator), cancel_token.clone());
        }
    }
    if !args.stdin {
        spawn_command_reader(&mut task_set, Arc::clone(&coordinator), cancel_token.clone());
    }

    let result = run_supervisor(&mut task_set, cancel_token.clone()).await;

    coordinator.shutdown().await;
    print_status(&coordinator).await;
    task_set.shutdown().await;

    info!("");
    info!("✓ Bus Sentry shutdown complete");
    result
}
