//! powernap - idle detection daemon.
//!
//! Watches processes and Wake-on-LAN traffic and runs a configured action
//! once all of them have been absent for long enough.

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use powernap::Config;
use powernap::IdleAggregator;
use powernap::LockToken;
use powernap::action::ShellAction;
use powernap::config::MonitorSpec;
use powernap::interfaces::SysfsInterfaces;
use powernap::lifecycle::TerminationSignals;
use powernap::monitor::build_monitors;
use powernap::snapshot::PsSnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Idle detection daemon.
///
/// Runs an action (suspend, poweroff, ...) once every monitored activity has
/// been absent for the configured time.
#[derive(Parser, Debug)]
#[command(name = "powernap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (log the action instead of running it).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Pid file marking the running instance (overrides config).
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Validate configuration and build monitors, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("powernap v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_from(args.config.as_deref()).context("Invalid configuration")?;

    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(lock_file) = args.lock_file {
        config.lock_file = lock_file;
    }

    info!(
        "Configuration loaded (interval={}s, absent={}s, dry_run={})",
        config.interval_seconds, config.absent_seconds, config.dry_run
    );

    if args.check {
        return run_check(&config).await;
    }

    run_daemon(config).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("powernap={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Build every monitor once to surface startup errors, then exit.
async fn run_check(config: &Config) -> Result<()> {
    let specs = config.monitor_specs();
    let set = build_monitors(&specs, &SysfsInterfaces::default())
        .await
        .context("Failed to start monitors")?;

    for spec in &specs {
        match spec {
            MonitorSpec::Process { name, pattern } => {
                println!("process  {name}  /{pattern}/");
            }
            MonitorSpec::Event { name, port } => println!("event    {name}  udp/{port}"),
        }
    }
    println!(
        "{} monitors, action after {}s idle: {}",
        set.monitors.len(),
        config.absent_seconds,
        config.action
    );
    Ok(())
}

/// Hold the lock and run the idle loop until a termination signal.
async fn run_daemon(config: Config) -> Result<()> {
    // Handlers go in first so no signal can slip between lock and loop
    let shutdown = CancellationToken::new();
    let signals =
        TerminationSignals::register().context("Failed to install signal handlers")?;

    let lock = LockToken::acquire(&config.lock_file).context("Failed to acquire lock")?;
    let signal_task = signals.spawn_shutdown(shutdown.clone());

    let set = build_monitors(&config.monitor_specs(), &SysfsInterfaces::default())
        .await
        .context("Failed to start monitors")?;

    let listeners: Vec<_> = set
        .listeners
        .into_iter()
        .map(|listener| listener.spawn(shutdown.clone()))
        .collect();

    let mut aggregator = IdleAggregator::new(
        config.idle_config(),
        set.monitors,
        Arc::new(PsSnapshot),
        Arc::new(ShellAction::new(config.dry_run)),
    );

    info!("Daemon started, holding {}", lock.path().display());
    aggregator.run(&shutdown).await;

    shutdown.cancel();
    for listener in listeners {
        if let Err(e) = listener.await {
            warn!("Listener task failed: {}", e);
        }
    }
    if let Err(e) = signal_task.await {
        warn!("Signal task failed: {}", e);
    }

    lock.release();
    info!("powernap stopped");
    Ok(())
}
