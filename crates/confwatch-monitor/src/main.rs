//! CLI entry point for the confwatch fleet configuration monitor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use confwatch_core::FleetState;
use confwatch_store::{Encoding, FileStateStore, StateStore, StoreError};

use confwatch_monitor::config::MonitorConfig;
use confwatch_monitor::inventory::load_inventory;
use confwatch_monitor::notify::{CommandNotifier, LogNotifier, Notifier};
use confwatch_monitor::poller::{Poller, RoundResult};
use confwatch_monitor::querier::SnmpGetQuerier;
use confwatch_monitor::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "confwatch")]
#[command(about = "Fleet configuration-change monitor")]
struct Cli {
    /// Device inventory file (YAML).
    #[arg(short, long, default_value = "devices.yaml")]
    devices: PathBuf,

    /// Run a single round and exit.
    #[arg(long)]
    once: bool,

    /// Stop after this many rounds (continuous mode).
    #[arg(long, conflicts_with = "once")]
    rounds: Option<u64>,

    /// Seconds between rounds in continuous mode (overrides config).
    #[arg(short, long)]
    interval: Option<u64>,

    /// Prior-state file to resume from.
    #[arg(long)]
    state_in: Option<PathBuf>,

    /// File to persist state to after each round.
    #[arg(long)]
    state_out: Option<PathBuf>,

    /// Encoding of the prior-state file.
    #[arg(long, default_value = "json", value_parser = parse_encoding)]
    read_format: Encoding,

    /// Encoding for persisted state.
    #[arg(long, default_value = "json", value_parser = parse_encoding)]
    write_format: Encoding,

    /// Start without prior state; a missing --state-in is not an error.
    #[arg(long)]
    fresh: bool,

    /// Display verbose output.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress everything below errors (requires --state-out).
    #[arg(short, long, requires = "state_out")]
    quiet: bool,

    /// Config file prefix (default: confwatch).
    #[arg(short, long, default_value = "confwatch")]
    config: String,
}

fn parse_encoding(s: &str) -> Result<Encoding, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_monitor_config(&cli.config)?;
    let counters = config.counter_set()?;
    let devices = load_inventory(&cli.devices)?;

    // Prior state loads strictly before the first round.
    let state = load_prior_state(&cli)?;

    let querier = SnmpGetQuerier::new(
        &config.snmpget_path,
        Duration::from_secs(config.query_timeout_secs),
    );
    let version = querier
        .verify_installation()
        .await
        .map_err(|e| anyhow::anyhow!("{}: {e}", config.snmpget_path))?;
    tracing::debug!(version = %version.trim(), "Query binary verified");

    let notifier: Arc<dyn Notifier> = match &config.notify_command {
        Some(command) => Arc::new(CommandNotifier::from_command_line(command)?),
        None => Arc::new(LogNotifier),
    };

    let poller = Poller::new(
        counters,
        Arc::new(querier),
        notifier,
        config.max_concurrent_polls,
    );

    let store_out: Option<Box<dyn StateStore>> = cli
        .state_out
        .as_ref()
        .map(|path| Box::new(FileStateStore::new(path, cli.write_format)) as Box<dyn StateStore>);

    let interval = Duration::from_secs(cli.interval.unwrap_or(config.poll_interval_secs));
    let mut scheduler = Scheduler::new(
        poller,
        devices,
        state,
        interval,
        config.on_auth_failure,
        config.on_total_failure,
        store_out,
    );

    if cli.once {
        let result = scheduler.run_once().await?;
        if !cli.quiet {
            println!("{}", serde_json::to_string(&result.outcomes)?);
        }
        if result.has_fatal() {
            anyhow::bail!(
                "round completed with fatal device classifications: {}",
                describe_fatals(&result)
            );
        }
    } else {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing the current round");
                let _ = tx.send(true);
            }
        });

        let stats = scheduler.run_continuous(rx, cli.rounds).await?;
        if cli.rounds.is_some() && stats.fatal_devices > 0 {
            anyhow::bail!(
                "{} fatal device classifications across {} rounds",
                stats.fatal_devices,
                stats.rounds
            );
        }
    }

    Ok(())
}

fn load_prior_state(cli: &Cli) -> anyhow::Result<FleetState> {
    let Some(path) = &cli.state_in else {
        return Ok(FleetState::default());
    };

    let store = FileStateStore::new(path, cli.read_format);
    match store.load() {
        Ok(snapshot) => {
            tracing::info!(
                path = %path.display(),
                devices = snapshot.fleet.len(),
                saved_at = %snapshot.saved_at,
                "Prior state loaded"
            );
            Ok(snapshot.fleet)
        }
        Err(StoreError::NotFound(_)) if cli.fresh => {
            tracing::info!(path = %path.display(), "No prior state, starting fresh");
            Ok(FleetState::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn describe_fatals(result: &RoundResult) -> String {
    use confwatch_core::DeviceOutcome;

    result
        .outcomes
        .iter()
        .filter_map(|o| match o {
            DeviceOutcome::AuthFailed { device, detail } => {
                Some(format!("{device}: authentication failure ({detail})"))
            }
            DeviceOutcome::Rollback {
                device,
                counter,
                stored,
                observed,
            } => Some(format!(
                "{device}: {counter} rolled back from {stored} to {observed}"
            )),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn load_monitor_config(file_prefix: &str) -> anyhow::Result<MonitorConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("CONFWATCH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<MonitorConfig>("monitor") {
        Ok(c) => Ok(c),
        Err(_) => Ok(MonitorConfig::default()),
    }
}
