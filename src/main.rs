use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use vehguard::config::{LoggingConfig, VehguardConfig};
use vehguard::metrics::Metrics;
use vehguard::sink::{HealthStatus, ResilientDualSink};
use vehguard::storage::AnomalyTable;
use vehguard::telemetry::simulate::{self, SimulationParams};

#[derive(Parser)]
#[command(
    name = "vehguard",
    about = "Real-time anomaly detection for connected-vehicle telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $VEHGUARD_CONFIG, then /etc/vehguard/vehguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect anomalies in a JSON-lines event stream
    Run {
        /// Input file (reads stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Create the relational fallback table and indexes
    InitDb,

    /// Check both anomaly stores and report their health
    Check {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent anomalies in the relational fallback table
    Recent {
        /// Number of rows to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Print a synthetic event stream as JSON lines
    Simulate {
        /// Number of vehicles
        #[arg(long, default_value = "5")]
        vehicles: usize,

        /// Number of events
        #[arg(long, default_value = "100")]
        events: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// First event time in ms since epoch (defaults to now)
        #[arg(long)]
        start_ms: Option<i64>,
    },
}

/// Resolve the config under a stderr subscriber so its warnings are seen
/// before the configured one is installed.
fn resolve_config(explicit: Option<&std::path::Path>) -> Result<VehguardConfig> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || VehguardConfig::resolve(explicit))
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));
    // stdout carries data (simulate, recent); logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run { input } => {
            tracing::info!(input = ?input, "Starting vehguard");
            vehguard::run(config, input.as_deref()).await?;
        }
        Commands::InitDb => {
            let table = AnomalyTable::open(&config.relational)?;
            println!(
                "Table '{}' ready in {}",
                table.table(),
                config.relational.path.display()
            );
        }
        Commands::Check { json } => {
            let metrics = Arc::new(Metrics::new()?);
            let sink =
                tokio::task::spawn_blocking(move || ResilientDualSink::connect(&config, metrics)).await?;
            let health = sink.health();
            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                println!("{:<12} | Status", "Store");
                println!("{:-<12}-|-{:-<12}", "", "");
                println!("{:<12} | {}", "queue", up_down(health.queue));
                println!("{:<12} | {}", "relational", up_down(health.relational));
                if let Some(n) = health.queue_backlog {
                    println!("Queue backlog: {}", n);
                }
                println!("Overall: {:?}", health.status);
            }
            sink.close();
            if health.status == HealthStatus::Unhealthy {
                bail!("no anomaly store is reachable");
            }
        }
        Commands::Recent { limit } => {
            let table = AnomalyTable::open(&config.relational)?;
            let rows = table.recent(limit)?;
            if rows.is_empty() {
                println!("No anomalies stored.");
            }
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        Commands::Simulate {
            vehicles,
            events,
            seed,
            start_ms,
        } => {
            let mut params = SimulationParams {
                vehicles,
                events,
                seed,
                ..Default::default()
            };
            if let Some(start) = start_ms {
                params.start_ms = start;
            }
            for event in simulate::generate(&params) {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(())
}

fn up_down(ok: bool) -> &'static str {
    if ok {
        "UP"
    } else {
        "DOWN"
    }
}
