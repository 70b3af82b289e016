use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use candela::collector::{CollectorSupervisor, SupervisorParams};
use candela::config::CandelaConfig;
use candela::gateway::{self, GatewayState};
use candela::persister::{Persister, PersisterParams};
use candela::reconciler::{
    BackfillOptions, BackfillStatus, Reconciler, RepairStats, WindowedOptions,
};
use candela_broker::RedisBroker;
use candela_core::broker::{Broker, WINDOWED_LOCK_KEY};
use candela_core::connector::VenueConnector;
use candela_core::error::CandelaError;
use candela_core::types::{Symbol, Timeframe};
use candela_okx::OkxConnector;
use candela_store::PgCandleStore;

#[derive(Parser)]
#[command(name = "candela", version, about = "OKX candlestick ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the collector service (stream workers + supervisor).
    Collect {
        /// Extra symbols to start immediately, comma-separated.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Override the configured default timeframes, comma-separated.
        #[arg(long, value_delimiter = ',')]
        timeframes: Vec<String>,
    },
    /// Run the persister service (batch drain + DLQ + metrics).
    Persist,
    /// Run the HTTP control gateway.
    Gateway,
    /// Audit and repair stored candle history.
    Reconcile {
        #[command(subcommand)]
        job: ReconcileJob,
    },
}

#[derive(Subcommand)]
enum ReconcileJob {
    /// Repair the trailing window: dedup, purge, gap fill.
    Windowed {
        /// Trailing window length in hours.
        #[arg(long, default_value_t = 25)]
        hours: i64,
        /// Restrict to these symbols, comma-separated; default is every
        /// symbol active in the window.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Detect and report only; change nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Walk a historical range for one symbol and upsert it.
    Backfill {
        /// Symbol to backfill, e.g. BTC-USDT-SWAP.
        symbol: String,
        /// How many days back to start.
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// Timeframes to walk, comma-separated.
        #[arg(long, value_delimiter = ',')]
        timeframes: Vec<String>,
        /// Print the plan only; fetch and write nothing.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "candela failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), CandelaError> {
    let config = CandelaConfig::load()?;
    match cli.command {
        Command::Collect { symbols, timeframes } => run_collect(config, symbols, timeframes).await,
        Command::Persist => run_persist(config).await,
        Command::Gateway => run_gateway(config).await,
        Command::Reconcile { job } => match job {
            ReconcileJob::Windowed {
                hours,
                symbols,
                dry_run,
            } => run_windowed(config, hours, symbols, dry_run).await,
            ReconcileJob::Backfill {
                symbol,
                days,
                timeframes,
                dry_run,
            } => run_backfill(config, symbol, days, timeframes, dry_run).await,
        },
    }
}

async fn run_collect(
    config: CandelaConfig,
    symbols: Vec<String>,
    timeframes: Vec<String>,
) -> Result<(), CandelaError> {
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.broker).await?);
    let venue: Arc<dyn VenueConnector> = Arc::new(OkxConnector::new(config.venue.clone())?);

    let mut collector = config.collector.clone();
    if !timeframes.is_empty() {
        collector.default_timeframes = parse_timeframes(&timeframes)?;
    }
    let supervisor = CollectorSupervisor::new(SupervisorParams {
        broker,
        venue,
        collector,
        backoff: config.backoff,
        initial_symbols: symbols.into_iter().map(Symbol::from).collect(),
    });
    supervisor.run(shutdown_signal()).await
}

async fn run_persist(config: CandelaConfig) -> Result<(), CandelaError> {
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.broker).await?);
    let store = PgCandleStore::connect(&config.store).await?;
    let persister = Persister::new(PersisterParams {
        broker,
        writer: Arc::new(store),
        batch: config.batch,
    });
    persister.run(shutdown_signal()).await;
    Ok(())
}

async fn run_gateway(config: CandelaConfig) -> Result<(), CandelaError> {
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.broker).await?);
    let state = GatewayState {
        broker,
        default_timeframes: config.collector.default_timeframes.clone(),
    };
    gateway::serve(state, &config.gateway.host, config.gateway.port, shutdown_signal()).await
}

async fn run_windowed(
    config: CandelaConfig,
    hours: i64,
    symbols: Vec<String>,
    dry_run: bool,
) -> Result<(), CandelaError> {
    if hours <= 0 {
        return Err(CandelaError::invalid_arg("--hours must be positive"));
    }
    let broker = RedisBroker::connect(&config.broker).await?;
    if !dry_run
        && !broker
            .try_lock(WINDOWED_LOCK_KEY, Duration::from_secs(3600))
            .await?
    {
        info!("previous windowed run still active, skipping this one");
        return Ok(());
    }

    let store = Arc::new(PgCandleStore::connect(&config.store).await?);
    let venue = Arc::new(OkxConnector::new(config.venue.clone())?);
    let reconciler = Reconciler::new(store, venue);

    let options = WindowedOptions {
        hours,
        symbols: if symbols.is_empty() {
            None
        } else {
            Some(symbols.into_iter().map(Symbol::from).collect())
        },
        timeframes: Timeframe::RECONCILE_DEFAULTS.to_vec(),
        dry_run,
    };
    let result = reconciler
        .run_windowed(&options, Utc::now().timestamp_millis())
        .await;
    if !dry_run && !broker.delete_kv(WINDOWED_LOCK_KEY).await.unwrap_or(false) {
        warn!("windowed lock expired before the run finished");
    }

    let stats = result?;
    print_repair_report(&stats, dry_run);
    Ok(())
}

async fn run_backfill(
    config: CandelaConfig,
    symbol: String,
    days: i64,
    timeframes: Vec<String>,
    dry_run: bool,
) -> Result<(), CandelaError> {
    if days <= 0 {
        return Err(CandelaError::invalid_arg("--days must be positive"));
    }
    let store = Arc::new(PgCandleStore::connect(&config.store).await?);
    let venue = Arc::new(OkxConnector::new(config.venue.clone())?);
    let reconciler = Reconciler::new(store, venue);

    let options = BackfillOptions {
        symbols: vec![Symbol::from(symbol)],
        timeframes: if timeframes.is_empty() {
            Timeframe::RECONCILE_DEFAULTS.to_vec()
        } else {
            parse_timeframes(&timeframes)?
        },
        days,
        dry_run,
    };
    let progresses = reconciler
        .run_backfill(&options, Utc::now().timestamp_millis())
        .await;

    println!("historical backfill report ({days} days)");
    let mut failed = false;
    for p in &progresses {
        println!(
            "  {}/{}: expected {}, fetched {}, inserted {}, duplicates {}, {:?}",
            p.symbol,
            p.timeframe,
            p.total_expected,
            p.total_fetched,
            p.total_inserted,
            p.total_duplicates,
            p.status
        );
        failed |= p.status == BackfillStatus::Failed;
    }
    if failed {
        return Err(CandelaError::venue("okx", "one or more series failed to backfill"));
    }
    Ok(())
}

fn print_repair_report(stats: &RepairStats, dry_run: bool) {
    if dry_run {
        println!("windowed reconciliation report (dry run)");
    } else {
        println!("windowed reconciliation report");
    }
    println!("  symbols processed:    {}", stats.symbols_processed);
    println!("  timeframes processed: {}", stats.timeframes_processed);
    println!("  gaps found:           {}", stats.gaps_found);
    println!("  candles filled:       {}", stats.candles_filled);
    println!("  duplicates removed:   {}", stats.duplicates_removed);
    println!("  invalid rows purged:  {}", stats.invalid_purged);
    println!("  rest calls:           {}", stats.rest_calls);
    println!("  errors:               {}", stats.errors);
}

fn parse_timeframes(raw: &[String]) -> Result<Vec<Timeframe>, CandelaError> {
    raw.iter().map(|tf| tf.parse()).collect()
}

fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
        }
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}
