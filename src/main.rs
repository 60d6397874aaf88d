//! `tickwindow` binary: the orchestrator entry point and the hidden
//! worker subcommand it forks.
//!
//! Forking workers re-executes this binary with `worker …`, which keeps
//! the process boundary of the design: every worker gets its own address
//! space and its own core, and talks back exclusively through its ring
//! buffer.
//!
//! The binary binds no live transport; workers run backfill-only and exit
//! when their logs are replayed. Long-running deployments embed
//! [`tickwindow_rs::worker::run_worker`] with a real [`LiveFeed`]
//! implementation bound to the pub/sub endpoints in
//! [`tickwindow_rs::feed`].

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tickwindow_rs::feed::ChannelFeed;
use tickwindow_rs::keys::{Platform, WindowKind};
use tickwindow_rs::orchestrator::{PipelineConfig, parse_checkpoint_arg, run_pipeline};
use tickwindow_rs::ring::{DEFAULT_CAP, Ring, RingAddr, ShutdownFlag};
use tickwindow_rs::store::SegmentLog;
use tickwindow_rs::window::{BookHandler, TradeHandler};
use tickwindow_rs::worker::{WorkerOptions, run_worker};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tickwindow", version, about = "Real-time market-data windowing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator: distribute pipelines across worker processes
    /// and drain their windows into the windows log.
    Run(RunArgs),

    /// Internal: one window-worker process. Spawned by `run`.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Streams to window, as `platform:symbol` (repeatable),
    /// e.g. `--pair binance:btc_usdt --pair kraken:eth_usdt`.
    #[arg(long = "pair", value_name = "PLATFORM:SYMBOL", required = true)]
    pairs: Vec<String>,

    /// Window sizes in milliseconds (repeatable).
    #[arg(long = "window-size", value_name = "MS", default_values_t = vec![30_000u32])]
    window_sizes_ms: Vec<u32>,

    /// Base directory of the event logs, laid out as
    /// `{base}/{platform}/{trade|order_book}/{symbol}`.
    #[arg(long, env = "TICKWINDOW_EVENT_LOG_BASE")]
    event_log_base: PathBuf,

    /// Directory of the windows log this pipeline writes.
    #[arg(long, env = "TICKWINDOW_WINDOWS_DIR")]
    windows_dir: PathBuf,

    /// Worker process budget; defaults to the machine's parallelism.
    #[arg(long)]
    workers: Option<usize>,

    /// Ring-buffer data capacity per worker, a power of two.
    #[arg(long, default_value_t = DEFAULT_CAP)]
    ring_capacity: u32,
}

#[derive(Args)]
struct WorkerArgs {
    #[arg(long)]
    shm_data: String,
    #[arg(long)]
    shm_index: String,
    #[arg(long)]
    ring_capacity: u32,
    #[arg(long)]
    shutdown_shm: String,
    #[arg(long)]
    log_dir: PathBuf,
    #[arg(long)]
    platform: Platform,
    #[arg(long)]
    kind: WindowKind,
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    window_sizes: Vec<u32>,
    #[arg(long, default_value = "")]
    checkpoints: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run(args) => runtime.block_on(orchestrate(args)),
        Command::Worker(args) => runtime.block_on(work(args)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!(error = %message, "exiting with failure");
            ExitCode::FAILURE
        }
    }
}

fn parse_pair(pair: &str) -> Result<(Platform, String), String> {
    let (platform, symbol) = pair
        .split_once(':')
        .ok_or_else(|| format!("pair {pair:?} is not of the form platform:symbol"))?;
    let platform: Platform = platform.parse().map_err(|e| format!("{e}"))?;
    Ok((platform, symbol.to_string()))
}

async fn orchestrate(args: RunArgs) -> Result<(), String> {
    let mut platform_symbols = Vec::with_capacity(args.pairs.len());
    for pair in &args.pairs {
        platform_symbols.push(parse_pair(pair)?);
    }

    let mut store = SegmentLog::open(&args.windows_dir).map_err(|e| e.to_string())?;
    let config = PipelineConfig {
        platform_symbols,
        window_sizes_ms: args.window_sizes_ms,
        num_workers: args.workers,
        event_log_base: args.event_log_base,
        ring_capacity: args.ring_capacity,
    };

    info!(pairs = ?args.pairs, sizes = ?config.window_sizes_ms, "starting pipeline");
    run_pipeline(&mut store, &config)
        .await
        .map_err(|e| e.to_string())
}

async fn work(args: WorkerArgs) -> Result<(), String> {
    let addr = RingAddr {
        data_name: args.shm_data,
        index_name: args.shm_index,
        cap: args.ring_capacity,
    };
    let ring = Ring::attach(&addr).map_err(|e| e.to_string())?;
    let shutdown = ShutdownFlag::attach(&args.shutdown_shm).map_err(|e| e.to_string())?;

    let opts = WorkerOptions {
        platform: args.platform,
        log_dir: args.log_dir,
        symbols: args.symbols,
        window_sizes_ms: args.window_sizes,
        checkpoints: parse_checkpoint_arg(&args.checkpoints),
    };

    // No live transport is bound in this binary: every feed factory
    // returns None and workers exit once backfill completes.
    let result = match args.kind {
        WindowKind::Trade => {
            run_worker::<TradeHandler, ChannelFeed, _>(&ring, &shutdown, &opts, |_| None).await
        }
        WindowKind::Order => {
            run_worker::<BookHandler, ChannelFeed, _>(&ring, &shutdown, &opts, |_| None).await
        }
    };

    result.map_err(|e| e.to_string())
}
