//! The orchestrator: checkpoint discovery, work distribution, worker
//! process lifecycles and the windows-log drain loop.
//!
//! The orchestrator owns the consumer end of every worker's ring buffer
//! and the only writable handle on the windows log. Startup reverse-scans
//! that log once to recover per-pipeline checkpoints, greedily merges the
//! per-`(platform, symbol, kind, size)` work items down to the core
//! budget, and forks one OS process per remaining config. A single
//! cooperative loop then round-robins every ring buffer into the store and
//! reaps workers whose process has exited and whose ring is drained.

use crate::keys::{KeyError, Platform, WindowKey, WindowKind};
use crate::ring::{Ring, RingAddr, RingError, ShutdownFlag};
use crate::store::{StoreError, WindowStore};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sleep when a full drain pass yields no records.
const DRAIN_IDLE_SLEEP: Duration = Duration::from_millis(500);

/// Cadence of the dead-worker reaper.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Per-worker join timeout before a forcible kill at shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while joining workers.
const JOIN_POLL: Duration = Duration::from_millis(100);

/// Drained records between progress log lines.
const READ_LOG_EVERY: u64 = 10_000;

/// Errors that abort the pipeline.
#[derive(Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// Ring-buffer shared memory failed.
    Ring(RingError),
    /// The windows log failed.
    Store(StoreError),
    /// A worker emitted bytes that do not decode as a window key. This can
    /// only happen through memory corruption or a protocol violation, so
    /// the pipeline refuses to advance.
    MalformedKey {
        /// The decode failure.
        source: KeyError,
        /// Length of the offending key.
        key_len: usize,
    },
    /// A worker process could not be spawned.
    Spawn {
        /// The underlying OS error message.
        message: String,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Ring(err) => write!(f, "pipeline ring error: {err}"),
            PipelineError::Store(err) => write!(f, "pipeline store error: {err}"),
            PipelineError::MalformedKey { source, key_len } => {
                write!(
                    f,
                    "malformed window key ({key_len} bytes) from worker ring: {source}"
                )
            }
            PipelineError::Spawn { message } => write!(f, "failed to spawn worker: {message}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<RingError> for PipelineError {
    fn from(err: RingError) -> Self {
        PipelineError::Ring(err)
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err)
    }
}

/// The checkpoint-map key for one `(platform, symbol, kind, size)` tuple.
#[must_use]
pub fn checkpoint_key(
    platform: Platform,
    symbol: &str,
    kind: WindowKind,
    window_size_ms: u32,
) -> String {
    format!("{platform}-{symbol}-{kind}-{window_size_ms}")
}

/// One worker process assignment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Platform of every stream in this assignment.
    pub platform: Platform,
    /// Trade or order-book streams.
    pub kind: WindowKind,
    /// Symbols served, sorted.
    pub symbols: Vec<String>,
    /// Window sizes, sorted.
    pub window_sizes_ms: Vec<u32>,
    /// Per-symbol resume checkpoint; `None` backfills from the beginning.
    pub checkpoints: HashMap<String, Option<i64>>,
}

impl WorkerConfig {
    /// Stable id matching the worker's own log span.
    #[must_use]
    pub fn id(&self) -> String {
        let sizes: Vec<String> = self.window_sizes_ms.iter().map(ToString::to_string).collect();
        format!(
            "{}-{}-{}-{}",
            self.platform,
            self.kind,
            self.symbols.join("_"),
            sizes.join("_")
        )
    }
}

/// Reverse-scan the windows log once, recording the newest `window_end_ms`
/// seen for every configured `(platform, symbol, kind, size)` tuple.
///
/// Tuples never persisted stay `None` (backfill from the beginning). The
/// scan stops early once every tuple is resolved. Keys that fail to decode
/// are skipped with a warning: discovery tolerates foreign entries, the
/// drain loop does not.
///
/// # Errors
///
/// Returns [`PipelineError::Store`] if the log cannot be scanned.
pub fn discover_checkpoints<S: WindowStore>(
    store: &S,
    platform_symbols: &[(Platform, String)],
    window_sizes_ms: &[u32],
) -> Result<HashMap<String, Option<i64>>, PipelineError> {
    let mut checkpoints: HashMap<String, Option<i64>> = HashMap::new();
    for (platform, symbol) in platform_symbols {
        for kind in [WindowKind::Trade, WindowKind::Order] {
            for size in window_sizes_ms {
                checkpoints.insert(checkpoint_key(*platform, symbol, kind, *size), None);
            }
        }
    }

    let mut unresolved = checkpoints.len();
    for entry in store.iter_rev()? {
        if unresolved == 0 {
            break;
        }
        let (key_bytes, _) = entry?;
        let key = match WindowKey::unpack(&key_bytes) {
            Ok(key) => key,
            Err(err) => {
                warn!(%err, "skipping undecodable key during checkpoint discovery");
                continue;
            }
        };

        let map_key = checkpoint_key(key.platform, &key.symbol, key.kind, key.window_size_ms);
        if let Some(slot) = checkpoints.get_mut(&map_key)
            && slot.is_none()
        {
            *slot = Some(key.window_end_ms as i64);
            unresolved -= 1;
        }
    }

    debug!(?checkpoints, "checkpoint discovery finished");
    Ok(checkpoints)
}

/// Combine two checkpoints conservatively: `None` (full backfill) wins,
/// otherwise the older one. Re-emitting a window is an idempotent `put`;
/// skipping one loses data.
fn merge_checkpoint(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        _ => None,
    }
}

fn merge_configs(target: &WorkerConfig, source: &WorkerConfig) -> WorkerConfig {
    let mut symbols = target.symbols.clone();
    for symbol in &source.symbols {
        if !symbols.contains(symbol) {
            symbols.push(symbol.clone());
        }
    }
    symbols.sort_unstable();

    let mut sizes = target.window_sizes_ms.clone();
    for size in &source.window_sizes_ms {
        if !sizes.contains(size) {
            sizes.push(*size);
        }
    }
    sizes.sort_unstable();

    let mut checkpoints = target.checkpoints.clone();
    for (symbol, checkpoint) in &source.checkpoints {
        checkpoints
            .entry(symbol.clone())
            .and_modify(|existing| *existing = merge_checkpoint(*existing, *checkpoint))
            .or_insert(*checkpoint);
    }

    WorkerConfig {
        platform: target.platform,
        kind: target.kind,
        symbols,
        window_sizes_ms: sizes,
        checkpoints,
    }
}

/// Distribute work across at most `target_workers` processes.
///
/// Starts from one config per `(platform, symbol, kind, size)` and
/// greedily merges pairs inside the largest `(platform, kind)` group until
/// the count fits. Streams of different platforms or kinds never share a
/// process.
#[must_use]
pub fn distribute_work(
    platform_symbols: &[(Platform, String)],
    window_sizes_ms: &[u32],
    checkpoints: &HashMap<String, Option<i64>>,
    target_workers: usize,
) -> Vec<WorkerConfig> {
    let mut configs: Vec<WorkerConfig> = Vec::new();
    for (platform, symbol) in platform_symbols {
        for kind in [WindowKind::Trade, WindowKind::Order] {
            for size in window_sizes_ms {
                let checkpoint = checkpoints
                    .get(&checkpoint_key(*platform, symbol, kind, *size))
                    .copied()
                    .flatten();
                configs.push(WorkerConfig {
                    platform: *platform,
                    kind,
                    symbols: vec![symbol.clone()],
                    window_sizes_ms: vec![*size],
                    checkpoints: HashMap::from([(symbol.clone(), checkpoint)]),
                });
            }
        }
    }

    let target_workers = target_workers.max(1);
    while configs.len() > target_workers {
        // Find the largest (platform, kind) group with at least two
        // configs; merging its first pair shrinks the total by one.
        let mut group_sizes: HashMap<(Platform, WindowKind), usize> = HashMap::new();
        for config in &configs {
            *group_sizes.entry((config.platform, config.kind)).or_insert(0) += 1;
        }

        let Some(((platform, kind), _)) = group_sizes
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .max_by_key(|(_, count)| *count)
        else {
            break; // Nothing left to merge.
        };

        let first = configs
            .iter()
            .position(|c| c.platform == platform && c.kind == kind);
        let Some(first) = first else { break };
        let target = configs.remove(first);
        let second = configs
            .iter()
            .position(|c| c.platform == platform && c.kind == kind);
        let Some(second) = second else {
            configs.push(target);
            break;
        };
        let source = configs.remove(second);
        configs.push(merge_configs(&target, &source));
    }

    configs
}

/// Encode a per-symbol checkpoint map for the worker CLI:
/// `sym=123,other=` (empty value means no checkpoint).
#[must_use]
pub fn encode_checkpoint_arg(checkpoints: &HashMap<String, Option<i64>>) -> String {
    let mut entries: Vec<String> = checkpoints
        .iter()
        .map(|(symbol, checkpoint)| match checkpoint {
            Some(ms) => format!("{symbol}={ms}"),
            None => format!("{symbol}="),
        })
        .collect();
    entries.sort_unstable();
    entries.join(",")
}

/// Parse the worker CLI checkpoint argument back into a map.
#[must_use]
pub fn parse_checkpoint_arg(arg: &str) -> HashMap<String, Option<i64>> {
    let mut checkpoints = HashMap::new();
    for entry in arg.split(',').filter(|e| !e.is_empty()) {
        let (symbol, value) = entry.split_once('=').unwrap_or((entry, ""));
        let checkpoint = if value.is_empty() {
            None
        } else {
            value.parse::<i64>().ok()
        };
        checkpoints.insert(symbol.to_string(), checkpoint);
    }
    checkpoints
}

/// Static configuration of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The `(platform, symbol)` streams to window.
    pub platform_symbols: Vec<(Platform, String)>,
    /// Window sizes computed for every stream.
    pub window_sizes_ms: Vec<u32>,
    /// Worker process budget; defaults to the machine's parallelism.
    pub num_workers: Option<usize>,
    /// Base directory of the event logs, laid out as
    /// `{base}/{platform}/{trade|order_book}/{symbol}`.
    pub event_log_base: PathBuf,
    /// Ring-buffer data capacity per worker.
    pub ring_capacity: u32,
}

/// One spawned worker and its consumer-side ring.
struct WorkerHandle {
    id: String,
    child: Child,
    ring: Ring,
    reads: u64,
}

impl WorkerHandle {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Spawn one worker process with a freshly allocated ring buffer.
fn spawn_worker(
    config: &WorkerConfig,
    pipeline: &PipelineConfig,
    shutdown_name: &str,
) -> Result<WorkerHandle, PipelineError> {
    let (ring, addr) = Ring::create(pipeline.ring_capacity)?;
    let RingAddr {
        data_name,
        index_name,
        cap,
    } = &addr;

    let exe = std::env::current_exe().map_err(|e| PipelineError::Spawn {
        message: e.to_string(),
    })?;
    let log_dir = pipeline
        .event_log_base
        .join(config.platform.to_string())
        .join(config.kind.log_dirname());

    let sizes: Vec<String> = config.window_sizes_ms.iter().map(ToString::to_string).collect();
    let child = Command::new(exe)
        .arg("worker")
        .arg("--shm-data")
        .arg(data_name)
        .arg("--shm-index")
        .arg(index_name)
        .arg("--ring-capacity")
        .arg(cap.to_string())
        .arg("--shutdown-shm")
        .arg(shutdown_name)
        .arg("--log-dir")
        .arg(&log_dir)
        .arg("--platform")
        .arg(config.platform.to_string())
        .arg("--kind")
        .arg(config.kind.to_string())
        .arg("--symbols")
        .arg(config.symbols.join(","))
        .arg("--window-sizes")
        .arg(sizes.join(","))
        .arg("--checkpoints")
        .arg(encode_checkpoint_arg(&config.checkpoints))
        .spawn()
        .map_err(|e| PipelineError::Spawn {
            message: e.to_string(),
        })?;

    info!(id = %config.id(), pid = child.id(), "worker spawned");
    Ok(WorkerHandle {
        id: config.id(),
        child,
        ring,
        reads: 0,
    })
}

/// Install a task that sets the shutdown flag on SIGINT/SIGTERM.
fn spawn_signal_watcher(shutdown: Arc<ShutdownFlag>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        shutdown.set();
    });
}

/// Round-robin every worker's ring into the windows log until all workers
/// are reaped or shutdown is requested. The reaper runs on the same
/// thread, one pass per second.
async fn drain_loop<S: WindowStore>(
    store: &mut S,
    workers: &mut Vec<WorkerHandle>,
    shutdown: &ShutdownFlag,
) -> Result<(), PipelineError> {
    let started = Instant::now();
    let mut total_reads = 0u64;
    let mut last_reap = Instant::now();

    while !workers.is_empty() && !shutdown.is_set() {
        let mut read_any = false;

        for worker in workers.iter_mut() {
            let Some((key, value)) = worker.ring.read() else {
                continue;
            };
            read_any = true;
            worker.reads += 1;
            total_reads += 1;

            // A key that does not decode can only come from memory
            // corruption or a protocol violation: refuse to advance.
            if let Err(source) = WindowKey::unpack(&key) {
                error!(%source, key_len = key.len(), "fatal: malformed key in ring");
                return Err(PipelineError::MalformedKey {
                    source,
                    key_len: key.len(),
                });
            }
            store.put(&key, &value)?;

            if total_reads % READ_LOG_EVERY == 0 {
                debug!(
                    total_reads,
                    elapsed_s = started.elapsed().as_secs_f64(),
                    "drained windows into store"
                );
            }
        }

        if last_reap.elapsed() >= REAP_INTERVAL {
            last_reap = Instant::now();
            reap_finished(workers);
        }

        if read_any {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(DRAIN_IDLE_SLEEP).await;
        }
    }

    Ok(())
}

/// Release workers whose process has exited and whose ring is drained.
fn reap_finished(workers: &mut Vec<WorkerHandle>) {
    workers.retain_mut(|worker| {
        if worker.is_alive() || !worker.ring.is_drained() {
            return true;
        }
        if let Err(err) = worker.ring.unlink() {
            warn!(id = %worker.id, %err, "failed to unlink ring segments");
        }
        info!(id = %worker.id, reads = worker.reads, "worker finished and reaped");
        false
    });
}

/// Join every remaining worker with a timeout, then forcibly terminate the
/// stragglers and unlink their shared memory.
async fn join_workers(workers: &mut Vec<WorkerHandle>) {
    for worker in workers.iter_mut() {
        let deadline = Instant::now() + JOIN_TIMEOUT;
        loop {
            match worker.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(id = %worker.id, %status, "worker exited");
                    break;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!(id = %worker.id, "worker join timed out, killing");
                    let _ = worker.child.kill();
                    let _ = worker.child.wait();
                    break;
                }
                Ok(None) => tokio::time::sleep(JOIN_POLL).await,
                Err(err) => {
                    warn!(id = %worker.id, %err, "worker wait failed");
                    break;
                }
            }
        }
        if let Err(err) = worker.ring.unlink() {
            warn!(id = %worker.id, %err, "failed to unlink ring segments");
        }
    }
    workers.clear();
}

/// Run the whole pipeline: discovery, distribution, workers, drain loop
/// and shutdown.
///
/// Returns when every worker has finished (live transports closed), or
/// after a shutdown signal, or on the first fatal error.
///
/// # Errors
///
/// Returns [`PipelineError`] on store failures, malformed ring keys, or
/// spawn failures. Cleanup (shutdown flag, joins, shm unlinking) runs on
/// every exit path.
pub async fn run_pipeline<S: WindowStore>(
    store: &mut S,
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    let checkpoints =
        discover_checkpoints(store, &config.platform_symbols, &config.window_sizes_ms)?;

    let target_workers = config
        .num_workers
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |n| n.get()));
    let worker_configs = distribute_work(
        &config.platform_symbols,
        &config.window_sizes_ms,
        &checkpoints,
        target_workers,
    );
    info!(
        workers = worker_configs.len(),
        target_workers,
        ids = ?worker_configs.iter().map(WorkerConfig::id).collect::<Vec<_>>(),
        "distributing work"
    );

    let shutdown = Arc::new(ShutdownFlag::create(&format!(
        "tickwindow-{}-shutdown",
        Uuid::new_v4()
    ))?);
    spawn_signal_watcher(Arc::clone(&shutdown));

    let shutdown_name = shutdown.name().unwrap_or_default().to_string();
    let mut workers = Vec::with_capacity(worker_configs.len());
    let mut spawn_result = Ok(());
    for worker_config in &worker_configs {
        match spawn_worker(worker_config, config, &shutdown_name) {
            Ok(handle) => workers.push(handle),
            Err(err) => {
                spawn_result = Err(err);
                break;
            }
        }
    }

    let result = match spawn_result {
        Ok(()) => drain_loop(store, &mut workers, &shutdown).await,
        Err(err) => Err(err),
    };

    shutdown.set();
    join_workers(&mut workers).await;
    if let ShutdownFlag::Shared(segment) = shutdown.as_ref()
        && let Err(err) = segment.unlink()
    {
        warn!(%err, "failed to unlink shutdown segment");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs() -> Vec<(Platform, String)> {
        vec![
            (Platform::Binance, "btc_usdt".to_string()),
            (Platform::Binance, "eth_usdt".to_string()),
            (Platform::Kraken, "btc_usdt".to_string()),
        ]
    }

    #[test]
    fn test_distribute_without_pressure_keeps_singletons() {
        let configs = distribute_work(&pairs(), &[1000], &HashMap::new(), 100);
        // 3 streams x 2 kinds x 1 size.
        assert_eq!(configs.len(), 6);
        for config in &configs {
            assert_eq!(config.symbols.len(), 1);
            assert_eq!(config.window_sizes_ms.len(), 1);
        }
    }

    #[test]
    fn test_distribute_merges_within_platform_and_kind() {
        let configs = distribute_work(&pairs(), &[1000, 30_000], &HashMap::new(), 4);
        assert!(configs.len() <= 4);
        // Every (platform, symbol, kind, size) tuple keeps full coverage.
        let mut covered: Vec<(Platform, WindowKind, String, u32)> = Vec::new();
        for config in &configs {
            for symbol in &config.symbols {
                for size in &config.window_sizes_ms {
                    covered.push((config.platform, config.kind, symbol.clone(), *size));
                }
            }
        }
        for (platform, symbol) in pairs() {
            for kind in [WindowKind::Trade, WindowKind::Order] {
                for size in [1000, 30_000] {
                    assert!(
                        covered.contains(&(platform, kind, symbol.clone(), size)),
                        "missing coverage for {platform}-{kind}-{symbol}-{size}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_distribute_cannot_merge_below_group_count() {
        // One stream, two kinds: the two configs cannot merge across kinds.
        let pairs = vec![(Platform::Binance, "btc_usdt".to_string())];
        let configs = distribute_work(&pairs, &[1000], &HashMap::new(), 1);
        assert_eq!(configs.len(), 2);
    }

    #[test]
    fn test_merge_checkpoint_is_conservative() {
        assert_eq!(merge_checkpoint(None, Some(5)), None);
        assert_eq!(merge_checkpoint(Some(5), None), None);
        assert_eq!(merge_checkpoint(Some(5), Some(9)), Some(5));
        assert_eq!(merge_checkpoint(None, None), None);
    }

    #[test]
    fn test_checkpoint_arg_roundtrip() {
        let mut checkpoints = HashMap::new();
        checkpoints.insert("btc_usdt".to_string(), Some(123_456i64));
        checkpoints.insert("eth_usdt".to_string(), None);

        let encoded = encode_checkpoint_arg(&checkpoints);
        assert_eq!(encoded, "btc_usdt=123456,eth_usdt=");

        let decoded = parse_checkpoint_arg(&encoded);
        assert_eq!(decoded, checkpoints);
    }

    #[test]
    fn test_parse_checkpoint_arg_empty() {
        assert!(parse_checkpoint_arg("").is_empty());
    }

    #[test]
    fn test_discover_checkpoints_reads_newest_per_tuple() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| panic!("tempdir"));
        let mut store =
            crate::store::SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));

        let put = |store: &mut crate::store::SegmentLog, end: u64| {
            let key = WindowKey {
                window_end_ms: end,
                symbol: "btc_usdt".to_string(),
                kind: WindowKind::Trade,
                window_size_ms: 1000,
                platform: Platform::Binance,
            }
            .pack()
            .unwrap_or([0; 30]);
            assert!(WindowStore::put(store, &key, b"agg").is_ok());
        };
        put(&mut store, 1000);
        put(&mut store, 2000);
        put(&mut store, 3000);

        let pairs = vec![(Platform::Binance, "btc_usdt".to_string())];
        let checkpoints = discover_checkpoints(&store, &pairs, &[1000])
            .unwrap_or_else(|_| panic!("discover"));

        let trade_key = checkpoint_key(Platform::Binance, "btc_usdt", WindowKind::Trade, 1000);
        let order_key = checkpoint_key(Platform::Binance, "btc_usdt", WindowKind::Order, 1000);
        assert_eq!(checkpoints.get(&trade_key).copied().flatten(), Some(3000));
        assert_eq!(checkpoints.get(&order_key).copied().flatten(), None);
    }

    #[test]
    fn test_worker_config_id_is_stable() {
        let config = WorkerConfig {
            platform: Platform::Kraken,
            kind: WindowKind::Order,
            symbols: vec!["btc_usdt".to_string(), "eth_usdt".to_string()],
            window_sizes_ms: vec![1000, 30_000],
            checkpoints: HashMap::new(),
        };
        assert_eq!(config.id(), "kraken-order-btc_usdt_eth_usdt-1000_30000");
    }
}
