//! The backfill + live window worker.
//!
//! One worker process drives every `(symbol, window size)` pipeline of one
//! `(platform, kind)` assignment. It owns the writable end of one ring
//! buffer and a read-only (secondary) handle on the durable event log per
//! symbol. Phases:
//!
//! 1. **Backfill** — for each symbol, binary-search the event log for the
//!    checkpoint position and replay stored events through every window
//!    handler, emitting closed windows as they come.
//! 2. **Drain** — flush each handler's still-open window.
//! 3. **Live** — concurrently for all symbols, consume the gap-filling
//!    subscriber and keep feeding the handlers.
//!
//! Execution is single-threaded cooperative: backfill batches, live
//! receives and full-ring backoffs all interleave on one thread, which is
//! also what keeps the ring buffer's single-producer contract trivially
//! true. Shutdown is observed at every sleep and batch boundary; every
//! exit path releases the log and shared-memory handles by dropping them.

use crate::events::{EventError, StreamEvent};
use crate::feed::{FeedError, GapFillSubscriber, LiveFeed};
use crate::keys::{KeyError, Platform, WindowKey, WindowKind};
use crate::ring::{Ring, RingError, ShutdownFlag};
use crate::store::{EventLog, SegmentLog, StoreError, find_first_after, normalize_log_name};
use crate::window::WindowHandler;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Backoff while the ring buffer is full.
const RING_FULL_BACKOFF: Duration = Duration::from_millis(10);

/// Records processed between cooperative yields during backfill.
const BACKFILL_YIELD_EVERY: usize = 1000;

/// Emissions between progress log lines.
const EMIT_LOG_EVERY: u64 = 10_000;

/// Errors that abort a worker.
#[derive(Debug)]
#[non_exhaustive]
pub enum WorkerError {
    /// Ring-buffer shared memory failed.
    Ring(RingError),
    /// The durable event log failed.
    Store(StoreError),
    /// A window key could not be packed.
    Key(KeyError),
    /// A stored event payload could not be decoded.
    Event(EventError),
    /// A window aggregate could not be encoded.
    Encode {
        /// The underlying encoder error message.
        message: String,
    },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Ring(err) => write!(f, "worker ring error: {err}"),
            WorkerError::Store(err) => write!(f, "worker store error: {err}"),
            WorkerError::Key(err) => write!(f, "worker key error: {err}"),
            WorkerError::Event(err) => write!(f, "worker event error: {err}"),
            WorkerError::Encode { message } => {
                write!(f, "worker aggregate encode error: {message}")
            }
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<RingError> for WorkerError {
    fn from(err: RingError) -> Self {
        WorkerError::Ring(err)
    }
}

impl From<StoreError> for WorkerError {
    fn from(err: StoreError) -> Self {
        WorkerError::Store(err)
    }
}

impl From<KeyError> for WorkerError {
    fn from(err: KeyError) -> Self {
        WorkerError::Key(err)
    }
}

impl From<EventError> for WorkerError {
    fn from(err: EventError) -> Self {
        WorkerError::Event(err)
    }
}

/// Static configuration of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// The platform every symbol of this worker belongs to.
    pub platform: Platform,
    /// Directory containing one event-log subdirectory per symbol.
    pub log_dir: PathBuf,
    /// Symbols served by this worker.
    pub symbols: Vec<String>,
    /// Window sizes, one handler per size per symbol.
    pub window_sizes_ms: Vec<u32>,
    /// Per-symbol checkpoint (newest persisted window end), if any.
    pub checkpoints: HashMap<String, Option<i64>>,
}

impl WorkerOptions {
    /// Stable human-readable worker id used in logs.
    #[must_use]
    pub fn worker_id(&self, kind: WindowKind) -> String {
        let mut symbols = self.symbols.clone();
        symbols.sort_unstable();
        let mut sizes = self.window_sizes_ms.clone();
        sizes.sort_unstable();
        let sizes: Vec<String> = sizes.iter().map(ToString::to_string).collect();
        format!(
            "{}-{}-{}-{}",
            self.platform,
            kind,
            symbols.join("_"),
            sizes.join("_")
        )
    }
}

/// Run one worker over an attached ring buffer until its streams end or
/// shutdown is requested.
///
/// `make_feed` supplies the live transport per symbol; returning `None`
/// skips the live phase for that symbol (backfill-only operation).
///
/// # Errors
///
/// Returns [`WorkerError`] on ring, store, codec or key failures. Feed
/// failures are contained per symbol: the affected live pipeline logs the
/// error and ends while the rest keep running.
pub async fn run_worker<H, F, MkF>(
    ring: &Ring,
    shutdown: &ShutdownFlag,
    opts: &WorkerOptions,
    mut make_feed: MkF,
) -> Result<(), WorkerError>
where
    H: WindowHandler,
    H::Event: StreamEvent,
    F: LiveFeed,
    MkF: FnMut(&str) -> Option<F>,
{
    let worker_id = opts.worker_id(H::KIND);
    let span = info_span!("worker", id = %worker_id);

    async {
        info!(symbols = ?opts.symbols, sizes = ?opts.window_sizes_ms, "worker starting");

        let mut logs: HashMap<String, SegmentLog> = HashMap::new();
        let mut handlers: HashMap<String, Vec<H>> = HashMap::new();
        for symbol in &opts.symbols {
            let dir = opts.log_dir.join(normalize_log_name(symbol));
            logs.insert(symbol.clone(), SegmentLog::open_secondary(dir)?);
            handlers.insert(
                symbol.clone(),
                opts.window_sizes_ms.iter().map(|ws| H::new(*ws)).collect(),
            );
        }

        let mut emitted = 0u64;
        // Newest id replayed per symbol; seeds the live cursor so the gap
        // recovery covers anything appended between backfill and subscribe.
        let mut resume_ids: HashMap<String, i64> = HashMap::new();

        // Phase 1 + 2: backfill each symbol, then flush open windows.
        for symbol in &opts.symbols {
            if shutdown.is_set() {
                break;
            }
            let checkpoint = opts.checkpoints.get(symbol).copied().flatten().unwrap_or(0);
            let Some(log) = logs.get(symbol) else {
                continue;
            };
            let Some(symbol_handlers) = handlers.get_mut(symbol) else {
                continue;
            };

            let last_id = backfill_symbol(
                ring,
                shutdown,
                opts,
                symbol,
                checkpoint,
                log,
                symbol_handlers,
                &mut emitted,
            )
            .await?;
            if let Some(last_id) = last_id {
                resume_ids.insert(symbol.clone(), last_id);
            }

            for handler in symbol_handlers.iter() {
                if let Some((window_end, aggregate)) = handler.flush() {
                    emit_window(
                        ring,
                        shutdown,
                        opts.platform,
                        H::KIND,
                        symbol,
                        handler.window_size_ms(),
                        window_end,
                        &aggregate,
                        &mut emitted,
                    )
                    .await?;
                }
            }
        }

        // Phase 3: live consumption, all symbols concurrently on this
        // thread. The ring stays single-producer because emits never
        // interleave within one write call.
        if !shutdown.is_set() {
            let mut pipelines = Vec::new();
            for symbol in &opts.symbols {
                let Some(feed) = make_feed(symbol) else {
                    debug!(symbol = %symbol, "no live feed bound, backfill-only");
                    continue;
                };
                let Some(log) = logs.remove(symbol) else {
                    continue;
                };
                let Some(symbol_handlers) = handlers.remove(symbol) else {
                    continue;
                };
                let checkpoint = opts.checkpoints.get(symbol).copied().flatten().unwrap_or(0);
                let start_id = resume_ids.get(symbol).copied();

                pipelines.push(run_live_symbol(
                    ring,
                    shutdown,
                    opts,
                    symbol.clone(),
                    feed,
                    log,
                    symbol_handlers,
                    checkpoint,
                    start_id,
                ));
            }

            let results = futures_util::future::join_all(pipelines).await;
            let mut live_emitted = 0u64;
            for result in results {
                live_emitted += result?;
            }
            emitted += live_emitted;
        }

        info!(emitted, "worker done");
        Ok(())
    }
    .instrument(span)
    .await
}

/// Replay one symbol's stored events from its checkpoint; returns the id
/// of the newest replayed record.
#[allow(clippy::too_many_arguments)]
async fn backfill_symbol<H>(
    ring: &Ring,
    shutdown: &ShutdownFlag,
    opts: &WorkerOptions,
    symbol: &str,
    checkpoint_ms: i64,
    log: &SegmentLog,
    handlers: &mut [H],
    emitted: &mut u64,
) -> Result<Option<i64>, WorkerError>
where
    H: WindowHandler,
    H::Event: StreamEvent,
{
    let start_id = if checkpoint_ms > 0 {
        let found = find_first_after::<H::Event, _>(log, checkpoint_ms)?;
        if found.is_some() {
            debug!(symbol, checkpoint_ms, start_id = ?found, "resuming from checkpoint");
        }
        found
    } else {
        None
    };

    let mut last_id = None;
    let mut processed = 0usize;

    for record in log.iter_from(start_id)? {
        if shutdown.is_set() {
            break;
        }
        let record = record?;
        let mut event = H::Event::decode(&record.value)?;
        event.set_id(record.id);
        last_id = Some(record.id);

        for handler in handlers.iter_mut() {
            if let Some((window_end, aggregate)) = handler.handle(&event) {
                emit_window(
                    ring,
                    shutdown,
                    opts.platform,
                    H::KIND,
                    symbol,
                    handler.window_size_ms(),
                    window_end,
                    &aggregate,
                    emitted,
                )
                .await?;
            }
        }

        processed += 1;
        if processed % BACKFILL_YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    debug!(symbol, processed, "backfill finished");
    Ok(last_id)
}

/// Consume one symbol's live stream until the feed ends or shutdown.
/// Returns the number of windows emitted.
#[allow(clippy::too_many_arguments)]
async fn run_live_symbol<H, F>(
    ring: &Ring,
    shutdown: &ShutdownFlag,
    opts: &WorkerOptions,
    symbol: String,
    feed: F,
    log: SegmentLog,
    mut handlers: Vec<H>,
    checkpoint_ms: i64,
    start_id: Option<i64>,
) -> Result<u64, WorkerError>
where
    H: WindowHandler,
    H::Event: StreamEvent,
    F: LiveFeed,
{
    let mut subscriber = GapFillSubscriber::new(feed, log, start_id)?;
    let mut emitted = 0u64;
    let mut events = 0u64;

    info!(symbol = %symbol, start_id = subscriber.last_processed(), "live pipeline starting");

    while !shutdown.is_set() {
        let batch = match subscriber.next_batch::<H::Event>().await {
            Ok(batch) => batch,
            Err(FeedError::Closed) => {
                info!(symbol = %symbol, events, "live feed closed");
                break;
            }
            Err(err) => {
                // Contained: this symbol's live pipeline ends, the worker
                // keeps serving its other symbols.
                error!(symbol = %symbol, %err, "live pipeline failed");
                break;
            }
        };

        for event in &batch {
            if shutdown.is_set() {
                break;
            }
            // Events at or before the checkpoint were already windowed
            // before the restart.
            if event.time() <= checkpoint_ms {
                continue;
            }
            events += 1;

            for handler in handlers.iter_mut() {
                if let Some((window_end, aggregate)) = handler.handle(event) {
                    emit_window(
                        ring,
                        shutdown,
                        opts.platform,
                        H::KIND,
                        &symbol,
                        handler.window_size_ms(),
                        window_end,
                        &aggregate,
                        &mut emitted,
                    )
                    .await?;
                }
            }
        }

        tokio::task::yield_now().await;
    }

    Ok(emitted)
}

/// Push one finalized window into the ring buffer, backing off while it is
/// full. Gives up (without emitting) only when shutdown is observed.
#[allow(clippy::too_many_arguments)]
async fn emit_window<A: Serialize>(
    ring: &Ring,
    shutdown: &ShutdownFlag,
    platform: Platform,
    kind: WindowKind,
    symbol: &str,
    window_size_ms: u32,
    window_end: i64,
    aggregate: &A,
    emitted: &mut u64,
) -> Result<(), WorkerError> {
    let key = WindowKey {
        window_end_ms: window_end.max(0) as u64,
        symbol: symbol.to_string(),
        kind,
        window_size_ms,
        platform,
    }
    .pack()?;

    let value = bincode::serde::encode_to_vec(aggregate, bincode::config::standard()).map_err(
        |e| WorkerError::Encode {
            message: e.to_string(),
        },
    )?;

    // The producer never drops a record: spin with a short sleep until the
    // consumer drains the ring or shutdown is requested.
    while !ring.write(&key, &value) {
        if shutdown.is_set() {
            warn!(symbol, window_end, "shutdown while ring full, window not emitted");
            return Ok(());
        }
        tokio::time::sleep(RING_FULL_BACKOFF).await;
    }

    *emitted += 1;
    if *emitted % EMIT_LOG_EVERY == 0 {
        debug!(emitted = *emitted, "windows emitted");
    }
    Ok(())
}
