//! # Real-Time Market-Data Windowing Pipeline
//!
//! `tickwindow-rs` ingests unbounded streams of raw market events —
//! individual trades and order-book deltas — from multiple upstream
//! platforms and symbols, aggregates them into fixed-size time windows,
//! and persists the finalized aggregates into an ordered key-value log for
//! downstream consumption.
//!
//! ## Architecture
//!
//! Parallelism comes from OS processes, not threads. The orchestrator
//! process distributes `(platform, symbol, kind, window-size)` pipelines
//! across a fleet of worker processes, one ring buffer per worker:
//!
//! ```text
//!  event log ─┐                                    ┌────────────────┐
//!             ├─► worker (backfill → live) ─► ring │  orchestrator  │
//!  live feed ─┘        aggregators          buffer │   drain loop   ├─► windows log
//!                                                  └────────────────┘
//! ```
//!
//! - [`ring`] — a lock-free SPSC byte queue in shared memory with a
//!   duplicated, torn-read-safe index. Microsecond-scale handoff between
//!   worker and orchestrator with no locks and no atomic RMWs.
//! - [`keys`] — fixed-width big-endian persistence keys whose byte order
//!   equals the natural tuple order, so the store clusters windows by
//!   time, symbol and kind.
//! - [`book`] — a sorted side book with O(1) best/totals and the manager
//!   that applies snapshots and depth-capped updates.
//! - [`window`] — the aggregation state machines: OHLCV + log-return
//!   moments for trades, time-weighted book statistics for order books,
//!   and the per-size boundary handlers that drive them.
//! - [`store`] — the durable-log contracts plus a memory-mapped segmented
//!   implementation with CRC32-checked entries, and the binary-search
//!   checkpoint recovery that lets workers resume exactly where the
//!   persisted log left off.
//! - [`feed`] — the live pub/sub abstraction and the gap-filling
//!   subscriber that reconciles the live stream against the event log.
//! - [`worker`] / [`orchestrator`] — the two process bodies.
//!
//! ## Concurrency model
//!
//! Inside each process execution is single-threaded cooperative. All
//! cross-process coordination happens through exactly two shared-memory
//! constructs: the SPSC ring buffers (one writer process, one reader
//! process each) and a one-byte shutdown flag. Backpressure is bounded
//! everywhere: a full ring makes the producer back off and retry, an
//! empty ring makes the consumer yield; no record is ever dropped between
//! a worker and the windows log.
//!
//! ## Crash recovery
//!
//! Window keys lead with `window_end_ms`, so a single reverse scan of the
//! windows log recovers the newest persisted window per pipeline. Workers
//! then binary-search the event log for the first event past that
//! checkpoint and replay forward, which makes restarts idempotent: a
//! window is never re-emitted below the persisted watermark for its
//! pipeline.

pub mod book;
pub mod events;
pub mod feed;
pub mod keys;
pub mod orchestrator;
pub mod prelude;
pub mod ring;
pub mod store;
pub mod window;
pub mod worker;

pub use book::{BookManager, BookSide, SideBook};
pub use events::{BookEvent, BookEventKind, EventError, StreamEvent, Trade};
pub use feed::{ChannelFeed, FeedError, GapFillSubscriber, LiveFeed};
pub use keys::{KeyError, Platform, WindowKey, WindowKind};
pub use orchestrator::{PipelineConfig, PipelineError, WorkerConfig, run_pipeline};
pub use ring::{Ring, RingAddr, RingError, ShutdownFlag};
pub use store::{EventLog, LogRecord, SegmentLog, StoreError, WindowStore, find_first_after};
pub use window::{
    BookHandler, BookWindowAccumulator, TradeHandler, TradeWindowAggregate, TradeWindowBuf,
    WindowHandler,
};
pub use worker::{WorkerError, WorkerOptions, run_worker};
