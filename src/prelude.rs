//! Prelude module that re-exports the commonly used types and traits.
//!
//! Instead of importing each type individually, you can use:
//!
//! ```rust
//! use tickwindow_rs::prelude::*;
//! ```

// Keys and identity
pub use crate::keys::{Platform, WindowKey, WindowKind};

// Wire events
pub use crate::events::{BookEvent, BookEventKind, StreamEvent, Trade};

// Book state
pub use crate::book::{BookManager, BookSide, SideBook};

// Window aggregation
pub use crate::window::{
    BookHandler, BookWindowAccumulator, TradeHandler, TradeWindowAggregate, WindowHandler,
};

// Ring buffer and shared memory
pub use crate::ring::{Ring, RingAddr, ShutdownFlag};

// Durable logs
pub use crate::store::{EventLog, SegmentLog, WindowStore, find_first_after};

// Live feed
pub use crate::feed::{ChannelFeed, GapFillSubscriber, LiveFeed};

// Process bodies
pub use crate::orchestrator::{PipelineConfig, run_pipeline};
pub use crate::worker::{WorkerOptions, run_worker};

// Errors
pub use crate::events::EventError;
pub use crate::feed::FeedError;
pub use crate::keys::KeyError;
pub use crate::orchestrator::PipelineError;
pub use crate::ring::RingError;
pub use crate::store::StoreError;
pub use crate::worker::WorkerError;
