//! Live event feed: transport abstraction and the gap-filling subscriber.
//!
//! The live socket publishes one JSON event per message with a monotone id
//! per `(platform, symbol)` stream. The transport itself (ZeroMQ pub/sub
//! over ipc endpoints in production) is a collaborator behind the
//! [`LiveFeed`] trait; this module only fixes the endpoint naming scheme
//! and the consistency layer: [`GapFillSubscriber`] drops duplicates,
//! forwards in-order events, and recovers gaps from the durable event log
//! so downstream handlers always see each id at most once, ascending.

use crate::events::{EventError, StreamEvent};
use crate::store::{EventLog, StoreError};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff after a transient transport failure.
const TRANSPORT_BACKOFF: Duration = Duration::from_millis(100);

/// Endpoint of the unified trade pub/sub socket for one stream.
#[must_use]
pub fn trade_endpoint(platform: &str, symbol: &str) -> String {
    format!("ipc:///tmp/zmq-pubsub-unified-trade-{platform}-{symbol}.sock")
}

/// Endpoint of the unified order-book pub/sub socket for one stream.
#[must_use]
pub fn order_book_endpoint(platform: &str, symbol: &str) -> String {
    format!("ipc:///tmp/zmq-pubsub-unified-order-book-{platform}-{symbol}.sock")
}

/// Errors surfaced by live feeds and the gap-filling subscriber.
#[derive(Debug)]
#[non_exhaustive]
pub enum FeedError {
    /// The feed has ended and will deliver no further messages.
    Closed,

    /// A transient transport failure; safe to retry after a backoff.
    Transport {
        /// The underlying transport error message.
        message: String,
    },

    /// A live or recovered payload failed to decode.
    Decode {
        /// The underlying decode error message.
        message: String,
    },

    /// The durable log failed during gap recovery.
    Store(StoreError),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Closed => write!(f, "live feed closed"),
            FeedError::Transport { message } => write!(f, "live feed transport error: {message}"),
            FeedError::Decode { message } => write!(f, "live feed decode error: {message}"),
            FeedError::Store(err) => write!(f, "gap recovery store error: {err}"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<StoreError> for FeedError {
    fn from(err: StoreError) -> Self {
        FeedError::Store(err)
    }
}

impl From<EventError> for FeedError {
    fn from(err: EventError) -> Self {
        FeedError::Decode {
            message: err.to_string(),
        }
    }
}

/// One subscribed pub/sub socket delivering raw event payloads.
pub trait LiveFeed {
    /// Receive the next message, blocking until one arrives.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] when the feed has ended, or
    /// [`FeedError::Transport`] on a transient failure (the caller backs
    /// off and retries without advancing any cursor).
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, FeedError>> + Send;
}

/// An in-process [`LiveFeed`] over a tokio channel.
///
/// Used by tests and embedded pipelines; production deployments bind a
/// real pub/sub transport to the same trait.
#[derive(Debug)]
pub struct ChannelFeed {
    rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelFeed {
    /// Create a feed and the sender side that publishes into it.
    #[must_use]
    pub fn new() -> (tokio::sync::mpsc::UnboundedSender<Vec<u8>>, Self) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl LiveFeed for ChannelFeed {
    async fn recv(&mut self) -> Result<Vec<u8>, FeedError> {
        self.rx.recv().await.ok_or(FeedError::Closed)
    }
}

/// Reorders and recovers the live stream against the durable event log.
///
/// For each incoming event with id `j`:
///
/// - `j <= last_processed` — duplicate, dropped;
/// - `j == last_processed + 1` — forwarded;
/// - `j > last_processed + 1` — the missing interval
///   `[last_processed + 1, j)` is read from the event log and forwarded as
///   a prefix, then the live event follows.
///
/// Transport errors back off ~100 ms and retry without advancing the
/// cursor, so no id is ever skipped by a flaky socket.
pub struct GapFillSubscriber<F, L> {
    feed: F,
    log: L,
    last_processed: i64,
}

impl<F, L> GapFillSubscriber<F, L>
where
    F: LiveFeed,
    L: EventLog,
{
    /// Create a subscriber resuming after `start_id`.
    ///
    /// When `start_id` is `None` the cursor is seeded from the newest id
    /// already in the log (0 when the log is empty), so a fresh subscriber
    /// continues exactly where the recorded stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be read for seeding.
    pub fn new(feed: F, log: L, start_id: Option<i64>) -> Result<Self, StoreError> {
        let last_processed = match start_id {
            Some(id) => id,
            None => log.last_id()?.unwrap_or(0),
        };
        Ok(Self {
            feed,
            log,
            last_processed,
        })
    }

    /// The id of the newest event forwarded so far.
    #[must_use]
    pub fn last_processed(&self) -> i64 {
        self.last_processed
    }

    /// Await the next in-order batch: zero or more gap-recovered events
    /// followed by one live event, all with ascending ids.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] when the feed ends,
    /// [`FeedError::Decode`] on a malformed payload, or
    /// [`FeedError::Store`] when gap recovery fails.
    pub async fn next_batch<E: StreamEvent>(&mut self) -> Result<Vec<E>, FeedError> {
        loop {
            let message = match self.feed.recv().await {
                Ok(message) => message,
                Err(FeedError::Transport { message }) => {
                    warn!(error = message, "live feed transport error, backing off");
                    tokio::time::sleep(TRANSPORT_BACKOFF).await;
                    continue;
                }
                Err(other) => return Err(other),
            };

            let event = E::decode(&message)?;
            if event.id() <= self.last_processed {
                continue; // Already seen.
            }

            let mut batch = Vec::new();
            let expected = self.last_processed + 1;
            if event.id() > expected {
                debug!(
                    expected,
                    got = event.id(),
                    gap = event.id() - expected,
                    "gap detected, recovering from event log"
                );
                for record in self.log.iter_from(Some(expected))? {
                    let record = record?;
                    if record.id >= event.id() {
                        break;
                    }
                    let mut recovered = E::decode(&record.value)?;
                    recovered.set_id(record.id);
                    batch.push(recovered);
                }
            }

            batch.push(event);
            if let Some(last) = batch.last() {
                self.last_processed = last.id();
            }
            return Ok(batch);
        }
    }
}

impl<F, L> fmt::Debug for GapFillSubscriber<F, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GapFillSubscriber")
            .field("last_processed", &self.last_processed)
            .finish()
    }
}
