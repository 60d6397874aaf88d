//! Order-book state driven by snapshots and incremental updates.

use super::side::{BookSide, SideBook};
use crate::events::{BookEvent, BookEventKind, parse_decimal};

/// Maintains the live order book for one symbol.
///
/// A snapshot replaces the whole book and establishes the per-side depth
/// cap; updates mutate individual levels and are ignored until the first
/// snapshot arrives. After every update each side is trimmed back to its
/// snapshot depth by dropping the worst-priced levels, which keeps an
/// update-only stream from growing the book without bound.
#[derive(Debug, Clone)]
pub struct BookManager {
    bids: SideBook,
    asks: SideBook,
    has_snapshot: bool,
    bid_depth: usize,
    ask_depth: usize,
    last_time: Option<i64>,
}

impl BookManager {
    /// Create an empty manager awaiting its first snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bids: SideBook::new(BookSide::Bid),
            asks: SideBook::new(BookSide::Ask),
            has_snapshot: false,
            bid_depth: 0,
            ask_depth: 0,
            last_time: None,
        }
    }

    /// Clear all state, returning to the awaiting-snapshot condition.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.has_snapshot = false;
        self.bid_depth = 0;
        self.ask_depth = 0;
        self.last_time = None;
    }

    /// Apply a single snapshot or update event.
    pub fn apply(&mut self, event: &BookEvent) {
        match event.kind {
            BookEventKind::Snapshot => self.apply_snapshot(event),
            BookEventKind::Update => self.apply_update(event),
        }
    }

    /// Apply a batch of events, optionally sorting them by event time first.
    ///
    /// Sorting costs O(n log n); pass `assume_sorted = true` when the input
    /// is already in time order (the durable log always is).
    pub fn apply_batch(&mut self, events: &mut [BookEvent], assume_sorted: bool) {
        if !assume_sorted {
            events.sort_by_key(|e| e.time);
        }
        for event in events.iter() {
            self.apply(event);
        }
    }

    fn apply_snapshot(&mut self, event: &BookEvent) {
        self.bids.set_snapshot(parsed_levels(&event.bids));
        self.asks.set_snapshot(parsed_levels(&event.asks));
        self.has_snapshot = true;
        self.last_time = Some(event.time);
        self.bid_depth = self.bids.len();
        self.ask_depth = self.asks.len();
    }

    fn apply_update(&mut self, event: &BookEvent) {
        // Updates before the first snapshot are meaningless deltas.
        if !self.has_snapshot {
            return;
        }

        self.last_time = Some(event.time);

        for (price, vol) in parsed_levels(&event.bids) {
            self.bids.apply_level(price, vol);
        }
        for (price, vol) in parsed_levels(&event.asks) {
            self.asks.apply_level(price, vol);
        }

        if self.bid_depth > 0 {
            self.bids.enforce_depth(self.bid_depth);
        }
        if self.ask_depth > 0 {
            self.asks.enforce_depth(self.ask_depth);
        }
    }

    /// True once a snapshot has been applied.
    #[must_use]
    #[inline]
    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    /// The bid side.
    #[must_use]
    #[inline]
    pub fn bids(&self) -> &SideBook {
        &self.bids
    }

    /// The ask side.
    #[must_use]
    #[inline]
    pub fn asks(&self) -> &SideBook {
        &self.asks
    }

    /// Event time of the most recently applied event.
    #[must_use]
    #[inline]
    pub fn last_time(&self) -> Option<i64> {
        self.last_time
    }
}

impl Default for BookManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `(price, quantity)` decimal-string pairs into `f64` levels.
fn parsed_levels(levels: &[(String, String)]) -> impl Iterator<Item = (f64, f64)> + '_ {
    levels
        .iter()
        .map(|(p, v)| (parse_decimal(p), parse_decimal(v)))
}
