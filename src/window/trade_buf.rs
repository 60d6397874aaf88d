//! Struct-of-arrays buffer for the trades of one open window.

use super::trade_agg::TradeWindowAggregate;

/// Initial per-column capacity; grows by doubling when exceeded.
const INITIAL_CAPACITY: usize = 2048;

/// Dense parallel columns holding every trade of the currently open window.
///
/// The buffer fills while a window is open, produces an immutable
/// [`TradeWindowAggregate`] at flush, then is cleared and reused so no
/// per-trade allocation happens in steady state.
#[derive(Debug)]
pub struct TradeWindowBuf {
    ts: Vec<i64>,
    price: Vec<f64>,
    qty: Vec<f64>,
    side: Vec<u8>,
    order_type: Vec<u8>,
}

impl TradeWindowBuf {
    /// Create a buffer with the default pre-allocated capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create a buffer with a specific pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ts: Vec::with_capacity(capacity),
            price: Vec::with_capacity(capacity),
            qty: Vec::with_capacity(capacity),
            side: Vec::with_capacity(capacity),
            order_type: Vec::with_capacity(capacity),
        }
    }

    /// Append one trade's columns.
    pub fn push(&mut self, time_ms: i64, price: f64, qty: f64, side: u8, order_type: u8) {
        self.ts.push(time_ms);
        self.price.push(price);
        self.qty.push(qty);
        self.side.push(side);
        self.order_type.push(order_type);
    }

    /// Number of trades currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ts.len()
    }

    /// True when no trades are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    /// Reset the logical length, keeping the allocations for reuse.
    pub fn clear(&mut self) {
        self.ts.clear();
        self.price.clear();
        self.qty.clear();
        self.side.clear();
        self.order_type.clear();
    }

    /// Summarize the buffered trades into one aggregate.
    ///
    /// `window_start` seeds `first_ts`/`last_ts` when the window is empty.
    #[must_use]
    pub fn aggregate(&self, window_start: i64) -> TradeWindowAggregate {
        TradeWindowAggregate::from_columns(
            window_start,
            &self.ts,
            &self.price,
            &self.qty,
            &self.side,
        )
    }
}

impl Default for TradeWindowBuf {
    fn default() -> Self {
        Self::new()
    }
}
