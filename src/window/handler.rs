//! Per-window-size boundary state machines.
//!
//! A handler owns the aggregation state for one `(symbol, window size)`
//! pipeline, consumes raw events in id order and emits one finalized
//! aggregate per closed window. Trade and order-book handlers share the
//! boundary logic but differ too much internally to be one generic type, so
//! both implement the small [`WindowHandler`] capability the worker drives.

use super::book_acc::BookWindowAccumulator;
use super::trade_agg::TradeWindowAggregate;
use super::trade_buf::TradeWindowBuf;
use super::window_start;
use crate::book::BookManager;
use crate::events::{BookEvent, Trade};
use crate::keys::WindowKind;
use serde::Serialize;

/// One `(symbol, window size)` aggregation state machine.
pub trait WindowHandler {
    /// The raw event type this handler consumes.
    type Event;

    /// The finalized aggregate this handler emits.
    type Aggregate: Serialize;

    /// The window kind stamped into persistence keys for this handler.
    const KIND: WindowKind;

    /// Create a handler for one window size.
    fn new(window_size_ms: u32) -> Self;

    /// The window size this handler aggregates over.
    fn window_size_ms(&self) -> u32;

    /// Consume one event; returns a finalized window when a boundary is
    /// crossed. The emitted `i64` is the value packed into the key's
    /// `window_end_ms` field.
    fn handle(&mut self, event: &Self::Event) -> Option<(i64, Self::Aggregate)>;

    /// Emit the currently open window without disturbing the running state,
    /// used after backfill and on shutdown.
    fn flush(&self) -> Option<(i64, Self::Aggregate)>;
}

// ─── Trades ─────────────────────────────────────────────────────────────────

/// Trade window state machine with a current/next double buffer.
///
/// The double buffer absorbs the weakly-ordered tail of a window: trades for
/// window N+1 start arriving before window N has necessarily seen its last
/// trade, so N is only finalized once a trade lands beyond N+1.
#[derive(Debug)]
pub struct TradeHandler {
    window_size_ms: i64,
    current_start: Option<i64>,
    current: TradeWindowBuf,
    next_start: Option<i64>,
    next: TradeWindowBuf,
}

impl WindowHandler for TradeHandler {
    type Event = Trade;
    type Aggregate = TradeWindowAggregate;

    const KIND: WindowKind = WindowKind::Trade;

    fn new(window_size_ms: u32) -> Self {
        Self {
            window_size_ms: i64::from(window_size_ms),
            current_start: None,
            current: TradeWindowBuf::new(),
            next_start: None,
            next: TradeWindowBuf::new(),
        }
    }

    fn window_size_ms(&self) -> u32 {
        self.window_size_ms as u32
    }

    fn handle(&mut self, trade: &Trade) -> Option<(i64, TradeWindowAggregate)> {
        let ws = window_start(trade.time, self.window_size_ms);
        let price = trade.price_f64();
        let qty = trade.quantity_f64();

        match (self.current_start, self.next_start) {
            (None, _) => {
                self.current_start = Some(ws);
                self.current.push(trade.time, price, qty, trade.side, trade.order_type);
                None
            }
            (Some(current), _) if ws == current => {
                self.current.push(trade.time, price, qty, trade.side, trade.order_type);
                None
            }
            (Some(current), _) if ws < current => {
                // The stream is not rewindable within a handler.
                tracing::trace!(ws, current, "dropping past-window trade");
                None
            }
            (_, None) => {
                self.next_start = Some(ws);
                self.next.push(trade.time, price, qty, trade.side, trade.order_type);
                None
            }
            (_, Some(next)) if ws == next => {
                self.next.push(trade.time, price, qty, trade.side, trade.order_type);
                None
            }
            (Some(current), Some(next)) if ws > next => {
                let result = if self.current.is_empty() {
                    None
                } else {
                    Some((current, self.current.aggregate(current)))
                };

                // Rotate: next becomes current, the spent buffer is reused.
                self.current.clear();
                std::mem::swap(&mut self.current, &mut self.next);
                self.current_start = Some(next);
                self.next_start = Some(ws);
                self.next.push(trade.time, price, qty, trade.side, trade.order_type);

                result
            }
            // ws between current and next cannot happen: window starts are
            // multiples of the size, so ws > current implies ws >= next.
            _ => None,
        }
    }

    fn flush(&self) -> Option<(i64, TradeWindowAggregate)> {
        let start = self.current_start?;
        if self.current.is_empty() {
            return None;
        }
        Some((start, self.current.aggregate(start)))
    }
}

// ─── Order books ────────────────────────────────────────────────────────────

/// Order-book window state machine.
///
/// Owns the live [`BookManager`]; the accumulator samples it on every tick.
/// Window boundaries swap in a fresh accumulator while the book itself stays
/// warm for the next window. The event that delivers the first snapshot only
/// warms the book; window accounting starts with the event after it.
#[derive(Debug)]
pub struct BookHandler {
    window_size_ms: i64,
    win_start: Option<i64>,
    mgr: BookManager,
    acc: BookWindowAccumulator,
    prev_t: Option<i64>,
    prev_mid: Option<f64>,
    prev_spread: Option<f64>,
}

impl BookHandler {
    /// The live book this handler maintains.
    #[must_use]
    pub fn manager(&self) -> &BookManager {
        &self.mgr
    }
}

impl WindowHandler for BookHandler {
    type Event = BookEvent;
    type Aggregate = BookWindowAccumulator;

    const KIND: WindowKind = WindowKind::Order;

    fn new(window_size_ms: u32) -> Self {
        Self {
            window_size_ms: i64::from(window_size_ms),
            win_start: None,
            mgr: BookManager::new(),
            acc: BookWindowAccumulator::new(),
            prev_t: None,
            prev_mid: None,
            prev_spread: None,
        }
    }

    fn window_size_ms(&self) -> u32 {
        self.window_size_ms as u32
    }

    fn handle(&mut self, event: &BookEvent) -> Option<(i64, BookWindowAccumulator)> {
        let ws = window_start(event.time, self.window_size_ms);

        if let Some(start) = self.win_start
            && ws < start
        {
            tracing::trace!(ws, start, "dropping past-window book event");
            return None;
        }

        let warmed = self.mgr.has_snapshot();
        self.mgr.apply(event);
        if !warmed {
            // Either a pre-snapshot update (ignored by the manager) or the
            // first snapshot itself, which establishes the book state that
            // the *next* event's tick will sample.
            return None;
        }

        let mut result = None;
        match self.win_start {
            None => self.win_start = Some(ws),
            Some(start) if ws == start => {}
            Some(start) => {
                self.acc.close(&self.mgr, self.prev_mid, self.prev_spread);
                let closed = std::mem::take(&mut self.acc);
                result = Some((start + self.window_size_ms, closed));

                self.win_start = Some(ws);
                self.prev_t = None;
                self.prev_mid = None;
                self.prev_spread = None;
            }
        }

        let t_prev = self.prev_t.or(self.win_start).unwrap_or(event.time);
        let (mid, spread) = self.acc.update_tick(
            &self.mgr,
            t_prev,
            event.time,
            self.prev_mid,
            self.prev_spread,
            true,
        );
        self.prev_t = Some(event.time);
        self.prev_mid = mid;
        self.prev_spread = spread;

        result
    }

    fn flush(&self) -> Option<(i64, BookWindowAccumulator)> {
        let start = self.win_start?;
        let mut closed = self.acc.clone();
        closed.close(&self.mgr, self.prev_mid, self.prev_spread);
        Some((start + self.window_size_ms, closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BookEventKind, SIDE_BUY, SIDE_SELL};

    fn trade(time: i64, price: &str, qty: &str, side: u8) -> Trade {
        Trade {
            symbol: "btc_usdt".to_string(),
            price: price.to_string(),
            quantity: qty.to_string(),
            time,
            platform: "binance".to_string(),
            side,
            order_type: 0,
            misc: None,
            id: 0,
        }
    }

    fn book_event(
        kind: BookEventKind,
        time: i64,
        bids: &[(&str, &str)],
        asks: &[(&str, &str)],
    ) -> BookEvent {
        BookEvent {
            kind,
            symbol: "btc_usdt".to_string(),
            bids: bids
                .iter()
                .map(|(p, v)| (p.to_string(), v.to_string()))
                .collect(),
            asks: asks
                .iter()
                .map(|(p, v)| (p.to_string(), v.to_string()))
                .collect(),
            time,
            platform: "binance".to_string(),
            id: 0,
        }
    }

    // ─── Trade handler ──────────────────────────────────────────────────

    #[test]
    fn test_trade_seed_scenario() {
        let mut handler = TradeHandler::new(1000);
        assert!(handler.handle(&trade(500, "10", "1", SIDE_BUY)).is_none());
        assert!(handler.handle(&trade(700, "11", "2", SIDE_SELL)).is_none());
        assert!(handler.handle(&trade(1200, "12", "3", SIDE_BUY)).is_none());

        let flushed = handler.flush();
        assert!(flushed.is_some());
        let (start, agg) = flushed.unwrap_or_else(|| panic!("flush"));
        assert_eq!(start, 0);
        assert_eq!(agg.trade_count, 2);
        assert_eq!(agg.sum_vol, 3.0);
        assert_eq!(agg.sum_pv, 32.0);
        assert_eq!(agg.buy_vol, 1.0);
        assert_eq!(agg.sell_vol, 2.0);
        assert_eq!(agg.open, 10.0);
        assert_eq!(agg.high, 11.0);
        assert_eq!(agg.low, 10.0);
        assert_eq!(agg.close, 11.0);
        assert_eq!(agg.first_ts, 500);
        assert_eq!(agg.last_ts, 700);
        assert_eq!(agg.sum_dt, 200);
        assert_eq!(agg.max_gap_ms, 200);
    }

    #[test]
    fn test_trade_rotation_emits_closed_window() {
        let mut handler = TradeHandler::new(1000);
        assert!(handler.handle(&trade(100, "10", "1", SIDE_BUY)).is_none());
        assert!(handler.handle(&trade(1100, "11", "1", SIDE_BUY)).is_none());
        // Crossing past the buffered next window flushes the current one.
        let emitted = handler.handle(&trade(2100, "12", "1", SIDE_BUY));
        assert!(emitted.is_some());
        let (start, agg) = emitted.unwrap_or_else(|| panic!("emit"));
        assert_eq!(start, 0);
        assert_eq!(agg.trade_count, 1);
        assert_eq!(agg.close, 10.0);

        // The next rotation emits window 1000.
        let emitted = handler.handle(&trade(3100, "13", "1", SIDE_BUY));
        assert!(emitted.is_some());
        let (start, agg) = emitted.unwrap_or_else(|| panic!("emit"));
        assert_eq!(start, 1000);
        assert_eq!(agg.close, 11.0);
    }

    #[test]
    fn test_trade_emissions_strictly_monotone() {
        let mut handler = TradeHandler::new(1000);
        let mut emitted = Vec::new();
        let times = [100, 500, 1200, 2400, 2500, 4100, 7800, 9000];
        for (i, t) in times.iter().enumerate() {
            if let Some((start, _)) = handler.handle(&trade(*t, "10", "1", (i % 2) as u8)) {
                emitted.push(start);
            }
        }
        for pair in emitted.windows(2) {
            assert!(pair[0] < pair[1], "emissions must be strictly monotone");
        }
    }

    #[test]
    fn test_trade_every_trade_counted_once() {
        let mut handler = TradeHandler::new(1000);
        let times = [100, 500, 900, 1200, 1800, 2400, 3100, 5000, 6100];
        let mut counted = 0u64;
        for t in times {
            if let Some((_, agg)) = handler.handle(&trade(t, "10", "1", SIDE_BUY)) {
                counted += agg.trade_count;
            }
        }
        if let Some((_, agg)) = handler.flush() {
            counted += agg.trade_count;
        }
        // The final trade still sits in the un-emitted next buffer.
        assert_eq!(counted, times.len() as u64 - 1);
    }

    #[test]
    fn test_trade_past_window_dropped() {
        let mut handler = TradeHandler::new(1000);
        assert!(handler.handle(&trade(1500, "10", "1", SIDE_BUY)).is_none());
        assert!(handler.handle(&trade(200, "99", "9", SIDE_BUY)).is_none());
        let (start, agg) = handler.flush().unwrap_or_else(|| panic!("flush"));
        assert_eq!(start, 1000);
        assert_eq!(agg.trade_count, 1);
        assert_eq!(agg.close, 10.0);
    }

    #[test]
    fn test_trade_flush_empty_handler() {
        let handler = TradeHandler::new(1000);
        assert!(handler.flush().is_none());
    }

    // ─── Book handler ───────────────────────────────────────────────────

    #[test]
    fn test_book_seed_scenario() {
        let mut handler = BookHandler::new(1000);
        let bids = [("100", "1")];
        let asks = [("101", "1")];

        // The first snapshot warms the book without opening a window.
        assert!(
            handler
                .handle(&book_event(BookEventKind::Snapshot, 0, &bids, &asks))
                .is_none()
        );
        assert!(
            handler
                .handle(&book_event(BookEventKind::Update, 400, &bids, &asks))
                .is_none()
        );

        let emitted = handler.handle(&book_event(BookEventKind::Update, 1000, &bids, &asks));
        assert!(emitted.is_some());
        let (end, acc) = emitted.unwrap_or_else(|| panic!("emit"));
        assert_eq!(end, 1000);
        assert_eq!(acc.sw, 400.0);
        assert_eq!(acc.close_mid, Some(100.5));
        assert_eq!(acc.close_spread, Some(1.0));
        assert_eq!(acc.close_best_imb, 0.0);
    }

    #[test]
    fn test_book_weight_sums_to_tick_gaps() {
        let mut handler = BookHandler::new(10_000);
        let bids = [("100", "1")];
        let asks = [("101", "1")];
        handler.handle(&book_event(BookEventKind::Snapshot, 0, &bids, &asks));
        for t in [100, 400, 400, 2500] {
            handler.handle(&book_event(BookEventKind::Update, t, &bids, &asks));
        }
        // Gaps: 100 (from window start), 300, 0 -> 1, 2100.
        assert_eq!(handler.acc.sw, 100.0 + 300.0 + 1.0 + 2100.0);
    }

    #[test]
    fn test_book_update_before_snapshot_dropped() {
        let mut handler = BookHandler::new(1000);
        assert!(
            handler
                .handle(&book_event(BookEventKind::Update, 100, &[("1", "1")], &[]))
                .is_none()
        );
        assert_eq!(handler.win_start, None);
        assert_eq!(handler.acc.n_updates, 0);
    }

    #[test]
    fn test_book_out_of_order_event_dropped() {
        let mut handler = BookHandler::new(1000);
        let bids = [("100", "1")];
        let asks = [("101", "1")];
        handler.handle(&book_event(BookEventKind::Snapshot, 1100, &bids, &asks));
        handler.handle(&book_event(BookEventKind::Update, 1200, &bids, &asks));
        let before = handler.acc.n_updates;
        assert!(
            handler
                .handle(&book_event(BookEventKind::Update, 100, &bids, &asks))
                .is_none()
        );
        assert_eq!(handler.acc.n_updates, before);
    }

    #[test]
    fn test_book_next_window_starts_warm() {
        let mut handler = BookHandler::new(1000);
        let bids = [("100", "1")];
        let asks = [("101", "1")];
        handler.handle(&book_event(BookEventKind::Snapshot, 0, &bids, &asks));
        handler.handle(&book_event(BookEventKind::Update, 400, &bids, &asks));
        let emitted = handler.handle(&book_event(BookEventKind::Update, 1500, &bids, &asks));
        assert!(emitted.is_some());

        // The boundary event itself ticked into the new window off a warm
        // book, weighted from the new window's start.
        assert_eq!(handler.win_start, Some(1000));
        assert_eq!(handler.acc.n_updates, 1);
        assert_eq!(handler.acc.sw, 500.0);
        assert_eq!(handler.manager().bids().best(), Some(100.0));
    }

    #[test]
    fn test_book_flush_keeps_running_state() {
        let mut handler = BookHandler::new(1000);
        let bids = [("100", "1")];
        let asks = [("101", "1")];
        handler.handle(&book_event(BookEventKind::Snapshot, 0, &bids, &asks));
        handler.handle(&book_event(BookEventKind::Update, 400, &bids, &asks));

        let flushed = handler.flush();
        assert!(flushed.is_some());
        let (end, acc) = flushed.unwrap_or_else(|| panic!("flush"));
        assert_eq!(end, 1000);
        assert_eq!(acc.close_mid, Some(100.5));

        // Flushing is a snapshot, not a rotation: the live window goes on.
        assert_eq!(handler.acc.n_updates, 1);
        assert_eq!(handler.win_start, Some(0));
    }

    #[test]
    fn test_book_flush_without_window() {
        let handler = BookHandler::new(1000);
        assert!(handler.flush().is_none());
    }
}
