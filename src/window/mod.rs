//! Window aggregation: per-window summary statistics for trades and order
//! books, plus the boundary state machines that drive them.

mod book_acc;
mod handler;
mod trade_agg;
mod trade_buf;

pub use book_acc::BookWindowAccumulator;
pub use handler::{BookHandler, TradeHandler, WindowHandler};
pub use trade_agg::TradeWindowAggregate;
pub use trade_buf::TradeWindowBuf;

/// Start of the window containing `time_ms` for the given window size.
#[must_use]
#[inline]
pub(crate) fn window_start(time_ms: i64, window_size_ms: i64) -> i64 {
    time_ms.div_euclid(window_size_ms) * window_size_ms
}
