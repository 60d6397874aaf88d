//! Immutable summary of all trades in one window.

use crate::events::SIDE_BUY;
use serde::{Deserialize, Serialize};

/// OHLCV, flow and log-return moments for one trade window.
///
/// All sum fields are additive across contiguous windows, so downstream
/// consumers can merge aggregates without revisiting raw trades (the
/// log-return sums are within-window only; merging them does not synthesize
/// the cross-boundary return).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeWindowAggregate {
    /// Total number of trades in the window.
    pub trade_count: u64,
    /// Sum of traded volumes.
    pub sum_vol: f64,
    /// Sum of price x volume, the VWAP numerator.
    pub sum_pv: f64,
    /// Total volume of buy-side trades.
    pub buy_vol: f64,
    /// Total volume of sell-side trades.
    pub sell_vol: f64,
    /// Sum of trade prices.
    pub sum_price: f64,
    /// Sum of squared prices, enables price variance.
    pub sum_price2: f64,
    /// Sum of log returns between consecutive trades.
    pub sum_logret: f64,
    /// Sum of squared log returns, the realized variance numerator.
    pub sum_logret2: f64,
    /// Sum of cubed log returns, the skewness component.
    pub sum_logret3: f64,
    /// Price of the first trade in the window.
    pub open: f64,
    /// Highest trade price in the window.
    pub high: f64,
    /// Lowest trade price in the window.
    pub low: f64,
    /// Price of the last trade in the window.
    pub close: f64,
    /// Smallest single trade size.
    pub min_size: f64,
    /// Largest single trade size.
    pub max_size: f64,
    /// Timestamp of the first trade (window start when empty).
    pub first_ts: i64,
    /// Timestamp of the last trade (window start when empty).
    pub last_ts: i64,
    /// Sum of inter-trade time gaps in milliseconds.
    pub sum_dt: i64,
    /// Largest gap between consecutive trades, an inactivity indicator.
    pub max_gap_ms: i64,
}

impl TradeWindowAggregate {
    /// The zero aggregate for an empty window.
    #[must_use]
    pub fn empty(window_start: i64) -> Self {
        Self {
            trade_count: 0,
            sum_vol: 0.0,
            sum_pv: 0.0,
            buy_vol: 0.0,
            sell_vol: 0.0,
            sum_price: 0.0,
            sum_price2: 0.0,
            sum_logret: 0.0,
            sum_logret2: 0.0,
            sum_logret3: 0.0,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            min_size: 0.0,
            max_size: 0.0,
            first_ts: window_start,
            last_ts: window_start,
            sum_dt: 0,
            max_gap_ms: 0,
        }
    }

    /// Compute the aggregate from the window's dense columns in one pass.
    ///
    /// Log returns skip any pair where either price is non-positive, so a
    /// stray zero price degrades a single return instead of poisoning the
    /// moment sums.
    #[must_use]
    pub(crate) fn from_columns(
        window_start: i64,
        ts: &[i64],
        price: &[f64],
        qty: &[f64],
        side: &[u8],
    ) -> Self {
        let n = price.len();
        if n == 0 {
            return Self::empty(window_start);
        }

        let mut agg = Self::empty(window_start);
        agg.trade_count = n as u64;
        agg.open = price[0];
        agg.close = price[n - 1];
        agg.high = f64::NEG_INFINITY;
        agg.low = f64::INFINITY;
        agg.min_size = f64::INFINITY;
        agg.max_size = f64::NEG_INFINITY;
        agg.first_ts = ts[0];
        agg.last_ts = ts[n - 1];

        for i in 0..n {
            let p = price[i];
            let q = qty[i];
            agg.sum_vol += q;
            agg.sum_pv += p * q;
            agg.sum_price += p;
            agg.sum_price2 += p * p;
            if side[i] == SIDE_BUY {
                agg.buy_vol += q;
            }
            agg.high = agg.high.max(p);
            agg.low = agg.low.min(p);
            agg.min_size = agg.min_size.min(q);
            agg.max_size = agg.max_size.max(q);
        }
        agg.sell_vol = agg.sum_vol - agg.buy_vol;

        if n > 1 {
            for i in 1..n {
                let dt = ts[i] - ts[i - 1];
                agg.sum_dt += dt;
                agg.max_gap_ms = agg.max_gap_ms.max(dt);

                if price[i] > 0.0 && price[i - 1] > 0.0 {
                    let lr = price[i].ln() - price[i - 1].ln();
                    agg.sum_logret += lr;
                    agg.sum_logret2 += lr * lr;
                    agg.sum_logret3 += lr * lr * lr;
                }
            }
        }

        agg
    }
}
