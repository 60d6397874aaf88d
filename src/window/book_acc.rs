//! Time-weighted accumulator for one order-book window.

use crate::book::BookManager;
use serde::{Deserialize, Serialize};

/// Time-weighted statistics of the order book over one window.
///
/// Every field prefixed `sw_` is a `Σ w·x` term where `w` is the time since
/// the previous tick in milliseconds (with zero gaps substituted by 1 so
/// that bursts of same-millisecond events still register). The weighted
/// variance of the mid price is maintained with the weighted Welford
/// recurrence, which keeps the accumulator mergeable and numerically stable.
///
/// `close_*` fields are populated by [`close`](BookWindowAccumulator::close)
/// from the book state at flush time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookWindowAccumulator {
    /// Σ w — total tick weight of the window.
    pub sw: f64,
    /// Σ w·mid.
    pub sw_mid: f64,
    /// Σ w·microprice.
    pub sw_micro: f64,
    /// Smallest spread observed.
    pub spread_min: f64,
    /// Largest spread observed.
    pub spread_max: f64,
    /// Σ w·spread. Not surfaced by any `close_*` field but carried as part
    /// of the window invariant.
    pub sw_spread: f64,
    /// Welford: accumulated weight for the mid-price variance.
    pub n_w: f64,
    /// Welford: running weighted mean of the mid price.
    pub mean_mid: f64,
    /// Welford: Σ w·(mid − mean)², the variance numerator.
    pub m2_mid: f64,
    /// Σ w·total bid quantity.
    pub sw_bid: f64,
    /// Σ w·total ask quantity.
    pub sw_ask: f64,
    /// Σ w·imbalance, where imbalance = (bid − ask) / (bid + ask).
    pub sw_imb: f64,
    /// Σ w·best-bid size.
    pub sw_bid_best_sz: f64,
    /// Σ w·best-ask size.
    pub sw_ask_best_sz: f64,
    /// Number of ticks accumulated.
    pub n_updates: u64,
    /// Ticks where the mid moved up versus the previous tick.
    pub n_mid_up: u64,
    /// Ticks where the mid moved down.
    pub n_mid_down: u64,
    /// Ticks where the spread widened.
    pub n_spread_widen: u64,
    /// Ticks where the spread tightened.
    pub n_spread_tighten: u64,
    /// Time of the first tick's interval start.
    pub t_first: Option<i64>,
    /// Time of the last tick.
    pub t_last: Option<i64>,
    /// Mid price at window close, if the book was sane.
    pub close_mid: Option<f64>,
    /// Spread at window close.
    pub close_spread: Option<f64>,
    /// Best bid at window close.
    pub close_bb: Option<f64>,
    /// Best ask at window close.
    pub close_ba: Option<f64>,
    /// Best-bid size at window close (0 when the side is empty).
    pub close_bq0: f64,
    /// Best-ask size at window close (0 when the side is empty).
    pub close_aq0: f64,
    /// Best-level imbalance at window close.
    pub close_best_imb: f64,
}

impl Default for BookWindowAccumulator {
    fn default() -> Self {
        Self {
            sw: 0.0,
            sw_mid: 0.0,
            sw_micro: 0.0,
            spread_min: f64::INFINITY,
            spread_max: f64::NEG_INFINITY,
            sw_spread: 0.0,
            n_w: 0.0,
            mean_mid: 0.0,
            m2_mid: 0.0,
            sw_bid: 0.0,
            sw_ask: 0.0,
            sw_imb: 0.0,
            sw_bid_best_sz: 0.0,
            sw_ask_best_sz: 0.0,
            n_updates: 0,
            n_mid_up: 0,
            n_mid_down: 0,
            n_spread_widen: 0,
            n_spread_tighten: 0,
            t_first: None,
            t_last: None,
            close_mid: None,
            close_spread: None,
            close_bb: None,
            close_ba: None,
            close_bq0: 0.0,
            close_aq0: 0.0,
            close_best_imb: 0.0,
        }
    }
}

impl BookWindowAccumulator {
    /// A fresh, empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tick of the live book into the accumulator.
    ///
    /// `w = max(0, t_curr − t_prev)` weights the sample; a zero interval is
    /// substituted by 1 when `time_weighted` (and always when it is off).
    /// Returns the `(mid, spread)` of this tick for the caller to chain into
    /// the next one.
    pub fn update_tick(
        &mut self,
        mgr: &BookManager,
        t_prev_ms: i64,
        t_curr_ms: i64,
        prev_mid: Option<f64>,
        prev_spread: Option<f64>,
        time_weighted: bool,
    ) -> (Option<f64>, Option<f64>) {
        let gap = (t_curr_ms - t_prev_ms).max(0);
        let w = if !time_weighted || gap == 0 {
            1.0
        } else {
            gap as f64
        };

        let bb = mgr.bids().best();
        let ba = mgr.asks().best();

        // Best-level sizes, 0 when the side is empty.
        let bq0 = bb.and_then(|p| mgr.bids().level_qty(p)).unwrap_or(0.0);
        let aq0 = ba.and_then(|p| mgr.asks().level_qty(p)).unwrap_or(0.0);

        // Mid and spread are only meaningful when the inside market is sane.
        let (mid, spread) = match (bb, ba) {
            (Some(bb), Some(ba)) if ba >= bb => (Some(0.5 * (ba + bb)), Some(ba - bb)),
            _ => (None, None),
        };

        // Microprice: each side's price weighted by the opposite side's
        // best size.
        let micro = match (bb, ba, mid) {
            (Some(bb), Some(ba), Some(_)) if bq0 + aq0 > 0.0 => {
                Some((ba * bq0 + bb * aq0) / (bq0 + aq0))
            }
            _ => None,
        };

        self.sw += w;
        if let Some(mid) = mid {
            self.sw_mid += w * mid;
        }
        if let Some(micro) = micro {
            self.sw_micro += w * micro;
        }
        if let Some(spread) = spread {
            self.sw_spread += w * spread;
            if spread < self.spread_min {
                self.spread_min = spread;
            }
            if spread > self.spread_max {
                self.spread_max = spread;
            }
        }

        // Totals and imbalance, sampled only while both sides have depth.
        let tot_b = mgr.bids().total_qty();
        let tot_a = mgr.asks().total_qty();
        if tot_b > 0.0 && tot_a > 0.0 {
            self.sw_bid += w * tot_b;
            self.sw_ask += w * tot_a;
            self.sw_imb += w * (tot_b - tot_a) / (tot_b + tot_a);
        }

        self.sw_bid_best_sz += w * bq0;
        self.sw_ask_best_sz += w * aq0;

        // Weighted Welford update for the mid-price variance.
        if let Some(mid) = mid {
            let w_new = self.n_w + w;
            let delta = mid - self.mean_mid;
            let mean_new = self.mean_mid + (w * delta) / w_new;
            self.m2_mid += w * (mid - mean_new) * (mid - self.mean_mid);
            self.n_w = w_new;
            self.mean_mid = mean_new;
        }

        if let (Some(prev), Some(curr)) = (prev_mid, mid) {
            if curr > prev {
                self.n_mid_up += 1;
            } else if curr < prev {
                self.n_mid_down += 1;
            }
        }
        if let (Some(prev), Some(curr)) = (prev_spread, spread) {
            if curr > prev {
                self.n_spread_widen += 1;
            } else if curr < prev {
                self.n_spread_tighten += 1;
            }
        }

        self.n_updates += 1;

        if self.t_first.is_none() {
            self.t_first = Some(t_prev_ms);
        }
        self.t_last = Some(t_curr_ms);

        (mid, spread)
    }

    /// Populate the `close_*` fields from the book state at flush time.
    ///
    /// `last_mid`/`last_spread` from the final tick take precedence; when
    /// absent they are derived from best bid/ask if the book is sane.
    pub fn close(&mut self, mgr: &BookManager, last_mid: Option<f64>, last_spread: Option<f64>) {
        let bb = mgr.bids().best();
        let ba = mgr.asks().best();
        self.close_bb = bb;
        self.close_ba = ba;
        self.close_bq0 = bb.and_then(|p| mgr.bids().level_qty(p)).unwrap_or(0.0);
        self.close_aq0 = ba.and_then(|p| mgr.asks().level_qty(p)).unwrap_or(0.0);

        let mut close_mid = last_mid;
        let mut close_spread = last_spread;
        if close_mid.is_none() || close_spread.is_none() {
            if let (Some(bb), Some(ba)) = (bb, ba)
                && ba >= bb
            {
                close_mid = Some(0.5 * (ba + bb));
                close_spread = Some(ba - bb);
            }
        }
        self.close_mid = close_mid;
        self.close_spread = close_spread;

        let denom = self.close_bq0 + self.close_aq0;
        self.close_best_imb = if denom > 0.0 {
            (self.close_bq0 - self.close_aq0) / denom
        } else {
            0.0
        };
    }

    /// Zero every window-local field; the live book itself is untouched so
    /// the next window starts warm.
    pub fn reset(&mut self, win_start_ms: Option<i64>) {
        *self = Self {
            t_first: win_start_ms,
            t_last: win_start_ms,
            ..Self::default()
        };
    }
}
