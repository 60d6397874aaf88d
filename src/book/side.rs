//! One side of an order book as parallel sorted arrays.
//!
//! Prices are kept strictly sorted ascending with the level quantities in a
//! parallel vector, so `best()` is O(1) at either end and a level lookup is
//! one binary search. Rolling totals (`total_qty`, `total_notional`) are
//! adjusted on every mutation instead of being recomputed.

/// Which side of the book a [`SideBook`] represents.
///
/// Determines which end of the sorted price array is "best" (highest price
/// for bids, lowest for asks) and which end is trimmed by depth enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    /// Buy side; best is the highest price.
    Bid,
    /// Sell side; best is the lowest price.
    Ask,
}

/// Sorted price levels for one side of the book.
#[derive(Debug, Clone)]
pub struct SideBook {
    side: BookSide,
    /// Strictly ascending level prices.
    prices: Vec<f64>,
    /// Level quantities, parallel to `prices`.
    volumes: Vec<f64>,
    total_qty: f64,
    total_notional: f64,
}

impl SideBook {
    /// Create an empty side book.
    #[must_use]
    pub fn new(side: BookSide) -> Self {
        Self {
            side,
            prices: Vec::new(),
            volumes: Vec::new(),
            total_qty: 0.0,
            total_notional: 0.0,
        }
    }

    /// Remove every level and zero the rolling totals.
    pub fn clear(&mut self) {
        self.prices.clear();
        self.volumes.clear();
        self.total_qty = 0.0;
        self.total_notional = 0.0;
    }

    /// Replace the whole side with snapshot levels.
    ///
    /// Zero-quantity levels are skipped; the rest are sorted and the totals
    /// recomputed once.
    pub fn set_snapshot<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        self.clear();
        let mut tmp: Vec<(f64, f64)> = levels.into_iter().filter(|(_, v)| *v != 0.0).collect();
        tmp.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (price, vol) in tmp {
            self.prices.push(price);
            self.volumes.push(vol);
            self.total_qty += vol;
            self.total_notional += price * vol;
        }
    }

    /// Insert, update or delete a single level.
    ///
    /// A quantity of zero deletes the level (no-op if absent). Inserts take
    /// the fast path when the price lands at either end of the array,
    /// otherwise a binary search finds the slot.
    pub fn apply_level(&mut self, price: f64, vol: f64) {
        match self.prices.binary_search_by(|p| p.total_cmp(&price)) {
            Ok(idx) => {
                if vol == 0.0 {
                    let old = self.volumes.remove(idx);
                    self.prices.remove(idx);
                    self.total_qty -= old;
                    self.total_notional -= price * old;
                } else {
                    let old = self.volumes[idx];
                    let delta = vol - old;
                    if delta != 0.0 {
                        self.volumes[idx] = vol;
                        self.total_qty += delta;
                        self.total_notional += price * delta;
                    }
                }
            }
            Err(idx) => {
                if vol == 0.0 {
                    return;
                }
                if idx == self.prices.len() {
                    self.prices.push(price);
                    self.volumes.push(vol);
                } else {
                    self.prices.insert(idx, price);
                    self.volumes.insert(idx, vol);
                }
                self.total_qty += vol;
                self.total_notional += price * vol;
            }
        }
    }

    /// Drop worst-priced levels until at most `depth` remain.
    ///
    /// For bids the worst level is the lowest price (front of the array);
    /// for asks it is the highest (back).
    pub fn enforce_depth(&mut self, depth: usize) {
        while self.prices.len() > depth {
            let (price, vol) = match self.side {
                BookSide::Bid => (self.prices.remove(0), self.volumes.remove(0)),
                BookSide::Ask => {
                    let p = self.prices.pop().unwrap_or_default();
                    let v = self.volumes.pop().unwrap_or_default();
                    (p, v)
                }
            };
            self.total_qty -= vol;
            self.total_notional -= price * vol;
        }
    }

    /// Best price on this side, if any.
    #[must_use]
    pub fn best(&self) -> Option<f64> {
        match self.side {
            BookSide::Bid => self.prices.last().copied(),
            BookSide::Ask => self.prices.first().copied(),
        }
    }

    /// Quantity resting at `price`, if the level exists.
    #[must_use]
    pub fn level_qty(&self, price: f64) -> Option<f64> {
        self.prices
            .binary_search_by(|p| p.total_cmp(&price))
            .ok()
            .map(|idx| self.volumes[idx])
    }

    /// Number of levels currently on this side.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// True when no levels are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Rolling sum of level quantities.
    #[must_use]
    #[inline]
    pub fn total_qty(&self) -> f64 {
        self.total_qty
    }

    /// Rolling sum of price x quantity over all levels.
    #[must_use]
    #[inline]
    pub fn total_notional(&self) -> f64 {
        self.total_notional
    }

    /// Volume-weighted average price of the resting levels, if any volume.
    #[must_use]
    pub fn vwap(&self) -> Option<f64> {
        if self.total_qty > 0.0 {
            Some(self.total_notional / self.total_qty)
        } else {
            None
        }
    }

    /// Levels in ascending price order.
    pub fn levels(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.prices.iter().copied().zip(self.volumes.iter().copied())
    }
}
