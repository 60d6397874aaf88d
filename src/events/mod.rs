//! Wire events consumed by the pipeline.
//!
//! Upstream collectors publish one JSON document per event, both over the
//! live pub/sub socket and as the values of the durable event log. The two
//! event families are [`Trade`] (a single execution) and [`BookEvent`] (an
//! order-book snapshot or incremental update).
//!
//! Prices and quantities arrive as decimal strings; they are converted to
//! `f64` at the aggregation boundary. Event ids are assigned by the durable
//! log: live messages carry them inline, log records carry them in the key,
//! so decode leaves `id` at its default and the reader injects it via
//! [`StreamEvent::set_id`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade side discriminant: 0 = buy.
pub const SIDE_BUY: u8 = 0;

/// Trade side discriminant: 1 = sell.
pub const SIDE_SELL: u8 = 1;

/// Errors produced while decoding wire events.
#[derive(Debug)]
#[non_exhaustive]
pub enum EventError {
    /// The JSON payload could not be parsed into the expected event shape.
    Decode {
        /// The underlying parser error message.
        message: String,
    },
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Decode { message } => write!(f, "event decode error: {message}"),
        }
    }
}

impl std::error::Error for EventError {}

impl From<serde_json::Error> for EventError {
    #[cold]
    fn from(err: serde_json::Error) -> Self {
        EventError::Decode {
            message: err.to_string(),
        }
    }
}

/// Capability shared by every event that flows through the pipeline:
/// a monotone log id and an event-time in epoch milliseconds.
pub trait StreamEvent: Sized {
    /// Decode one event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Decode`] on malformed payloads.
    fn decode(bytes: &[u8]) -> Result<Self, EventError>;

    /// The monotone id assigned by the durable log.
    fn id(&self) -> i64;

    /// Overwrite the id (used when the id lives in the log key rather than
    /// the payload).
    fn set_id(&mut self, id: i64);

    /// Event time in milliseconds since the epoch.
    fn time(&self) -> i64;
}

/// A single executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Lower-case `left_right` symbol, e.g. `btc_usdt`.
    pub symbol: String,
    /// Execution price as a decimal string, exactly as published upstream.
    pub price: String,
    /// Executed quantity as a decimal string.
    pub quantity: String,
    /// Event time in epoch milliseconds.
    pub time: i64,
    /// Platform name, e.g. `binance`.
    pub platform: String,
    /// 0 = buy, 1 = sell.
    pub side: u8,
    /// 0 = market, 1 = limit.
    #[serde(rename = "orderType")]
    pub order_type: u8,
    /// Free-form platform extras; carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misc: Option<String>,
    /// Monotone log id; absent from log values (injected from the key).
    #[serde(default)]
    pub id: i64,
}

impl Trade {
    /// Execution price parsed to `f64`; malformed values collapse to 0.0.
    #[must_use]
    pub fn price_f64(&self) -> f64 {
        parse_decimal(&self.price)
    }

    /// Executed quantity parsed to `f64`; malformed values collapse to 0.0.
    #[must_use]
    pub fn quantity_f64(&self) -> f64 {
        parse_decimal(&self.quantity)
    }
}

impl StreamEvent for Trade {
    fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    #[inline]
    fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    #[inline]
    fn time(&self) -> i64 {
        self.time
    }
}

/// Whether a [`BookEvent`] replaces the book or mutates levels in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookEventKind {
    /// Full replacement of both sides; establishes the depth cap.
    Snapshot,
    /// Incremental level deltas; quantity 0 deletes a level.
    Update,
}

/// An order-book snapshot or incremental update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEvent {
    /// Snapshot or update.
    #[serde(rename = "type")]
    pub kind: BookEventKind,
    /// Lower-case `left_right` symbol.
    pub symbol: String,
    /// Bid levels as `(price, quantity)` decimal-string pairs.
    pub bids: Vec<(String, String)>,
    /// Ask levels as `(price, quantity)` decimal-string pairs.
    pub asks: Vec<(String, String)>,
    /// Event time in epoch milliseconds.
    pub time: i64,
    /// Platform name.
    pub platform: String,
    /// Monotone log id; absent from log values (injected from the key).
    #[serde(default)]
    pub id: i64,
}

impl StreamEvent for BookEvent {
    fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    #[inline]
    fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    #[inline]
    fn time(&self) -> i64 {
        self.time
    }
}

/// Parse an upstream decimal string, collapsing malformed input to 0.0.
///
/// Zero is already the "absent level" sentinel everywhere downstream, so a
/// garbled price or quantity degrades to a no-op rather than poisoning a
/// whole window.
#[must_use]
pub fn parse_decimal(s: &str) -> f64 {
    match s.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            tracing::trace!(value = s, "unparseable decimal string, treating as 0");
            0.0
        }
    }
}
