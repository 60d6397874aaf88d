//! Fixed-width binary persistence keys.
//!
//! Two key families are used by the pipeline, both big-endian so that the
//! store's lexicographic byte order matches the natural tuple order:
//!
//! - **Window keys** — 30 bytes identifying one finalized window:
//!
//!   ```text
//!   [window_end_ms: u64][symbol_left: 8][symbol_right: 8]
//!   [kind: u8][window_size_ms: u32][platform: u8]
//!   ```
//!
//!   The symbol (`btc_usdt`) is split on the first underscore; each half is
//!   upper-cased ASCII, truncated to 8 bytes and NUL-padded. Byte order of
//!   packed keys therefore sorts by
//!   `(window_end_ms, symbol, kind, window_size_ms, platform)`.
//!
//! - **Event-id keys** — the 8-byte two's-complement big-endian encoding of
//!   the signed 64-bit ids assigned by the durable event log.

use std::fmt;
use std::str::FromStr;

/// Total size of a packed window key in bytes.
pub const WINDOW_KEY_LEN: usize = 30;

/// Size of a packed event-id key in bytes.
pub const EVENT_ID_KEY_LEN: usize = 8;

/// Errors produced by the key codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyError {
    /// A key buffer had the wrong length.
    Length {
        /// The expected number of bytes.
        expected: usize,
        /// The number of bytes actually supplied.
        got: usize,
    },

    /// A symbol did not contain the `left_right` underscore separator.
    SymbolFormat(String),

    /// A packed symbol half was not valid ASCII.
    SymbolEncoding,

    /// An unknown platform discriminant was encountered while unpacking.
    UnknownPlatform(u8),

    /// An unknown platform name was encountered while parsing.
    UnknownPlatformName(String),

    /// An unknown window kind discriminant was encountered while unpacking.
    UnknownKind(u8),

    /// An unknown window kind name was encountered while parsing.
    UnknownKindName(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Length { expected, got } => {
                write!(f, "invalid key length: expected {expected} bytes, got {got}")
            }
            KeyError::SymbolFormat(symbol) => {
                write!(f, "symbol {symbol:?} is not of the form left_right")
            }
            KeyError::SymbolEncoding => write!(f, "packed symbol is not valid ASCII"),
            KeyError::UnknownPlatform(value) => write!(f, "unknown platform discriminant {value}"),
            KeyError::UnknownPlatformName(name) => write!(f, "unknown platform {name:?}"),
            KeyError::UnknownKind(value) => {
                write!(f, "unknown window kind discriminant {value}")
            }
            KeyError::UnknownKindName(name) => write!(f, "unknown window kind {name:?}"),
        }
    }
}

impl std::error::Error for KeyError {}

/// Upstream platform a stream originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Platform {
    /// Binance spot feeds.
    Binance = 0,
    /// Kraken spot feeds.
    Kraken = 1,
}

impl Platform {
    /// Decode a platform from its key discriminant.
    pub fn from_u8(value: u8) -> Result<Self, KeyError> {
        match value {
            0 => Ok(Platform::Binance),
            1 => Ok(Platform::Kraken),
            other => Err(KeyError::UnknownPlatform(other)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Binance => write!(f, "binance"),
            Platform::Kraken => write!(f, "kraken"),
        }
    }
}

impl FromStr for Platform {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binance" => Ok(Platform::Binance),
            "kraken" => Ok(Platform::Kraken),
            other => Err(KeyError::UnknownPlatformName(other.to_string())),
        }
    }
}

/// The kind of aggregate a window key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum WindowKind {
    /// Trade windows (OHLCV + log-return moments).
    Trade = 0,
    /// Order-book windows (time-weighted book statistics).
    Order = 1,
}

impl WindowKind {
    /// Decode a window kind from its key discriminant.
    pub fn from_u8(value: u8) -> Result<Self, KeyError> {
        match value {
            0 => Ok(WindowKind::Trade),
            1 => Ok(WindowKind::Order),
            other => Err(KeyError::UnknownKind(other)),
        }
    }

    /// Directory name the durable event log uses for this kind.
    #[must_use]
    pub fn log_dirname(&self) -> &'static str {
        match self {
            WindowKind::Trade => "trade",
            WindowKind::Order => "order_book",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKind::Trade => write!(f, "trade"),
            WindowKind::Order => write!(f, "order"),
        }
    }
}

impl FromStr for WindowKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trade" => Ok(WindowKind::Trade),
            "order" => Ok(WindowKind::Order),
            other => Err(KeyError::UnknownKindName(other.to_string())),
        }
    }
}

/// The decoded fields of a 30-byte window key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// End of the window (exclusive), milliseconds since the epoch.
    pub window_end_ms: u64,
    /// Lower-case `left_right` symbol, e.g. `btc_usdt`.
    pub symbol: String,
    /// Trade or order-book window.
    pub kind: WindowKind,
    /// Window length in milliseconds.
    pub window_size_ms: u32,
    /// Upstream platform.
    pub platform: Platform,
}

/// Upper-case, truncate and NUL-pad one symbol half to 8 bytes.
fn fix8(half: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    let mut i = 0;
    for byte in half.bytes() {
        if i == 8 {
            break;
        }
        if byte.is_ascii() {
            out[i] = byte.to_ascii_uppercase();
            i += 1;
        }
    }
    out
}

/// Strip trailing NULs and lower-case one packed symbol half.
fn strip8(bytes: &[u8]) -> Result<String, KeyError> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let half = &bytes[..end];
    if !half.is_ascii() {
        return Err(KeyError::SymbolEncoding);
    }
    Ok(half.iter().map(|b| b.to_ascii_lowercase() as char).collect())
}

impl WindowKey {
    /// Pack the key into its 30-byte big-endian wire form.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::SymbolFormat`] if the symbol has no underscore.
    pub fn pack(&self) -> Result<[u8; WINDOW_KEY_LEN], KeyError> {
        let (left, right) = self
            .symbol
            .split_once('_')
            .ok_or_else(|| KeyError::SymbolFormat(self.symbol.clone()))?;

        let mut out = [0u8; WINDOW_KEY_LEN];
        out[0..8].copy_from_slice(&self.window_end_ms.to_be_bytes());
        out[8..16].copy_from_slice(&fix8(left));
        out[16..24].copy_from_slice(&fix8(right));
        out[24] = self.kind as u8;
        out[25..29].copy_from_slice(&self.window_size_ms.to_be_bytes());
        out[29] = self.platform as u8;
        Ok(out)
    }

    /// Decode a 30-byte window key back into its fields.
    ///
    /// Inverse of [`pack`](WindowKey::pack); the symbol comes back
    /// lower-cased.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the buffer has the wrong length or carries
    /// an unknown kind/platform discriminant.
    pub fn unpack(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != WINDOW_KEY_LEN {
            return Err(KeyError::Length {
                expected: WINDOW_KEY_LEN,
                got: bytes.len(),
            });
        }

        let mut end = [0u8; 8];
        end.copy_from_slice(&bytes[0..8]);
        let left = strip8(&bytes[8..16])?;
        let right = strip8(&bytes[16..24])?;
        let kind = WindowKind::from_u8(bytes[24])?;
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[25..29]);
        let platform = Platform::from_u8(bytes[29])?;

        Ok(WindowKey {
            window_end_ms: u64::from_be_bytes(end),
            symbol: format!("{left}_{right}"),
            kind,
            window_size_ms: u32::from_be_bytes(size),
            platform,
        })
    }
}

/// Encode an event-log id into its 8-byte big-endian key.
#[must_use]
#[inline]
pub fn encode_event_id(id: i64) -> [u8; EVENT_ID_KEY_LEN] {
    id.to_be_bytes()
}

/// Decode an 8-byte event-log key back into its signed id.
///
/// # Errors
///
/// Returns [`KeyError::Length`] if the buffer is not exactly 8 bytes.
#[inline]
pub fn decode_event_id(bytes: &[u8]) -> Result<i64, KeyError> {
    let arr: [u8; EVENT_ID_KEY_LEN] = bytes.try_into().map_err(|_| KeyError::Length {
        expected: EVENT_ID_KEY_LEN,
        got: bytes.len(),
    })?;
    Ok(i64::from_be_bytes(arr))
}
