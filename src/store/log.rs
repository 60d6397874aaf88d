//! Abstract contracts of the two durable logs the pipeline touches.
//!
//! The **event log** is the append-only record of raw upstream events, one
//! log per `(platform, kind, symbol)`. Keys are 8-byte big-endian signed
//! ids assigned at append time; workers open it read-only for backfill and
//! gap recovery. The **windows log** receives finalized window aggregates
//! under their 30-byte window keys; the orchestrator holds the only
//! writable handle and reverse-scans it at startup for checkpoint
//! discovery.

use super::error::StoreError;
use crate::keys::decode_event_id;

/// One event-log record: the decoded id and the opaque value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// The monotone id decoded from the record key.
    pub id: i64,
    /// The raw event payload.
    pub value: Vec<u8>,
}

impl LogRecord {
    /// Build a record from raw `(key, value)` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] when the key is not an 8-byte id.
    pub fn from_raw(key: &[u8], value: Vec<u8>) -> Result<Self, StoreError> {
        let id = decode_event_id(key).map_err(|e| StoreError::InvalidKey {
            message: e.to_string(),
        })?;
        Ok(Self { id, value })
    }
}

/// Boxed iterator over raw `(key, value)` entries.
pub type RawEntryIter = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>>>;

/// Boxed iterator over decoded event-log records.
pub type LogRecordIter = Box<dyn Iterator<Item = Result<LogRecord, StoreError>>>;

/// Read contract of the durable event log.
///
/// Iterators are ordered cursors; dropping one releases whatever mappings
/// or snapshots it holds.
pub trait EventLog {
    /// Iterate forward from the first record with `id >= start_id`
    /// (from the beginning when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be opened for iteration.
    fn iter_from(&self, start_id: Option<i64>) -> Result<LogRecordIter, StoreError>;

    /// Iterate backward from the newest record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be opened for iteration.
    fn iter_from_end(&self) -> Result<LogRecordIter, StoreError>;

    /// The id of the newest record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be read.
    fn last_id(&self) -> Result<Option<i64>, StoreError> {
        match self.iter_from_end()?.next() {
            Some(record) => Ok(Some(record?.id)),
            None => Ok(None),
        }
    }

    /// Pick up writes the primary made since this (secondary) handle was
    /// opened or last refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the refresh fails.
    fn catch_up(&mut self) -> Result<(), StoreError>;
}

/// Write contract of the windows log.
pub trait WindowStore {
    /// Store `value` under `key`, overwriting semantics per key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write cannot be persisted.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Scan entries newest-first for checkpoint discovery. When a key was
    /// written more than once the newest write is yielded first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the log cannot be opened for iteration.
    fn iter_rev(&self) -> Result<RawEntryIter, StoreError>;
}
