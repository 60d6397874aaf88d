//! Error types for the durable log subsystem.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur within the durable log subsystem.
#[derive(Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// An I/O error occurred while reading or writing segment files.
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved, if known.
        path: Option<PathBuf>,
    },

    /// An entry failed CRC32 integrity verification.
    CorruptEntry {
        /// Byte offset of the corrupt entry within its segment.
        offset: usize,
        /// The CRC32 stored alongside the entry.
        expected_crc: u32,
        /// The CRC32 computed from the entry bytes.
        actual_crc: u32,
    },

    /// An entry has a truncated or malformed header.
    InvalidEntryHeader {
        /// Byte offset within the segment where the problem was found.
        offset: usize,
        /// Description of the header problem.
        message: String,
    },

    /// A key does not fit the entry format or the expected key family.
    InvalidKey {
        /// Description of the key problem.
        message: String,
    },

    /// A single entry exceeds the segment size.
    EntryTooLarge {
        /// The size of the encoded entry in bytes.
        entry_bytes: usize,
        /// The maximum segment size in bytes.
        segment_size: usize,
    },

    /// A write was attempted through a read-only (secondary) handle.
    ReadOnly,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { message, path } => {
                if let Some(p) = path {
                    write!(f, "log I/O error at {}: {message}", p.display())
                } else {
                    write!(f, "log I/O error: {message}")
                }
            }
            StoreError::CorruptEntry {
                offset,
                expected_crc,
                actual_crc,
            } => {
                write!(
                    f,
                    "corrupt log entry at offset {offset}: expected CRC \
                     {expected_crc:#010x}, got {actual_crc:#010x}"
                )
            }
            StoreError::InvalidEntryHeader { offset, message } => {
                write!(f, "invalid log entry header at offset {offset}: {message}")
            }
            StoreError::InvalidKey { message } => write!(f, "invalid log key: {message}"),
            StoreError::EntryTooLarge {
                entry_bytes,
                segment_size,
            } => {
                write!(
                    f,
                    "log entry too large: {entry_bytes} bytes exceeds segment \
                     size {segment_size} bytes"
                )
            }
            StoreError::ReadOnly => write!(f, "log handle is read-only"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}
