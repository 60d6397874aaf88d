//! Error types for the shared-memory ring buffer.

use std::fmt;
use std::path::PathBuf;

/// Errors raised while creating, attaching or unlinking ring-buffer memory.
#[derive(Debug)]
#[non_exhaustive]
pub enum RingError {
    /// An I/O error occurred on a backing shared-memory file.
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The segment path involved, if known.
        path: Option<PathBuf>,
    },

    /// The requested capacity is not a power of two.
    InvalidCapacity {
        /// The capacity that was requested.
        capacity: u32,
    },

    /// An attached segment is smaller than the layout requires.
    SegmentTooSmall {
        /// The segment path.
        path: PathBuf,
        /// The expected minimum size in bytes.
        expected: usize,
        /// The actual mapped size in bytes.
        got: usize,
    },
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::Io { message, path } => {
                if let Some(p) = path {
                    write!(f, "ring buffer I/O error at {}: {message}", p.display())
                } else {
                    write!(f, "ring buffer I/O error: {message}")
                }
            }
            RingError::InvalidCapacity { capacity } => {
                write!(f, "ring capacity {capacity} is not a power of two")
            }
            RingError::SegmentTooSmall {
                path,
                expected,
                got,
            } => {
                write!(
                    f,
                    "shared-memory segment {} too small: expected at least \
                     {expected} bytes, got {got}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for RingError {}

impl From<std::io::Error> for RingError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        RingError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}
