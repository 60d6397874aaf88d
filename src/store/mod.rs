//! Durable log: the abstract contracts the pipeline consumes, the
//! memory-mapped segmented implementation, and checkpoint recovery.

mod checkpoint;
mod error;
mod log;
mod segment_log;

pub use checkpoint::find_first_after;
pub use error::StoreError;
pub use log::{EventLog, LogRecord, LogRecordIter, RawEntryIter, WindowStore};
pub use segment_log::SegmentLog;

/// Normalize a symbol or database name into a safe log directory name:
/// lower-case, anything outside `[a-z0-9_]` replaced by `_`, runs of
/// underscores squashed, leading/trailing underscores trimmed.
#[must_use]
pub fn normalize_log_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            Some(c)
        } else {
            Some('_')
        };
        if let Some(c) = mapped {
            if c == '_' {
                if last_was_underscore {
                    continue;
                }
                last_was_underscore = true;
            } else {
                last_was_underscore = false;
            }
            out.push(c);
        }
    }
    out.trim_matches('_').to_string()
}
