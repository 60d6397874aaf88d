//! Binary-search checkpoint recovery over the event log.

use super::error::StoreError;
use super::log::EventLog;
use crate::events::StreamEvent;
use tracing::debug;

/// Find the id of the first log record whose event time is strictly
/// greater than `checkpoint_ms`.
///
/// Peeks the first and last records first: when the whole log is newer
/// than the checkpoint there is nothing to skip (`None`, start from the
/// beginning), and when the whole log is at or before the checkpoint the
/// last record's id is returned so the caller resumes at the tail.
/// Otherwise the id space is binary-searched, decoding one record per
/// probe, for O(log N) cursor opens.
///
/// # Errors
///
/// Returns [`StoreError`] if the log cannot be read. Records that fail to
/// decode are treated as infinitely old so a stray bad record cannot stall
/// recovery.
pub fn find_first_after<E, L>(log: &L, checkpoint_ms: i64) -> Result<Option<i64>, StoreError>
where
    E: StreamEvent,
    L: EventLog,
{
    let first = match log.iter_from(None)?.next() {
        Some(record) => record?,
        None => return Ok(None),
    };
    let last = match log.iter_from_end()?.next() {
        Some(record) => record?,
        None => return Ok(None),
    };

    if decode_time::<E>(&first.value) > checkpoint_ms {
        // Everything is newer than the checkpoint; no skip possible.
        return Ok(None);
    }
    if decode_time::<E>(&last.value) <= checkpoint_ms {
        // Everything is at or before the checkpoint; resume at the tail.
        return Ok(Some(last.id));
    }

    let mut low = first.id;
    let mut high = last.id;
    let mut result = None;
    let mut probes = 0usize;

    while low <= high {
        let mid = low + (high - low) / 2;
        probes += 1;

        let record = match log.iter_from(Some(mid))?.next() {
            Some(record) => record?,
            None => {
                high = mid - 1;
                continue;
            }
        };

        if decode_time::<E>(&record.value) > checkpoint_ms {
            result = Some(record.id);
            high = mid - 1;
        } else {
            low = mid + 1;
        }
    }

    debug!(checkpoint_ms, probes, start_id = ?result, "checkpoint search finished");
    Ok(result)
}

/// Event time of a stored record, `i64::MIN` when it fails to decode.
fn decode_time<E: StreamEvent>(value: &[u8]) -> i64 {
    match E::decode(value) {
        Ok(event) => event.time(),
        Err(error) => {
            tracing::warn!(%error, "undecodable record during checkpoint search");
            i64::MIN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Trade;
    use crate::store::SegmentLog;
    use std::cell::Cell;

    fn trade_json(time: i64) -> Vec<u8> {
        format!(
            r#"{{"symbol":"btc_usdt","price":"10","quantity":"1","time":{time},"platform":"binance","side":0,"orderType":0}}"#
        )
        .into_bytes()
    }

    fn seeded_log(times: &[i64]) -> (tempfile::TempDir, SegmentLog) {
        let dir = tempfile::tempdir().unwrap_or_else(|_| panic!("tempdir"));
        let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        for t in times {
            assert!(log.append(&trade_json(*t)).is_ok());
        }
        (dir, log)
    }

    #[test]
    fn test_empty_log_returns_none() {
        let (_dir, log) = seeded_log(&[]);
        let found = find_first_after::<Trade, _>(&log, 100);
        assert_eq!(found.unwrap_or(Some(-1)), None);
    }

    #[test]
    fn test_all_records_newer_returns_none() {
        let (_dir, log) = seeded_log(&[100, 200, 300]);
        let found = find_first_after::<Trade, _>(&log, 50);
        assert_eq!(found.unwrap_or(Some(-1)), None);
    }

    #[test]
    fn test_all_records_older_returns_last() {
        let (_dir, log) = seeded_log(&[100, 200, 300]);
        let found = find_first_after::<Trade, _>(&log, 300);
        assert_eq!(found.unwrap_or(None), Some(2));
    }

    #[test]
    fn test_finds_first_strictly_greater() {
        let times: Vec<i64> = (0..100).map(|i| i * 10).collect();
        let (_dir, log) = seeded_log(&times);

        // Checkpoint exactly on a record time: the next record wins.
        let found = find_first_after::<Trade, _>(&log, 500);
        assert_eq!(found.unwrap_or(None), Some(51));

        // Checkpoint between records.
        let found = find_first_after::<Trade, _>(&log, 505);
        assert_eq!(found.unwrap_or(None), Some(51));

        // Checkpoint before the second record.
        let found = find_first_after::<Trade, _>(&log, 0);
        assert_eq!(found.unwrap_or(None), Some(1));
    }

    /// An [`EventLog`] wrapper counting cursor opens.
    struct CountingLog<'a> {
        inner: &'a SegmentLog,
        opens: &'a Cell<usize>,
    }

    impl EventLog for CountingLog<'_> {
        fn iter_from(
            &self,
            start_id: Option<i64>,
        ) -> Result<crate::store::LogRecordIter, StoreError> {
            self.opens.set(self.opens.get() + 1);
            self.inner.iter_from(start_id)
        }

        fn iter_from_end(&self) -> Result<crate::store::LogRecordIter, StoreError> {
            self.opens.set(self.opens.get() + 1);
            self.inner.iter_from_end()
        }

        fn catch_up(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_logarithmic_cursor_opens() {
        let n: i64 = 4096;
        let times: Vec<i64> = (0..n).map(|i| i * 2).collect();
        let (_dir, log) = seeded_log(&times);

        let opens = Cell::new(0);
        let counting = CountingLog {
            inner: &log,
            opens: &opens,
        };

        let found = find_first_after::<Trade, _>(&counting, n);
        assert_eq!(found.unwrap_or(None), Some(n / 2 + 1));

        // Two peeks plus a binary search over 4096 ids.
        assert!(
            opens.get() <= 2 + 16,
            "expected O(log N) cursor opens, got {}",
            opens.get()
        );
    }
}
