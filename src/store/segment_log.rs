//! Memory-mapped segmented key-value log.
//!
//! [`SegmentLog`] persists `(key, value)` entries to append-only,
//! memory-mapped segment files. Each segment is pre-allocated to a
//! configurable size (default 64 MB) and rotated when full. The same
//! implementation backs both logs of the pipeline: the event log (8-byte
//! id keys assigned by [`append`](SegmentLog::append)) and the windows log
//! (30-byte window keys written with [`put`](SegmentLog::put)).
//!
//! # On-Disk Entry Format (little-endian)
//!
//! ```text
//! [4 bytes: entry_length][2 bytes: key_length]
//! [K bytes: key][N bytes: value][4 bytes: CRC32]
//! ```
//!
//! - `entry_length` — total bytes after itself (2 + K + N + 4).
//! - CRC32 covers: key ‖ value (not `entry_length`/`key_length`).
//!
//! # Segment Files
//!
//! Segments are named `segment-{start:020}.log` where `start` is the first
//! entry's key prefix read as a big-endian u64. Keys are inserted in
//! ascending order by both producers (append ids are monotone; window keys
//! lead with a monotone `window_end_ms`), so the file names sort in key
//! order and a forward cursor can seek to the right segment by name.
//!
//! # Primary and Secondary Handles
//!
//! A primary handle owns the single writer. A secondary handle
//! ([`open_secondary`](SegmentLog::open_secondary)) never creates or
//! mutates segments; it sees the primary's appends through the shared page
//! cache because every cursor re-lists segments and re-scans the active
//! one's written range.

use super::error::StoreError;
use super::log::{EventLog, LogRecord, LogRecordIter, RawEntryIter, WindowStore};
use crate::keys::{decode_event_id, encode_event_id};
use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Default segment size in bytes (64 MB).
const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Size of the fixed entry prefix: `[4 entry_length][2 key_length]`.
const ENTRY_HEADER_SIZE: usize = 4 + 2;

/// Size of the CRC32 trailer appended to each entry.
const ENTRY_CRC_SIZE: usize = 4;

/// Manages writing to a single memory-mapped segment file.
struct SegmentWriter {
    mmap: MmapMut,
    write_pos: usize,
    capacity: usize,
    path: PathBuf,
}

impl SegmentWriter {
    /// Create a new segment file, pre-allocated and zero-filled.
    fn create(path: &Path, capacity: usize) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?;

        file.set_len(capacity as u64).map_err(|e| StoreError::Io {
            message: e.to_string(),
            path: Some(path.to_path_buf()),
        })?;

        // SAFETY: The file is owned by the single-writer primary and is not
        // truncated while mapped.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?
        };

        Ok(Self {
            mmap,
            write_pos: 0,
            capacity,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing segment for appending, scanning for the current
    /// write position.
    fn open_existing(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?;

        let capacity = file
            .metadata()
            .map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?
            .len() as usize;

        // SAFETY: Single-writer primary; no external truncation while mapped.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(path.to_path_buf()),
            })?
        };

        let write_pos = scan_write_position(&mmap);

        Ok(Self {
            mmap,
            write_pos,
            capacity,
            path: path.to_path_buf(),
        })
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.write_pos)
    }

    /// Write a pre-encoded entry at the current position and flush it.
    fn write_entry(&mut self, entry_bytes: &[u8]) -> Result<(), StoreError> {
        let end = self.write_pos + entry_bytes.len();
        if end > self.capacity {
            return Err(StoreError::EntryTooLarge {
                entry_bytes: entry_bytes.len(),
                segment_size: self.capacity,
            });
        }

        self.mmap[self.write_pos..end].copy_from_slice(entry_bytes);
        self.mmap
            .flush_range(self.write_pos, entry_bytes.len())
            .map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            })?;
        self.write_pos = end;
        Ok(())
    }
}

/// A memory-mapped, append-only key-value log with segment rotation.
pub struct SegmentLog {
    dir: PathBuf,
    /// The active segment. `None` for secondary handles and for writable
    /// logs that have not received their first entry yet.
    writer: Option<SegmentWriter>,
    segment_size: usize,
    writable: bool,
    /// Next id handed out by `append`, derived from the newest key on open.
    next_id: i64,
}

impl SegmentLog {
    /// Open or create a writable (primary) log in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created or an
    /// existing segment cannot be opened.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        Self::open_with_segment_size(dir, DEFAULT_SEGMENT_SIZE)
    }

    /// Open or create a writable log with a custom segment size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created or an
    /// existing segment cannot be opened.
    pub fn open_with_segment_size<P: AsRef<Path>>(
        dir: P,
        segment_size: usize,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            message: e.to_string(),
            path: Some(dir.clone()),
        })?;

        let mut segments = list_segments(&dir)?;
        segments.sort_unstable();

        let writer = match segments.last() {
            Some(latest) => Some(SegmentWriter::open_existing(&segment_path(&dir, *latest))?),
            None => None,
        };

        let mut log = Self {
            dir,
            writer,
            segment_size,
            writable: true,
            next_id: 0,
        };
        log.next_id = log.derive_next_id()?;
        Ok(log)
    }

    /// Open a read-only (secondary) view of a log some other process
    /// writes. Never creates the directory or any segment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be listed.
    pub fn open_secondary<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        // A directory that does not exist yet reads as an empty log until
        // the primary creates it.
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            writer: None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            writable: false,
            next_id: 0,
        })
    }

    /// The log directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn derive_next_id(&self) -> Result<i64, StoreError> {
        match self.last_key()? {
            Some(key) if key.len() == 8 => {
                let last = decode_event_id(&key).map_err(|e| StoreError::InvalidKey {
                    message: e.to_string(),
                })?;
                Ok(last + 1)
            }
            _ => Ok(0),
        }
    }

    /// The newest key in the log, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if segments cannot be read.
    pub fn last_key(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match self.iter_rev_raw()?.next() {
            Some(entry) => Ok(Some(entry?.0)),
            None => Ok(None),
        }
    }

    /// Append `value` under the next monotone id key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadOnly`] on a secondary handle, or an I/O
    /// error if the entry cannot be persisted.
    pub fn append(&mut self, value: &[u8]) -> Result<i64, StoreError> {
        let id = self.next_id;
        self.put(&encode_event_id(id), value)?;
        self.next_id = id + 1;
        Ok(id)
    }

    /// Append a batch of values, returning the assigned ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on the first failed append; earlier entries
    /// in the batch stay persisted.
    pub fn append_batch(&mut self, values: &[Vec<u8>]) -> Result<Vec<i64>, StoreError> {
        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            ids.push(self.append(value)?);
        }
        Ok(ids)
    }

    /// Write `value` under an explicit key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadOnly`] on a secondary handle, or an I/O
    /// error if the entry cannot be persisted.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }

        let entry = encode_entry(key, value)?;

        let needs_rotation = match &self.writer {
            Some(writer) => writer.remaining() < entry.len(),
            None => true,
        };
        if needs_rotation {
            self.rotate_segment(key)?;
        }

        let writer = self.writer.as_mut().ok_or(StoreError::ReadOnly)?;
        if writer.remaining() < entry.len() {
            // A single entry larger than a fresh segment.
            return Err(StoreError::EntryTooLarge {
                entry_bytes: entry.len(),
                segment_size: self.segment_size,
            });
        }
        writer.write_entry(&entry)
    }

    /// Rotate to a new segment named after the first key it will hold.
    fn rotate_segment(&mut self, first_key: &[u8]) -> Result<(), StoreError> {
        // Shrink the finished segment to its used size to reclaim space.
        if let Some(old) = self.writer.take() {
            let used = old.write_pos;
            let old_path = old.path.clone();
            old.mmap.flush().map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(old_path.clone()),
            })?;
            drop(old);
            if let Ok(file) = OpenOptions::new().write(true).open(&old_path) {
                let _ = file.set_len(used as u64);
            }
        }

        // Name the segment after its first key; bump on the (rare) name
        // collision so an existing segment is never truncated. Seeks stay
        // correct because segment selection falls back one name and scans
        // forward.
        let mut start = segment_start_for_key(first_key);
        while segment_path(&self.dir, start).exists() {
            start += 1;
        }
        let path = segment_path(&self.dir, start);
        self.writer = Some(SegmentWriter::create(&path, self.segment_size)?);
        Ok(())
    }

    /// Forward cursor over raw entries, starting at the first key
    /// `>= start_key` (the beginning when `None`).
    ///
    /// Segment selection by file name assumes keys were inserted in
    /// ascending order, which both log producers guarantee.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if segments cannot be listed.
    pub fn iter_from_raw(&self, start_key: Option<&[u8]>) -> Result<SegmentIter, StoreError> {
        let mut segments = list_segments(&self.dir)?;
        segments.sort_unstable();

        let start_idx = match start_key {
            Some(key) => {
                let prefix = segment_start_for_key(key);
                match segments.binary_search(&prefix) {
                    Ok(idx) => idx,
                    Err(0) => 0,
                    Err(idx) => idx - 1,
                }
            }
            None => 0,
        };

        Ok(SegmentIter {
            dir: self.dir.clone(),
            segments: segments.into_iter().skip(start_idx).collect(),
            segment_idx: 0,
            offset: 0,
            mmap: None,
            start_key: start_key.map(<[u8]>::to_vec),
            started: false,
        })
    }

    /// Reverse cursor over raw entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if segments cannot be listed.
    pub fn iter_rev_raw(&self) -> Result<RevSegmentIter, StoreError> {
        let mut segments = list_segments(&self.dir)?;
        segments.sort_unstable();
        segments.reverse();

        Ok(RevSegmentIter {
            dir: self.dir.clone(),
            segments,
            segment_idx: 0,
            pending: Vec::new(),
        })
    }

    /// Verify every entry's CRC32 across all segments.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError::CorruptEntry`] encountered, or an
    /// I/O error if a segment cannot be read.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        for entry in self.iter_rev_raw()? {
            entry?;
        }
        Ok(())
    }
}

impl EventLog for SegmentLog {
    fn iter_from(&self, start_id: Option<i64>) -> Result<LogRecordIter, StoreError> {
        let start_key = start_id.map(encode_event_id);
        let iter = self.iter_from_raw(start_key.as_ref().map(|k| k.as_slice()))?;
        Ok(Box::new(iter.map(|entry| {
            entry.and_then(|(key, value)| LogRecord::from_raw(&key, value))
        })))
    }

    fn iter_from_end(&self) -> Result<LogRecordIter, StoreError> {
        let iter = self.iter_rev_raw()?;
        Ok(Box::new(iter.map(|entry| {
            entry.and_then(|(key, value)| LogRecord::from_raw(&key, value))
        })))
    }

    fn catch_up(&mut self) -> Result<(), StoreError> {
        // Cursors re-list segments and re-scan the active one's written
        // range on every open, so a secondary handle has no stale state to
        // refresh beyond the cached append id.
        self.next_id = self.derive_next_id()?;
        Ok(())
    }
}

impl WindowStore for SegmentLog {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        SegmentLog::put(self, key, value)
    }

    fn iter_rev(&self) -> Result<RawEntryIter, StoreError> {
        Ok(Box::new(self.iter_rev_raw()?))
    }
}

impl std::fmt::Debug for SegmentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentLog")
            .field("dir", &self.dir)
            .field("writable", &self.writable)
            .field("segment_size", &self.segment_size)
            .field("next_id", &self.next_id)
            .finish()
    }
}

// ─── Iteration ──────────────────────────────────────────────────────────────

/// Forward iterator over entries across segment files.
pub struct SegmentIter {
    dir: PathBuf,
    segments: Vec<u64>,
    segment_idx: usize,
    offset: usize,
    mmap: Option<memmap2::Mmap>,
    start_key: Option<Vec<u8>>,
    started: bool,
}

impl SegmentIter {
    /// Map the next segment read-only. Returns false when exhausted.
    fn load_next_segment(&mut self) -> Result<bool, StoreError> {
        if self.segment_idx >= self.segments.len() {
            return Ok(false);
        }

        let path = segment_path(&self.dir, self.segments[self.segment_idx]);
        self.segment_idx += 1;
        self.offset = 0;

        let file = File::open(&path).map_err(|e| StoreError::Io {
            message: e.to_string(),
            path: Some(path.clone()),
        })?;

        // SAFETY: Read-only mapping; the single writer only ever appends
        // past the region this cursor will visit as written.
        let mmap = unsafe {
            memmap2::Mmap::map(&file).map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(path),
            })?
        };

        self.mmap = Some(mmap);
        Ok(true)
    }

    fn decode_next(&mut self) -> Option<Result<(Vec<u8>, Vec<u8>), StoreError>> {
        let mmap = self.mmap.as_ref()?;
        match decode_entry(&mmap[..], self.offset)? {
            Ok((entry_end, key, value)) => {
                self.offset = entry_end;
                Some(Ok((key, value)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl Iterator for SegmentIter {
    type Item = Result<(Vec<u8>, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            match self.load_next_segment() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }

        loop {
            if let Some(result) = self.decode_next() {
                if let Ok((key, _)) = &result
                    && let Some(start) = &self.start_key
                    && key.as_slice() < start.as_slice()
                {
                    continue;
                }
                return Some(result);
            }

            match self.load_next_segment() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Reverse iterator: walks segments newest-first, entries within each
/// segment indexed forward then yielded back-to-front.
pub struct RevSegmentIter {
    dir: PathBuf,
    segments: Vec<u64>,
    segment_idx: usize,
    /// Decoded entries of the current segment in file order; consumed from
    /// the back so the newest entry is yielded first.
    pending: Vec<Result<(Vec<u8>, Vec<u8>), StoreError>>,
}

impl RevSegmentIter {
    fn load_next_segment(&mut self) -> Result<bool, StoreError> {
        if self.segment_idx >= self.segments.len() {
            return Ok(false);
        }

        let path = segment_path(&self.dir, self.segments[self.segment_idx]);
        self.segment_idx += 1;

        let file = File::open(&path).map_err(|e| StoreError::Io {
            message: e.to_string(),
            path: Some(path.clone()),
        })?;

        // SAFETY: Read-only mapping under the single-writer discipline.
        let mmap = unsafe {
            memmap2::Mmap::map(&file).map_err(|e| StoreError::Io {
                message: e.to_string(),
                path: Some(path),
            })?
        };

        let mut entries = Vec::new();
        let mut offset = 0usize;
        while let Some(result) = decode_entry(&mmap[..], offset) {
            match result {
                Ok((entry_end, key, value)) => {
                    entries.push(Ok((key, value)));
                    offset = entry_end;
                }
                Err(e) => {
                    entries.push(Err(e));
                    break;
                }
            }
        }
        // Kept in forward order; yielded by popping from the back.
        self.pending = entries;
        Ok(true)
    }
}

impl Iterator for RevSegmentIter {
    type Item = Result<(Vec<u8>, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.pop() {
                return Some(entry);
            }
            match self.load_next_segment() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

// ─── Entry codec and helpers ────────────────────────────────────────────────

/// Encode one entry: `[4 entry_len][2 key_len][key][value][4 crc]`.
fn encode_entry(key: &[u8], value: &[u8]) -> Result<Vec<u8>, StoreError> {
    if key.len() > usize::from(u16::MAX) {
        return Err(StoreError::InvalidKey {
            message: format!("key of {} bytes exceeds u16 length field", key.len()),
        });
    }

    let entry_length = 2 + key.len() + value.len() + ENTRY_CRC_SIZE;
    let mut buf = Vec::with_capacity(4 + entry_length);
    buf.extend_from_slice(&(entry_length as u32).to_le_bytes());
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    Ok(buf)
}

/// Decode the entry at `offset`, verifying its CRC.
///
/// Returns `None` at the end of written data (zero `entry_length` or
/// truncation), `Some(Ok((entry_end, key, value)))` for a valid entry.
#[allow(clippy::type_complexity)]
fn decode_entry(
    data: &[u8],
    offset: usize,
) -> Option<Result<(usize, Vec<u8>, Vec<u8>), StoreError>> {
    if offset + ENTRY_HEADER_SIZE > data.len() {
        return None;
    }

    let entry_length =
        u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
            as usize;
    if entry_length == 0 {
        return None; // End of written data (zero-filled region).
    }

    let entry_end = offset + 4 + entry_length;
    if entry_end > data.len() || entry_length < 2 + ENTRY_CRC_SIZE {
        return Some(Err(StoreError::InvalidEntryHeader {
            offset,
            message: "entry extends beyond segment data".to_string(),
        }));
    }

    let key_len = u16::from_le_bytes([data[offset + 4], data[offset + 5]]) as usize;
    let key_start = offset + ENTRY_HEADER_SIZE;
    let crc_start = entry_end - ENTRY_CRC_SIZE;
    if key_start + key_len > crc_start {
        return Some(Err(StoreError::InvalidEntryHeader {
            offset,
            message: "key length exceeds entry".to_string(),
        }));
    }

    let key = &data[key_start..key_start + key_len];
    let value = &data[key_start + key_len..crc_start];
    let stored_crc = u32::from_le_bytes([
        data[crc_start],
        data[crc_start + 1],
        data[crc_start + 2],
        data[crc_start + 3],
    ]);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Some(Err(StoreError::CorruptEntry {
            offset,
            expected_crc: stored_crc,
            actual_crc: computed_crc,
        }));
    }

    Some(Ok((entry_end, key.to_vec(), value.to_vec())))
}

/// Segment file name for a given start value.
fn segment_path(dir: &Path, start: u64) -> PathBuf {
    dir.join(format!("segment-{start:020}.log"))
}

/// The segment-naming prefix of a key: its first 8 bytes as big-endian u64.
fn segment_start_for_key(key: &[u8]) -> u64 {
    let mut prefix = [0u8; 8];
    let n = key.len().min(8);
    prefix[..n].copy_from_slice(&key[..n]);
    u64::from_be_bytes(prefix)
}

/// List all segment start values in the directory.
fn list_segments(dir: &Path) -> Result<Vec<u64>, StoreError> {
    let mut starts = Vec::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        // A log nobody has written yet reads as empty.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(starts),
        Err(e) => {
            return Err(StoreError::Io {
                message: e.to_string(),
                path: Some(dir.to_path_buf()),
            });
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| StoreError::Io {
            message: e.to_string(),
            path: Some(dir.to_path_buf()),
        })?;

        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if let Some(rest) = name_str.strip_prefix("segment-")
            && let Some(start_str) = rest.strip_suffix(".log")
            && let Ok(start) = start_str.parse::<u64>()
        {
            starts.push(start);
        }
    }

    Ok(starts)
}

/// Byte offset of the first zero `entry_length`, i.e. the end of written
/// data in a segment.
fn scan_write_position(data: &[u8]) -> usize {
    let mut offset = 0usize;
    while offset + 4 <= data.len() {
        let entry_length =
            u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
                as usize;
        if entry_length == 0 {
            break;
        }
        let entry_end = offset + 4 + entry_length;
        if entry_end > data.len() {
            break;
        }
        offset = entry_end;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmpdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap_or_else(|_| panic!("tempdir"))
    }

    #[test]
    fn test_append_assigns_monotone_ids() {
        let dir = tmpdir();
        let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        for i in 0..5 {
            let id = log.append(format!("value-{i}").as_bytes());
            assert!(id.is_ok());
            assert_eq!(id.unwrap_or(-1), i);
        }
        assert_eq!(log.last_id().unwrap_or(None), Some(4));
    }

    #[test]
    fn test_append_batch_assigns_contiguous_ids() {
        let dir = tmpdir();
        let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        assert!(log.append(b"first").is_ok());

        let values = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let ids = log.append_batch(&values);
        assert!(ids.is_ok());
        assert_eq!(ids.unwrap_or_default(), vec![1, 2, 3]);

        let stored: Vec<Vec<u8>> = log
            .iter_from(Some(1))
            .unwrap_or_else(|_| panic!("iter"))
            .filter_map(Result::ok)
            .map(|r| r.value)
            .collect();
        assert_eq!(stored, values);
    }

    #[test]
    fn test_iter_from_start_and_mid() {
        let dir = tmpdir();
        let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        for i in 0..10 {
            let appended = log.append(format!("v{i}").as_bytes());
            assert!(appended.is_ok());
        }

        let all: Vec<_> = log
            .iter_from(None)
            .unwrap_or_else(|_| panic!("iter"))
            .collect();
        assert_eq!(all.len(), 10);

        let tail: Vec<_> = log
            .iter_from(Some(6))
            .unwrap_or_else(|_| panic!("iter"))
            .filter_map(Result::ok)
            .collect();
        assert_eq!(tail.len(), 4);
        assert_eq!(tail[0].id, 6);
        assert_eq!(tail[0].value, b"v6");
    }

    #[test]
    fn test_iter_from_end_is_newest_first() {
        let dir = tmpdir();
        let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        for i in 0..4 {
            let appended = log.append(format!("v{i}").as_bytes());
            assert!(appended.is_ok());
        }
        let ids: Vec<i64> = log
            .iter_from_end()
            .unwrap_or_else(|_| panic!("iter"))
            .filter_map(Result::ok)
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_empty_log_reads_empty() {
        let dir = tmpdir();
        let log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        assert_eq!(log.last_id().unwrap_or(Some(9)), None);
        assert_eq!(
            log.iter_from(None)
                .unwrap_or_else(|_| panic!("iter"))
                .count(),
            0
        );
    }

    #[test]
    fn test_segment_rotation_preserves_entries() {
        let dir = tmpdir();
        let mut log = SegmentLog::open_with_segment_size(dir.path(), 256)
            .unwrap_or_else(|_| panic!("open"));
        for i in 0..20 {
            let appended = log.append(format!("value-{i:04}").as_bytes());
            assert!(appended.is_ok());
        }

        let segments = list_segments(dir.path()).unwrap_or_default();
        assert!(segments.len() > 1, "expected rotation, got {segments:?}");

        let ids: Vec<i64> = log
            .iter_from(None)
            .unwrap_or_else(|_| panic!("iter"))
            .filter_map(Result::ok)
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, (0..20).collect::<Vec<i64>>());
    }

    #[test]
    fn test_reopen_resumes_ids() {
        let dir = tmpdir();
        {
            let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
            for i in 0..5 {
                assert!(log.append(format!("v{i}").as_bytes()).is_ok());
            }
        }
        {
            let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("reopen"));
            let id = log.append(b"after-reopen");
            assert_eq!(id.unwrap_or(-1), 5);
            assert_eq!(
                log.iter_from(None)
                    .unwrap_or_else(|_| panic!("iter"))
                    .count(),
                6
            );
        }
    }

    #[test]
    fn test_secondary_sees_primary_appends() {
        let dir = tmpdir();
        let mut primary = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        assert!(primary.append(b"first").is_ok());

        let secondary = SegmentLog::open_secondary(dir.path()).unwrap_or_else(|_| panic!("sec"));
        assert_eq!(secondary.last_id().unwrap_or(None), Some(0));

        // New appends by the primary are visible without reopening.
        assert!(primary.append(b"second").is_ok());
        assert_eq!(secondary.last_id().unwrap_or(None), Some(1));
    }

    #[test]
    fn test_secondary_rejects_writes() {
        let dir = tmpdir();
        let mut secondary =
            SegmentLog::open_secondary(dir.path()).unwrap_or_else(|_| panic!("sec"));
        assert!(matches!(secondary.append(b"nope"), Err(StoreError::ReadOnly)));
    }

    #[test]
    fn test_secondary_of_missing_dir_reads_empty() {
        let dir = tmpdir();
        let missing = dir.path().join("never-created");
        let secondary = SegmentLog::open_secondary(&missing).unwrap_or_else(|_| panic!("sec"));
        assert_eq!(secondary.last_id().unwrap_or(Some(1)), None);
    }

    #[test]
    fn test_put_with_window_keys_and_reverse_scan() {
        let dir = tmpdir();
        let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
        for end in [1000u64, 2000, 3000] {
            let mut key = vec![0u8; 30];
            key[0..8].copy_from_slice(&end.to_be_bytes());
            assert!(WindowStore::put(&mut log, &key, b"agg").is_ok());
        }

        let newest_first: Vec<u64> = WindowStore::iter_rev(&log)
            .unwrap_or_else(|_| panic!("iter"))
            .filter_map(Result::ok)
            .map(|(key, _)| {
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&key[0..8]);
                u64::from_be_bytes(prefix)
            })
            .collect();
        assert_eq!(newest_first, vec![3000, 2000, 1000]);
    }

    #[test]
    fn test_verify_integrity_detects_corruption() {
        let dir = tmpdir();
        {
            let mut log = SegmentLog::open(dir.path()).unwrap_or_else(|_| panic!("open"));
            assert!(log.append(b"some payload bytes").is_ok());
            assert!(log.verify_integrity().is_ok());
        }

        let segments = list_segments(dir.path()).unwrap_or_default();
        assert!(!segments.is_empty());
        let seg_path = segment_path(dir.path(), segments[0]);
        let mut data = fs::read(&seg_path).unwrap_or_default();
        data[10] ^= 0xFF; // flip a key/payload byte
        fs::write(&seg_path, &data).unwrap_or_default();

        let log = SegmentLog::open_secondary(dir.path()).unwrap_or_else(|_| panic!("reopen"));
        let integrity = log.verify_integrity();
        assert!(integrity.is_err());
        let message = format!("{}", integrity.unwrap_err());
        assert!(message.contains("corrupt log entry"));
    }
}
