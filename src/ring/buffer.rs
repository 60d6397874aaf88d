//! The ring buffer proper: framing, write/read and the wrap protocol.

use super::error::RingError;
use super::index::{INDEX_SIZE, IndexBlock};
use super::shm::ShmSegment;
use std::ptr;

/// Default data capacity: 4 MiB, roughly ten thousand trade windows.
pub const DEFAULT_CAP: u32 = 1 << 22;

/// Extra bytes past `CAP` absorbing the one record that spills over the
/// capacity boundary before the lap resets to 0. Four filesystem pages.
pub const DATA_SLACK: usize = (1 << 12) * 4;

/// Frame header size: `[u32 key_len][u32 value_len]`, little-endian.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Names and geometry a producer needs to attach to a consumer's ring.
#[derive(Debug, Clone)]
pub struct RingAddr {
    /// Name of the data segment.
    pub data_name: String,
    /// Name of the index segment.
    pub index_name: String,
    /// Data capacity in bytes (power of two).
    pub cap: u32,
}

enum Backing {
    /// Shared-memory segments; the creating side also owns unlinking.
    Shm {
        data: ShmSegment,
        index: ShmSegment,
    },
    /// Process-local heap memory for tests and benches.
    Heap {
        data: *mut u8,
        data_len: usize,
        index: *mut IndexBlock,
    },
}

/// A single-producer/single-consumer byte ring over `(key, value)` records.
///
/// Each record is framed as `[u32 key_len][u32 value_len][key][value]`
/// (little-endian) and placed contiguously at the current write offset; a
/// frame that crosses `CAP` runs into the slack region and the next write
/// restarts at offset 0.
///
/// One `Ring` value is a *view*: the producer process attaches one, the
/// consumer process owns another over the same two segments. The SPSC
/// contract is per ring buffer, not per view — exactly one thread anywhere
/// may call [`write`](Ring::write) and exactly one may call
/// [`read`](Ring::read).
pub struct Ring {
    backing: Backing,
    cap: u32,
    mask: u32,
}

// SAFETY: All mutation goes through raw pointers into the mapped regions
// under the documented single-producer/single-consumer protocol; the index
// block is atomics only.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create the consumer-side ring, allocating both shared-memory
    /// segments with freshly generated names.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidCapacity`] unless `cap` is a power of
    /// two, or [`RingError::Io`] if the segments cannot be created.
    pub fn create(cap: u32) -> Result<(Self, RingAddr), RingError> {
        if !cap.is_power_of_two() {
            return Err(RingError::InvalidCapacity { capacity: cap });
        }

        let data_name = format!("tickwindow-{}-data", uuid::Uuid::new_v4());
        let index_name = format!("tickwindow-{}-index", uuid::Uuid::new_v4());

        let data = ShmSegment::create(&data_name, cap as usize + DATA_SLACK)?;
        let index = ShmSegment::create(&index_name, INDEX_SIZE)?;

        let addr = RingAddr {
            data_name,
            index_name,
            cap,
        };

        Ok((
            Self {
                backing: Backing::Shm { data, index },
                cap,
                mask: cap - 1,
            },
            addr,
        ))
    }

    /// Attach the producer-side ring to existing segments.
    ///
    /// # Errors
    ///
    /// Returns [`RingError`] if the segments are missing, undersized, or
    /// the capacity is not a power of two.
    pub fn attach(addr: &RingAddr) -> Result<Self, RingError> {
        if !addr.cap.is_power_of_two() {
            return Err(RingError::InvalidCapacity { capacity: addr.cap });
        }

        let data = ShmSegment::attach(&addr.data_name)?;
        let index = ShmSegment::attach(&addr.index_name)?;

        if data.len() < addr.cap as usize + DATA_SLACK {
            return Err(RingError::SegmentTooSmall {
                path: super::shm::segment_path(&addr.data_name),
                expected: addr.cap as usize + DATA_SLACK,
                got: data.len(),
            });
        }
        if index.len() < INDEX_SIZE {
            return Err(RingError::SegmentTooSmall {
                path: super::shm::segment_path(&addr.index_name),
                expected: INDEX_SIZE,
                got: index.len(),
            });
        }

        Ok(Self {
            backing: Backing::Shm { data, index },
            cap: addr.cap,
            mask: addr.cap - 1,
        })
    }

    /// Create a process-local ring over heap memory (tests and benches).
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidCapacity`] unless `cap` is a power of
    /// two.
    pub fn in_memory(cap: u32) -> Result<Self, RingError> {
        if !cap.is_power_of_two() {
            return Err(RingError::InvalidCapacity { capacity: cap });
        }

        let data_len = cap as usize + DATA_SLACK;
        let data = Box::into_raw(vec![0u8; data_len].into_boxed_slice()).cast::<u8>();
        let index = Box::into_raw(Box::new(IndexBlock::new()));

        Ok(Self {
            backing: Backing::Heap {
                data,
                data_len,
                index,
            },
            cap,
            mask: cap - 1,
        })
    }

    fn data_ptr(&self) -> *mut u8 {
        match &self.backing {
            Backing::Shm { data, .. } => data.as_mut_ptr(),
            Backing::Heap { data, .. } => *data,
        }
    }

    fn data_len(&self) -> usize {
        match &self.backing {
            Backing::Shm { data, .. } => data.len(),
            Backing::Heap { data_len, .. } => *data_len,
        }
    }

    fn index(&self) -> &IndexBlock {
        match &self.backing {
            // SAFETY: The index segment is at least INDEX_SIZE bytes and
            // page-aligned; all peers access it through IndexBlock.
            Backing::Shm { index, .. } => unsafe { IndexBlock::from_ptr(index.as_mut_ptr()) },
            // SAFETY: Heap pointer from Box::into_raw, freed in Drop.
            Backing::Heap { index, .. } => unsafe { &**index },
        }
    }

    /// The data capacity in bytes.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.cap
    }

    /// Unlink the backing shared-memory files (no-op for heap rings).
    /// Attached peers keep their mappings until they drop them.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if a segment file cannot be removed.
    pub fn unlink(&self) -> Result<(), RingError> {
        if let Backing::Shm { data, index } = &self.backing {
            data.unlink()?;
            index.unlink()?;
        }
        Ok(())
    }

    /// A consistent snapshot of `(r_from, end_marker, w_to)`.
    #[must_use]
    pub fn index_snapshot(&self) -> (u32, i32, u32) {
        self.index().read()
    }

    /// True when the ring holds no unread records.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let (r_from, end_marker, w_to) = self.index().read();
        r_from == w_to && (end_marker == -1 || end_marker == 0)
    }

    /// Try to enqueue one record. Returns `false` without side effects when
    /// the record does not fit in front of the reader; the producer backs
    /// off and retries.
    pub fn write(&self, key: &[u8], value: &[u8]) -> bool {
        let index = self.index();
        let (r_from, end_marker, w_to) = index.read();

        // The writer is ahead of the reader in wrapped position: it may not
        // catch up to bytes the reader has not consumed.
        if end_marker > 0 && w_to >= r_from {
            return false;
        }

        let frame_len = FRAME_HEADER_SIZE + key.len() + value.len();
        let w_new = w_to as usize + frame_len;

        if end_marker > 0 && w_new > r_from as usize {
            return false;
        }
        if w_new > self.data_len() {
            // Spills past the slack region; only possible for a record
            // larger than the slack, which the framing layer never emits.
            tracing::warn!(frame_len, "record too large for ring slack, rejecting");
            return false;
        }

        // SAFETY: [w_to, w_new) lies inside the data region (checked above)
        // and, per the protocol, contains only bytes the reader has already
        // consumed or never seen.
        unsafe {
            let base = self.data_ptr().add(w_to as usize);
            ptr::copy_nonoverlapping((key.len() as u32).to_le_bytes().as_ptr(), base, 4);
            ptr::copy_nonoverlapping((value.len() as u32).to_le_bytes().as_ptr(), base.add(4), 4);
            ptr::copy_nonoverlapping(key.as_ptr(), base.add(FRAME_HEADER_SIZE), key.len());
            ptr::copy_nonoverlapping(
                value.as_ptr(),
                base.add(FRAME_HEADER_SIZE + key.len()),
                value.len(),
            );
        }

        let w_masked = (w_new as u32) & self.mask;
        let marker = if w_new as u32 > w_masked {
            Some(w_new as i32)
        } else {
            None
        };
        index.publish_write(w_masked, marker);

        true
    }

    /// Try to dequeue one record. Returns `None` when the ring is empty;
    /// the consumer yields and retries.
    #[must_use]
    pub fn read(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let index = self.index();
        let (r_from, end_marker, w_to) = index.read();

        if r_from == w_to && (end_marker == -1 || end_marker == 0) {
            return None;
        }

        let data_len = self.data_len();
        let header_end = r_from as usize + FRAME_HEADER_SIZE;
        if header_end > data_len {
            tracing::error!(r_from, "frame header out of bounds, ring corrupt");
            return None;
        }

        // SAFETY: The producer published w_to/end_marker with release
        // stores after filling [r_from, r_from + frame), so these bytes are
        // stable until we advance r_from.
        let (key, value, frame_len) = unsafe {
            let base = self.data_ptr().add(r_from as usize);
            let mut len_buf = [0u8; 4];
            ptr::copy_nonoverlapping(base, len_buf.as_mut_ptr(), 4);
            let key_len = u32::from_le_bytes(len_buf) as usize;
            ptr::copy_nonoverlapping(base.add(4), len_buf.as_mut_ptr(), 4);
            let value_len = u32::from_le_bytes(len_buf) as usize;

            let frame_len = FRAME_HEADER_SIZE + key_len + value_len;
            if r_from as usize + frame_len > data_len {
                tracing::error!(r_from, key_len, value_len, "frame out of bounds, ring corrupt");
                return None;
            }

            let mut key = vec![0u8; key_len];
            let mut value = vec![0u8; value_len];
            ptr::copy_nonoverlapping(base.add(FRAME_HEADER_SIZE), key.as_mut_ptr(), key_len);
            ptr::copy_nonoverlapping(
                base.add(FRAME_HEADER_SIZE + key_len),
                value.as_mut_ptr(),
                value_len,
            );
            (key, value, frame_len)
        };

        let next = r_from as usize + frame_len;
        let next_masked = (next as u32) & self.mask;
        // Advancing to or past the lap boundary means the reader observed
        // the wrap.
        index.publish_read(next_masked, r_from >= next_masked);

        Some((key, value))
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if let Backing::Heap {
            data,
            data_len,
            index,
        } = &self.backing
        {
            // SAFETY: Pointers came from Box::into_raw in `in_memory` and
            // are dropped exactly once.
            unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(*data, *data_len)));
                drop(Box::from_raw(*index));
            }
        }
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (r, m, w) = self.index_snapshot();
        f.debug_struct("Ring")
            .field("cap", &self.cap)
            .field("r_from", &r)
            .field("end_marker", &m)
            .field("w_to", &w)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring64() -> Ring {
        Ring::in_memory(64).unwrap_or_else(|_| panic!("ring"))
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(matches!(
            Ring::in_memory(100),
            Err(RingError::InvalidCapacity { capacity: 100 })
        ));
    }

    #[test]
    fn test_read_from_empty() {
        let ring = ring64();
        assert!(ring.read().is_none());
        assert!(ring.is_drained());
        assert_eq!(ring.index_snapshot(), (0, 0, 0));
    }

    // The seed scenario: fill a CAP=64 ring exactly, observe the wrap
    // marker, drain, then straddle the boundary with spilling records.
    #[test]
    fn test_seed_scenario_cap_64() {
        let ring = ring64();

        // Two 32-byte frames fill the ring exactly.
        assert!(ring.write(b"12345678", b"1234567812345678"));
        assert_eq!(ring.index_snapshot(), (0, 0, 32));

        assert!(ring.write(b"abcdefgh", b"abcdefghabcdefgh"));
        assert_eq!(ring.index_snapshot(), (0, 64, 0));

        // Full: any further write is rejected without mutating the index.
        assert!(!ring.write(b"ijklmnop", b"ijklmnopijop"));
        assert_eq!(ring.index_snapshot(), (0, 64, 0));

        // Drain in FIFO order; the second read observes the wrap.
        let first = ring.read();
        assert_eq!(
            first,
            Some((b"12345678".to_vec(), b"1234567812345678".to_vec()))
        );
        assert_eq!(ring.index_snapshot(), (32, 64, 0));

        let second = ring.read();
        assert_eq!(
            second,
            Some((b"abcdefgh".to_vec(), b"abcdefghabcdefgh".to_vec()))
        );
        assert_eq!(ring.index_snapshot(), (0, -1, 0));

        assert!(ring.read().is_none());
        assert_eq!(ring.index_snapshot(), (0, -1, 0));

        // Two 40-byte frames; the second spills past CAP into the slack and
        // wraps the write position to 80 & 63 = 16.
        assert!(ring.write(b"aaaaaaaa", b"bbbbbbbbbbbbbbbbbbbbbbbb"));
        assert_eq!(ring.index_snapshot(), (0, -1, 40));

        assert!(ring.write(b"cccccccc", b"dddddddddddddddddddddddd"));
        assert_eq!(ring.index_snapshot(), (0, 80, 16));

        // A 25-byte frame would cross the reader at 0.
        assert!(!ring.write(b"x", b"y"));
        assert_eq!(ring.index_snapshot(), (0, 80, 16));
    }

    #[test]
    fn test_write_up_to_reader_boundary() {
        let ring = ring64();
        assert!(ring.write(b"12345678", b"1234567812345678"));
        assert!(ring.write(b"abcdefgh", b"abcdefghabcdefgh"));
        assert!(ring.read().is_some()); // r_from = 32
        assert!(ring.read().is_some()); // r_from = 0, marker = -1

        assert!(ring.write(b"aaaaaaaa", b"bbbbbbbbbbbbbbbbbbbbbbbb"));
        assert!(ring.write(b"cccccccc", b"dddddddddddddddddddddddd"));
        assert!(ring.read().is_some()); // r_from = 40
        assert_eq!(ring.index_snapshot(), (40, 80, 16));

        // 25 bytes would advance to 41, one byte past the reader: rejected.
        assert!(!ring.write(b"88888888", b"88888888 "));
        assert_eq!(ring.index_snapshot(), (40, 80, 16));

        // 24 bytes lands exactly on the reader offset: allowed.
        assert!(ring.write(b"88888888", b"88888888"));
        assert_eq!(ring.index_snapshot(), (40, 80, 40));

        // And now the ring is full again.
        assert!(!ring.write(b"88888888", b"88888888"));
        assert_eq!(ring.index_snapshot(), (40, 80, 40));

        // Drain everything.
        assert!(ring.read().is_some());
        assert_eq!(ring.index_snapshot(), (16, -1, 40));
        assert!(ring.read().is_some());
        assert_eq!(ring.index_snapshot(), (40, -1, 40));
        assert!(ring.read().is_none());

        // One large frame spilling deep into the slack region.
        let key = b"8888888 8888888 8888888 ";
        let value = b"88888888 8888888 8888888 ";
        assert!(ring.write(key, value));
        assert_eq!(ring.index_snapshot(), (40, 97, 33));
        assert_eq!(ring.read(), Some((key.to_vec(), value.to_vec())));
        assert_eq!(ring.index_snapshot(), (33, -1, 33));
    }

    #[test]
    fn test_fifo_order_preserved() {
        let ring = Ring::in_memory(1024).unwrap_or_else(|_| panic!("ring"));
        let mut expected = Vec::new();
        for i in 0..10u32 {
            let key = format!("key-{i:04}");
            let value = format!("value-{i}");
            assert!(ring.write(key.as_bytes(), value.as_bytes()));
            expected.push((key.into_bytes(), value.into_bytes()));
        }
        for want in expected {
            assert_eq!(ring.read(), Some(want));
        }
        assert!(ring.read().is_none());
    }

    #[test]
    fn test_empty_key_and_value() {
        let ring = ring64();
        assert!(ring.write(b"", b""));
        assert_eq!(ring.read(), Some((Vec::new(), Vec::new())));
    }
}
