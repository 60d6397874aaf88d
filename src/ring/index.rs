//! The duplicated ring-buffer index block and its torn-read detector.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Size of the index region in bytes: two 12-byte halves.
pub const INDEX_SIZE: usize = 24;

/// One half of the index: `[u32 r_from][i32 end_marker][u32 w_to]`.
#[repr(C)]
struct IndexHalf {
    r_from: AtomicU32,
    end_marker: AtomicI32,
    w_to: AtomicU32,
}

/// The 24-byte ring-buffer index: two redundant [`IndexHalf`] copies.
///
/// Field semantics:
///
/// - `r_from` — next byte offset the consumer will read. Written only by
///   the consumer.
/// - `end_marker` — `-1` once the reader has observed a wrap, `0` while the
///   writer has not wrapped in the current lap, or the pre-mask byte
///   position (`>= CAP`) at which the writer wrapped. Written by the
///   producer on wrap, reset to `-1` by the consumer.
/// - `w_to` — next byte offset the producer will write. Written only by the
///   producer.
///
/// No locks and no atomic RMWs: correctness rests on each scalar being
/// owned by a single side, on 32-bit aligned stores committing untorn, and
/// on the duplicated-half protocol. Writers store their owned fields to
/// both halves; [`read`](IndexBlock::read) retries until the halves agree,
/// so every returned triple was simultaneously present in both halves at
/// some instant.
#[repr(C)]
pub struct IndexBlock {
    halves: [IndexHalf; 2],
}

impl IndexBlock {
    /// A zeroed index: empty ring, no wrap yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            halves: [
                IndexHalf {
                    r_from: AtomicU32::new(0),
                    end_marker: AtomicI32::new(0),
                    w_to: AtomicU32::new(0),
                },
                IndexHalf {
                    r_from: AtomicU32::new(0),
                    end_marker: AtomicI32::new(0),
                    w_to: AtomicU32::new(0),
                },
            ],
        }
    }

    /// Reinterpret the start of a shared-memory mapping as an index block.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least [`INDEX_SIZE`] bytes of 4-byte aligned
    /// memory that outlives the returned reference, and every peer process
    /// must access the region exclusively through `IndexBlock`.
    #[must_use]
    pub unsafe fn from_ptr<'a>(ptr: *const u8) -> &'a Self {
        debug_assert!(ptr.addr().is_multiple_of(align_of::<Self>()));
        // SAFETY: Caller guarantees size, alignment and lifetime.
        unsafe { &*ptr.cast::<Self>() }
    }

    /// Read a consistent `(r_from, end_marker, w_to)` snapshot.
    ///
    /// Spins until both halves agree, which filters out snapshots taken
    /// while the peer was mid-update.
    #[must_use]
    pub fn read(&self) -> (u32, i32, u32) {
        loop {
            let r1 = self.halves[0].r_from.load(Ordering::Acquire);
            let m1 = self.halves[0].end_marker.load(Ordering::Acquire);
            let w1 = self.halves[0].w_to.load(Ordering::Acquire);
            let r2 = self.halves[1].r_from.load(Ordering::Acquire);
            let m2 = self.halves[1].end_marker.load(Ordering::Acquire);
            let w2 = self.halves[1].w_to.load(Ordering::Acquire);
            if r1 == r2 && m1 == m2 && w1 == w2 {
                return (r1, m1, w1);
            }
            std::hint::spin_loop();
        }
    }

    /// Consumer-side publish: advance `r_from`, optionally marking the wrap
    /// as observed. Touches only consumer-owned fields, in both halves.
    pub fn publish_read(&self, r_from: u32, reset_marker: bool) {
        for half in &self.halves {
            half.r_from.store(r_from, Ordering::Release);
            if reset_marker {
                half.end_marker.store(-1, Ordering::Release);
            }
        }
    }

    /// Producer-side publish: advance `w_to`, setting the wrap marker when
    /// the write crossed `CAP`. Touches only producer-owned fields, in both
    /// halves.
    pub fn publish_write(&self, w_to: u32, end_marker: Option<i32>) {
        for half in &self.halves {
            if let Some(marker) = end_marker {
                half.end_marker.store(marker, Ordering::Release);
            }
            half.w_to.store(w_to, Ordering::Release);
        }
    }
}

impl Default for IndexBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IndexBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (r, m, w) = self.read();
        f.debug_struct("IndexBlock")
            .field("r_from", &r)
            .field("end_marker", &m)
            .field("w_to", &w)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_24_bytes() {
        assert_eq!(size_of::<IndexBlock>(), INDEX_SIZE);
        assert_eq!(align_of::<IndexBlock>(), 4);
    }

    #[test]
    fn test_fresh_index_reads_zero() {
        let index = IndexBlock::new();
        assert_eq!(index.read(), (0, 0, 0));
    }

    #[test]
    fn test_publish_write_and_read_roundtrip() {
        let index = IndexBlock::new();
        index.publish_write(32, None);
        assert_eq!(index.read(), (0, 0, 32));

        index.publish_write(0, Some(64));
        assert_eq!(index.read(), (0, 64, 0));

        index.publish_read(32, false);
        assert_eq!(index.read(), (32, 64, 0));

        index.publish_read(0, true);
        assert_eq!(index.read(), (0, -1, 0));
    }

    #[test]
    fn test_read_rejects_disagreeing_halves() {
        let index = IndexBlock::new();
        // Tear one half by hand; a subsequent publish must restore agreement
        // before read() can return the new value.
        index.halves[0].w_to.store(99, Ordering::Release);
        index.publish_write(7, None);
        assert_eq!(index.read(), (0, 0, 7));
    }
}
