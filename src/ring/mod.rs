//! Lock-free single-producer/single-consumer ring buffer over shared memory.
//!
//! One ring buffer moves variable-length `(key, value)` records from a
//! worker process to the orchestrator with no locks, no atomic
//! read-modify-write instructions and no serialization beyond an 8-byte
//! frame header. It is backed by two named shared-memory segments owned by
//! the consumer:
//!
//! - a **data** region of `CAP + SLACK` bytes, where `CAP` is a power of two
//!   and the slack absorbs the one record that may spill past `CAP` before
//!   the write position wraps to 0;
//! - an **index** region of 24 bytes holding two redundant copies of
//!   `[u32 r_from][i32 end_marker][u32 w_to]`.
//!
//! Concurrency contract: exactly one producer writes `w_to`/`end_marker`,
//! exactly one consumer writes `r_from` (and the `end_marker` reset). Each
//! side stores its fields to *both* index halves; a reader retries until
//! both halves agree, which filters out torn snapshots regardless of store
//! order. See [`index`] for the field semantics.

mod buffer;
mod error;
mod index;
mod shm;

pub use buffer::{DATA_SLACK, DEFAULT_CAP, FRAME_HEADER_SIZE, Ring, RingAddr};
pub use error::RingError;
pub use index::{INDEX_SIZE, IndexBlock};
pub use shm::{ShmSegment, ShutdownFlag, segment_path};
