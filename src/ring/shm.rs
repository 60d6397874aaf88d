//! Named shared-memory segments backed by memory-mapped files.
//!
//! Segments live in `/dev/shm` when available (plain page-cache files
//! elsewhere), so "shared memory" is an ordinary `mmap` of the same file in
//! both processes. The orchestrator creates and unlinks segments; workers
//! attach to existing ones by name.

use super::error::RingError;
use memmap2::MmapMut;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

/// Directory shared-memory segments are created in.
fn shm_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Full filesystem path of the segment with the given name.
#[must_use]
pub fn segment_path(name: &str) -> PathBuf {
    shm_dir().join(name)
}

/// One named, memory-mapped shared-memory segment.
pub struct ShmSegment {
    name: String,
    path: PathBuf,
    mmap: MmapMut,
}

impl ShmSegment {
    /// Create a new zero-filled segment of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the backing file cannot be created,
    /// sized or mapped.
    pub fn create(name: &str, len: usize) -> Result<Self, RingError> {
        let path = segment_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| RingError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?;

        file.set_len(len as u64).map_err(|e| RingError::Io {
            message: e.to_string(),
            path: Some(path.clone()),
        })?;

        // SAFETY: The file was just created with the requested length and is
        // only resized again by `unlink`, after every mapping is gone.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| RingError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?
        };

        Ok(Self {
            name: name.to_string(),
            path,
            mmap,
        })
    }

    /// Attach to an existing segment by name.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the file does not exist or cannot be
    /// mapped.
    pub fn attach(name: &str) -> Result<Self, RingError> {
        let path = segment_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| RingError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?;

        // SAFETY: The creating process sized the file before publishing its
        // name and never truncates it while attached peers exist.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| RingError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?
        };

        Ok(Self {
            name: name.to_string(),
            path,
            mmap,
        })
    }

    /// The segment's name (its file name inside the shm directory).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// True when the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Base pointer of the mapping.
    #[must_use]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr().cast_mut()
    }

    /// Remove the backing file. The mapping itself stays valid until drop;
    /// peers that are still attached keep their view.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the file cannot be removed.
    pub fn unlink(&self) -> Result<(), RingError> {
        fs::remove_file(&self.path).map_err(|e| RingError::Io {
            message: e.to_string(),
            path: Some(self.path.clone()),
        })
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("name", &self.name)
            .field("len", &self.mmap.len())
            .finish()
    }
}

/// Cooperative cross-process shutdown flag.
///
/// One byte of shared state: the orchestrator sets it once on
/// SIGINT/SIGTERM, workers poll it at every sleep and batch boundary. The
/// in-process variant backs tests and embedded (single-process) pipelines.
#[derive(Debug)]
pub enum ShutdownFlag {
    /// Flag byte inside a named shared-memory segment.
    Shared(ShmSegment),
    /// Plain in-process flag.
    Local(AtomicU8),
}

impl ShutdownFlag {
    /// Create a new shared flag segment (orchestrator side).
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the segment cannot be created.
    pub fn create(name: &str) -> Result<Self, RingError> {
        Ok(ShutdownFlag::Shared(ShmSegment::create(name, 1)?))
    }

    /// Attach to an existing shared flag segment (worker side).
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Io`] if the segment cannot be attached.
    pub fn attach(name: &str) -> Result<Self, RingError> {
        Ok(ShutdownFlag::Shared(ShmSegment::attach(name)?))
    }

    /// Create an in-process flag.
    #[must_use]
    pub fn local() -> Self {
        ShutdownFlag::Local(AtomicU8::new(0))
    }

    fn cell(&self) -> &AtomicU8 {
        match self {
            // SAFETY: The segment is at least one byte and AtomicU8 has the
            // layout and alignment of u8.
            ShutdownFlag::Shared(seg) => unsafe { &*seg.as_mut_ptr().cast::<AtomicU8>() },
            ShutdownFlag::Local(cell) => cell,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn set(&self) {
        self.cell().store(1, Ordering::Release);
    }

    /// True once shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.cell().load(Ordering::Acquire) != 0
    }

    /// The backing segment name, when shared.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            ShutdownFlag::Shared(seg) => Some(seg.name()),
            ShutdownFlag::Local(_) => None,
        }
    }
}
