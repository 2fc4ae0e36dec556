//! Framed ring queue over a shared-memory region.
//!
//! Layout: a 12-byte header `{ size, read, write }` followed by `size` bytes
//! of circular payload. `read == write` means empty, so one byte is always
//! sacrificed and the usable capacity is `size - 1`. Each side mutates only
//! its own index: the host writes `write` on the outbound queue and `read` on
//! the inbound queue, the firmware does the opposite.

use crate::error::{MuonError, Result};
use crate::shm::SharedRegion;
use muon_proto::QUEUE_SENTINEL_INDEX;

const OFFSET_SIZE: usize = 0;
const OFFSET_READ: usize = 4;
const OFFSET_WRITE: usize = 8;
const HEADER_LEN: usize = 12;

/// Outcome of a non-erroring read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// All requested bytes were copied and `read` advanced.
    Ok,
    /// The queue held no bytes at all; `read` untouched. This is the normal
    /// "drained" signal, not an error.
    Empty,
    /// The queue held some bytes but fewer than requested; `read` untouched.
    /// Recovery policy is to reset the queue.
    Truncated,
}

/// One direction of the mailbox: a ring buffer in shared memory.
#[derive(Debug)]
pub struct RingQueue {
    region: SharedRegion,
}

impl RingQueue {
    /// Wrap a shared region holding a queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the region cannot hold the header plus at
    /// least one payload byte.
    pub fn new(region: SharedRegion) -> Result<Self> {
        if region.len() <= HEADER_LEN {
            return Err(MuonError::invalid_argument(format!(
                "queue region too small: {} bytes",
                region.len()
            )));
        }
        Ok(Self { region })
    }

    /// Initialize the header for a host-owned queue of `size` payload bytes.
    /// Used by tests and rigs; on hardware the firmware initializes headers
    /// during boot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `size` does not fit the backing region.
    pub fn init_empty(&self, size: u32) -> Result<()> {
        if HEADER_LEN + size as usize > self.region.len() {
            return Err(MuonError::invalid_argument(format!(
                "queue size {size} exceeds region"
            )));
        }
        self.region.write_u32(OFFSET_SIZE, size);
        self.region.write_u32(OFFSET_READ, 0);
        self.region.write_u32(OFFSET_WRITE, 0);
        Ok(())
    }

    /// Write the pre-reset sentinel header. The firmware replaces it while
    /// booting, which is how [`Self::firmware_ready`] detects completion.
    pub fn prepare_sentinel(&self) {
        self.region.write_u32(OFFSET_SIZE, 0);
        self.region.write_u32(OFFSET_READ, QUEUE_SENTINEL_INDEX);
        self.region.write_u32(OFFSET_WRITE, QUEUE_SENTINEL_INDEX);
    }

    /// Whether the firmware has published a valid header since the sentinel
    /// was written.
    pub fn firmware_ready(&self) -> bool {
        let size = self.region.read_u32_acquire(OFFSET_SIZE);
        let read = self.region.read_u32_acquire(OFFSET_READ);
        let write = self.region.read_u32_acquire(OFFSET_WRITE);
        size != 0 && read != QUEUE_SENTINEL_INDEX && write != QUEUE_SENTINEL_INDEX
    }

    fn size(&self) -> u32 {
        self.region.read_u32_acquire(OFFSET_SIZE)
    }

    /// Total usable capacity in bytes (`size - 1`).
    pub fn capacity(&self) -> usize {
        (self.size().saturating_sub(1)) as usize
    }

    /// Bytes currently readable.
    pub fn available(&self) -> usize {
        let size = self.size();
        if size == 0 {
            return 0;
        }
        let read = self.region.read_u32_acquire(OFFSET_READ);
        let write = self.region.read_u32_acquire(OFFSET_WRITE);
        let mut avail = write.wrapping_sub(read);
        if read > write {
            avail = avail.wrapping_add(size);
        }
        (avail % size) as usize
    }

    /// Bytes currently writable.
    pub fn free(&self) -> usize {
        self.capacity().saturating_sub(self.available())
    }

    /// Copy `dst.len()` bytes out of the queue.
    ///
    /// All-or-nothing with respect to `read`: on [`ReadOutcome::Empty`] and
    /// [`ReadOutcome::Truncated`] the index is untouched.
    pub fn read_bytes(&self, dst: &mut [u8]) -> ReadOutcome {
        if dst.is_empty() {
            return ReadOutcome::Ok;
        }

        let available = self.available();
        if available == 0 {
            return ReadOutcome::Empty;
        }
        if dst.len() > available {
            return ReadOutcome::Truncated;
        }

        let size = self.size() as usize;
        let mut rpos = self.region.read_u32_acquire(OFFSET_READ) as usize;
        for byte in dst.iter_mut() {
            *byte = self.region.read_u8(HEADER_LEN + rpos);
            rpos = (rpos + 1) % size;
        }

        #[allow(clippy::cast_possible_truncation)]
        self.region.write_u32_release(OFFSET_READ, rpos as u32);
        ReadOutcome::Ok
    }

    /// Copy a gather list into the queue, all bytes or none.
    ///
    /// # Errors
    ///
    /// Returns `NoSpace` when the vectors do not fit in the free space.
    pub fn write_vectored(&self, vectors: &[&[u8]]) -> Result<()> {
        let needed: usize = vectors.iter().map(|v| v.len()).sum();
        let free = self.free();
        if needed > free {
            return Err(MuonError::NoSpace { needed, free });
        }

        let size = self.size() as usize;
        let mut wpos = self.region.read_u32_acquire(OFFSET_WRITE) as usize;
        for vector in vectors {
            for &byte in *vector {
                self.region.write_u8(HEADER_LEN + wpos, byte);
                wpos = (wpos + 1) % size;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        self.region.write_u32_release(OFFSET_WRITE, wpos as u32);
        Ok(())
    }

    /// Discard everything pending by advancing `read` to `write`.
    pub fn reset(&self) {
        let write = self.region.read_u32_acquire(OFFSET_WRITE);
        self.region.write_u32_release(OFFSET_READ, write);
    }
}
