//! Shared-memory regions visible to both the host and the firmware.
//!
//! The queue pair lives in memory the firmware also writes, so every access
//! goes through volatile reads and writes. Index fields published by the
//! other side are read with acquire semantics and our own index updates are
//! published with release semantics; the byte payload between them needs no
//! ordering of its own.

use crate::error::{MuonError, Result};
use std::fs::File;
use std::os::unix::io::AsFd;
use std::sync::atomic::{fence, Ordering};

/// A region of memory shared with the firmware.
///
/// Backed either by a mapping of the device's queue window (deployment) or by
/// a plain heap allocation (tests and the loopback rig).
pub struct SharedRegion {
    ptr: *mut u8,
    len: usize,
    backing: Backing,
}

enum Backing {
    /// mmap'd device memory, unmapped on drop.
    Mapped,
    /// Heap allocation owned by this region, word-typed so the base address
    /// satisfies the 4-byte alignment the header accessors need.
    Owned(#[allow(dead_code)] Box<[u32]>),
    /// Borrowed from elsewhere; the creator guarantees the lifetime.
    Raw,
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &self.len)
            .finish()
    }
}

// SAFETY: Send - the region owns (or borrows for its full lifetime) the
// memory it points at; moving the handle between threads does not invalidate
// the mapping. No thread-local state.
unsafe impl Send for SharedRegion {}

// SAFETY: Sync - all accessors are volatile and bounds-checked. Races with
// the firmware are inherent to the medium and handled by the queue protocol,
// not by the region.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Map `len` bytes of a device memory file at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping fails.
    pub fn map_file(file: &File, offset: u64, len: usize) -> Result<Self> {
        // SAFETY: mmap of a caller-provided device file. The kernel either
        // returns a valid mapping of `len` bytes or an error; the mapping is
        // released in Drop.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                rustix::mm::ProtFlags::READ | rustix::mm::ProtFlags::WRITE,
                rustix::mm::MapFlags::SHARED,
                file.as_fd(),
                offset,
            )
            .map_err(|e| MuonError::resource_exhausted(format!("queue mapping failed: {e}")))?
        };

        tracing::debug!("Mapped queue region at {:p}, len={:#x}", ptr, len);

        Ok(Self {
            ptr: ptr.cast(),
            len,
            backing: Backing::Mapped,
        })
    }

    /// Allocate a zeroed heap-backed region. Used by tests and loopback rigs
    /// standing in for device memory.
    pub fn owned(len: usize) -> Self {
        let mut storage = vec![0u32; len.div_ceil(4)].into_boxed_slice();
        let ptr = storage.as_mut_ptr().cast::<u8>();
        Self {
            ptr,
            len,
            backing: Backing::Owned(storage),
        }
    }

    /// Wrap an externally managed region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for the whole
    /// lifetime of the returned region, and must not be deallocated or
    /// aliased mutably by other host code while the region exists.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Self {
        Self {
            ptr,
            len,
            backing: Backing::Raw,
        }
    }

    /// Region length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Volatile-read one byte.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the region.
    pub fn read_u8(&self, offset: usize) -> u8 {
        assert!(offset < self.len, "shared region read out of bounds");
        // SAFETY: ptr is valid for len bytes; offset checked above.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset)) }
    }

    /// Volatile-write one byte.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the region.
    pub fn write_u8(&self, offset: usize, value: u8) {
        assert!(offset < self.len, "shared region write out of bounds");
        // SAFETY: ptr is valid for len bytes; offset checked above.
        unsafe { std::ptr::write_volatile(self.ptr.add(offset), value) };
    }

    /// Volatile-read a 32-bit word.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the region.
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.len, "shared region read out of bounds");
        debug_assert!(offset % 4 == 0, "unaligned word read");
        // SAFETY: ptr is valid for len bytes; offset+4 checked above. Queue
        // header words are 4-byte aligned by layout.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    /// Volatile-write a 32-bit word.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the region.
    pub fn write_u32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.len, "shared region write out of bounds");
        debug_assert!(offset % 4 == 0, "unaligned word write");
        // SAFETY: ptr is valid for len bytes; offset+4 checked above.
        unsafe { std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value) };
    }

    /// Read a word the other side publishes, ordered before any subsequent
    /// payload reads.
    pub fn read_u32_acquire(&self, offset: usize) -> u32 {
        let value = self.read_u32(offset);
        fence(Ordering::Acquire);
        value
    }

    /// Publish a word of our own, ordered after any preceding payload writes.
    pub fn write_u32_release(&self, offset: usize, value: u32) {
        fence(Ordering::Release);
        self.write_u32(offset, value);
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if matches!(self.backing, Backing::Mapped) {
            // SAFETY: ptr/len came from a successful mmap in map_file and
            // Drop runs at most once. Unmap failure is logged, not raised.
            if let Err(e) = unsafe { rustix::mm::munmap(self.ptr.cast(), self.len) } {
                tracing::warn!("Failed to unmap queue region: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_region_round_trips_bytes() {
        let region = SharedRegion::owned(64);
        assert_eq!(region.len(), 64);
        region.write_u8(0, 0xAA);
        region.write_u8(63, 0x55);
        assert_eq!(region.read_u8(0), 0xAA);
        assert_eq!(region.read_u8(63), 0x55);
    }

    #[test]
    fn word_access_is_little_endian_consistent() {
        let region = SharedRegion::owned(16);
        region.write_u32(4, 0xdead_beef);
        assert_eq!(region.read_u32(4), 0xdead_beef);
        assert_eq!(region.read_u32_acquire(4), 0xdead_beef);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_read_panics() {
        let region = SharedRegion::owned(8);
        let _ = region.read_u32(8);
    }
}
