//! DMA-mapped data buffers exposed to user space as handles.
//!
//! A buffer is a fixed-capacity region allocated from the device-visible
//! memory pool plus a movable `(offset, size)` window describing where the
//! valid data lives. Networks and inferences hold `Arc` references; the
//! region is released when the last reference drops.

use crate::error::{MuonError, Result};
use muon_proto::CoreBuffer;
use std::sync::{Mutex, PoisonError};

/// A chunk of device-visible memory: host virtual pointer plus the DMA
/// address the firmware uses to reach the same bytes.
pub struct DmaRegion {
    ptr: *mut u8,
    dma_addr: u32,
    size: usize,
    release: Option<Box<dyn FnOnce(*mut u8, usize) + Send>>,
}

impl std::fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("dma_addr", &format_args!("{:#x}", self.dma_addr))
            .field("size", &self.size)
            .finish()
    }
}

// SAFETY: Send - the region exclusively owns its memory; the release hook is
// itself Send. The raw pointer is only dereferenced through the accessors.
unsafe impl Send for DmaRegion {}

// SAFETY: Sync - the region hands out the pointer and constants only; all
// mutation of the pointee is the caller's concern under the buffer window
// contract (host owns IFM until send, OFM after response).
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Build a region from its parts. `release` runs exactly once when the
    /// region drops.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes until
    /// `release` is invoked, and `dma_addr` must be the device-visible
    /// address of the same bytes.
    pub unsafe fn from_parts(
        ptr: *mut u8,
        dma_addr: u32,
        size: usize,
        release: impl FnOnce(*mut u8, usize) + Send + 'static,
    ) -> Self {
        Self {
            ptr,
            dma_addr,
            size,
            release: Some(Box::new(release)),
        }
    }

    /// Host-side pointer to the first byte.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Device-visible address of the first byte.
    pub const fn dma_addr(&self) -> u32 {
        self.dma_addr
    }

    /// Region size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.ptr, self.size);
        }
    }
}

/// Source of DMA-capable memory. Backed by the platform's reserved-memory
/// carveout in deployment; tests use [`HeapAllocator`].
pub trait Allocator: Send + Sync {
    /// Allocate `size` bytes of device-visible memory.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` when the pool cannot satisfy the request.
    fn alloc(&self, size: usize) -> Result<DmaRegion>;
}

/// Heap-backed allocator assigning fake DMA addresses. For tests and the
/// loopback firmware rig, where "DMA address" only needs to be a stable key.
#[derive(Debug)]
pub struct HeapAllocator {
    next_addr: Mutex<u32>,
}

/// First fake DMA address handed out by [`HeapAllocator`].
pub const HEAP_DMA_BASE: u32 = 0x6000_0000;

impl Default for HeapAllocator {
    fn default() -> Self {
        Self {
            next_addr: Mutex::new(HEAP_DMA_BASE),
        }
    }
}

impl Allocator for HeapAllocator {
    fn alloc(&self, size: usize) -> Result<DmaRegion> {
        let span = u32::try_from(size.max(1))
            .map_err(|_| MuonError::resource_exhausted("dma address space"))?;

        let mut next = self
            .next_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let dma_addr = *next;
        *next = span
            .checked_next_multiple_of(64)
            .and_then(|s| next.checked_add(s))
            .ok_or_else(|| MuonError::resource_exhausted("dma address space"))?;
        drop(next);

        let storage = vec![0u8; size.max(1)].into_boxed_slice();
        let len = storage.len();
        let ptr = Box::into_raw(storage).cast::<u8>();

        // SAFETY: ptr/len come from the boxed slice leaked above; the release
        // hook reconstructs and drops the same allocation exactly once.
        Ok(unsafe {
            DmaRegion::from_parts(ptr, dma_addr, len, move |ptr, len| {
                let slice = std::ptr::slice_from_raw_parts_mut(ptr, len);
                drop(Box::from_raw(slice));
            })
        })
    }
}

/// The data window within a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    /// Offset of the first valid byte.
    pub offset: u32,
    /// Number of valid bytes.
    pub size: u32,
}

/// Fixed-capacity DMA buffer with a movable data window.
#[derive(Debug)]
pub struct Buffer {
    region: DmaRegion,
    capacity: u32,
    window: Mutex<Window>,
}

impl Buffer {
    /// Allocate a buffer of `capacity` bytes. The window starts empty at
    /// offset zero.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero capacity and propagates allocator
    /// refusal.
    pub fn new(allocator: &dyn Allocator, capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(MuonError::invalid_argument("buffer capacity is zero"));
        }
        let region = allocator.alloc(capacity as usize)?;
        tracing::debug!(
            "Buffer create. capacity={capacity}, dma={:#x}",
            region.dma_addr()
        );
        Ok(Self {
            region,
            capacity,
            window: Mutex::new(Window::default()),
        })
    }

    /// Buffer capacity in bytes.
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Set the data window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless `offset + size <= capacity`.
    pub fn set_window(&self, offset: u32, size: u32) -> Result<()> {
        let end = u64::from(offset) + u64::from(size);
        if end > u64::from(self.capacity) {
            return Err(MuonError::invalid_argument(format!(
                "window {offset}+{size} exceeds capacity {}",
                self.capacity
            )));
        }
        *self.lock_window() = Window { offset, size };
        Ok(())
    }

    /// Current data window.
    pub fn window(&self) -> Window {
        *self.lock_window()
    }

    /// Grow the window by `additional` bytes produced at its end. Used when
    /// an inference response reports how much OFM data was written.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the grown window would exceed capacity.
    pub(crate) fn extend(&self, additional: u32) -> Result<()> {
        let mut window = self.lock_window();
        let end = u64::from(window.offset) + u64::from(window.size) + u64::from(additional);
        if end > u64::from(self.capacity) {
            return Err(MuonError::invalid_argument(format!(
                "response data {additional} overflows capacity {}",
                self.capacity
            )));
        }
        window.size += additional;
        Ok(())
    }

    /// Host pointer to the first byte of the window.
    pub fn data_ptr(&self) -> *mut u8 {
        let window = self.lock_window();
        // SAFETY: window invariant keeps offset within the region.
        unsafe { self.region.as_ptr().add(window.offset as usize) }
    }

    /// Run `f` over the window's bytes.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the firmware is not writing the window
    /// concurrently (the buffer hand-off contract).
    pub unsafe fn with_window_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let window = self.lock_window();
        let slice = std::slice::from_raw_parts(
            self.region.as_ptr().add(window.offset as usize),
            window.size as usize,
        );
        f(slice)
    }

    /// Wire view of the window: `(dma + offset, size)`. Used for IFMs and
    /// buffer-backed models.
    pub(crate) fn wire_window(&self) -> CoreBuffer {
        let window = self.lock_window();
        CoreBuffer {
            ptr: self.region.dma_addr().wrapping_add(window.offset),
            size: window.size,
        }
    }

    /// Wire view of the space after the window: `(dma + offset + size,
    /// capacity - offset - size)`. Used for OFMs, which the firmware fills
    /// into the remaining capacity.
    pub(crate) fn wire_remaining(&self) -> CoreBuffer {
        let window = self.lock_window();
        CoreBuffer {
            ptr: self
                .region
                .dma_addr()
                .wrapping_add(window.offset)
                .wrapping_add(window.size),
            size: self.capacity - window.offset - window.size,
        }
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
