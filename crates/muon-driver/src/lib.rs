//! Host-side control stack for the Muon NPU.
//!
//! The NPU is driven by a firmware instance on a companion core; the host
//! talks to it over two shared-memory ring queues plus a doorbell. This
//! crate multiplexes user-space inference requests onto that single firmware
//! instance: framed transport, correlation-id registry, watchdog-driven
//! liveness with reset and replay, and refcounted buffer/network/inference
//! objects.
//!
//! # Architecture
//!
//! ```text
//! Device ── mutex ──┬── Mailbox (tx/rx ring queues, registry, doorbell)
//!                   ├── Watchdog (silence timer, reset-and-replay policy)
//!                   └── objects: Buffer ◀── Network ◀── Inference
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use muon_driver::prelude::*;
//! use std::sync::Arc;
//!
//! # struct Bell; impl muon_driver::Doorbell for Bell { fn notify(&self) {} }
//! # struct Rst; impl muon_driver::Reset for Rst {
//! #     fn assert_reset(&self) -> muon_driver::Result<()> { Ok(()) }
//! #     fn deassert(&self) -> muon_driver::Result<()> { Ok(()) }
//! # }
//! # fn queues() -> (muon_driver::RingQueue, muon_driver::RingQueue) { unimplemented!() }
//! # fn main() -> muon_driver::Result<()> {
//! let (tx, rx) = queues();
//! let device = Device::new(
//!     tx,
//!     rx,
//!     Arc::new(Bell),
//!     Box::new(Rst),
//!     Arc::new(HeapAllocator::default()),
//!     DeviceConfig::default(),
//! );
//!
//! let caps = device.capabilities()?;
//! println!("macs/cc: {}", caps.hw_cfg.macs_per_cc);
//!
//! let model = device.buffer_create(65536)?;
//! let network = device.network_create(NetworkCreate::Buffer(model))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

mod buffer;
mod cancel;
mod capabilities;
mod completion;
mod device;
mod error;
mod inference;
mod mailbox;
mod network;
mod network_info;
pub mod queue;
mod registry;
pub mod shm;
mod watchdog;

pub use buffer::{Allocator, Buffer, DmaRegion, HeapAllocator, Window, HEAP_DMA_BASE};
pub use capabilities::{DeviceCapabilities, DriverVersion, HardwareConfig, HardwareId};
pub use device::{
    Device, DeviceConfig, DeviceDiagnostics, InferenceArgs, InferenceHandle, NetworkCreate, Reset,
};
pub use error::{MuonError, Result};
pub use inference::{Inference, InferenceStatus, PmuConfig, WaitOutcome};
pub use mailbox::Doorbell;
pub use network::{Network, NetworkSource};
pub use network_info::NetworkInfo;
pub use queue::RingQueue;
pub use shm::SharedRegion;
pub use watchdog::Watchdog;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Buffer, Device, DeviceCapabilities, DeviceConfig, HeapAllocator, InferenceArgs,
        InferenceHandle, InferenceStatus, MuonError, Network, NetworkCreate, PmuConfig, Result,
        WaitOutcome,
    };
}
