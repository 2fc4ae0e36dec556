//! In-process fake firmware rig.
//!
//! Builds a device over heap-backed ring queues and hands the test the
//! firmware's ends of both. Tests drive the protocol by reading requests off
//! the host's outbound queue, writing scripted responses to the inbound one
//! and calling `Device::process_incoming` the way the doorbell shim would.

// Each test binary uses a different subset of the rig.
#![allow(dead_code)]

use muon_driver::{
    Device, DeviceConfig, Doorbell, HeapAllocator, MuonError, Reset, Result, RingQueue,
    SharedRegion,
};
use muon_proto::{FrameHeader, MsgType, MAGIC};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Payload bytes per ring queue.
pub const QUEUE_PAYLOAD: u32 = 1024;
const HEADER_LEN: usize = 12;

/// Two views of the same leaked allocation, standing in for memory the host
/// and firmware both map.
fn shared_pair(len: usize) -> (SharedRegion, SharedRegion, SharedRegion) {
    let ptr = Box::leak(vec![0u32; len.div_ceil(4)].into_boxed_slice())
        .as_mut_ptr()
        .cast::<u8>();
    // SAFETY: the allocation is leaked, so it outlives every view.
    unsafe {
        (
            SharedRegion::from_raw(ptr, len),
            SharedRegion::from_raw(ptr, len),
            SharedRegion::from_raw(ptr, len),
        )
    }
}

/// Doorbell that counts host-to-firmware rings.
#[derive(Default)]
pub struct CountingDoorbell {
    pub rings: AtomicU32,
}

impl Doorbell for CountingDoorbell {
    fn notify(&self) {
        self.rings.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reset line that "boots" the fake firmware by republishing the outbound
/// queue header on deassert.
pub struct MockReset {
    pub asserts: AtomicU32,
    pub deasserts: AtomicU32,
    pub fail_deassert: AtomicBool,
    boot_view: Mutex<Option<RingQueue>>,
}

impl MockReset {
    fn new(boot_view: RingQueue) -> Self {
        Self {
            asserts: AtomicU32::new(0),
            deasserts: AtomicU32::new(0),
            fail_deassert: AtomicBool::new(false),
            boot_view: Mutex::new(Some(boot_view)),
        }
    }
}

impl Reset for MockReset {
    fn assert_reset(&self) -> Result<()> {
        self.asserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deassert(&self) -> Result<()> {
        self.deasserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_deassert.load(Ordering::SeqCst) {
            return Err(MuonError::faulted("reset line stuck"));
        }
        if let Some(queue) = self.boot_view.lock().unwrap().as_ref() {
            queue.init_empty(QUEUE_PAYLOAD).unwrap();
        }
        Ok(())
    }
}

/// The firmware's ends of the queue pair.
pub struct FakeFirmware {
    /// Host-to-firmware direction (requests land here).
    rx: RingQueue,
    /// Firmware-to-host direction (responses go here).
    tx: RingQueue,
}

impl FakeFirmware {
    /// Non-blocking read of the next request frame.
    pub fn try_recv(&self) -> Option<(u32, Vec<u8>)> {
        let mut header_bytes = [0u8; HEADER_LEN];
        match self.rx.read_bytes(&mut header_bytes) {
            muon_driver::queue::ReadOutcome::Ok => {}
            _ => return None,
        }
        let header = FrameHeader::decode(&header_bytes).unwrap();
        assert_eq!(header.magic, MAGIC, "host wrote a frame with bad magic");

        let mut payload = vec![0u8; header.length as usize];
        assert_eq!(
            self.rx.read_bytes(&mut payload),
            muon_driver::queue::ReadOutcome::Ok,
            "host wrote a torn frame"
        );
        Some((header.msg_type, payload))
    }

    /// Poll until a frame of `want` arrives, skipping other traffic (e.g.
    /// watchdog pings). Panics on timeout.
    pub fn recv_expect(&self, want: MsgType, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((msg_type, payload)) = self.try_recv() {
                if msg_type == want as u32 {
                    return payload;
                }
            } else if Instant::now() >= deadline {
                panic!("no {want:?} frame within {timeout:?}");
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Write a response frame.
    pub fn send(&self, msg_type: MsgType, payload: &[u8]) {
        let header = FrameHeader {
            magic: MAGIC,
            msg_type: msg_type as u32,
            length: payload.len() as u32,
        };
        let mut header_bytes = Vec::with_capacity(HEADER_LEN);
        header.encode(&mut header_bytes);
        self.tx.write_vectored(&[&header_bytes, payload]).unwrap();
    }

    /// Write a frame with a corrupted magic.
    pub fn send_bad_magic(&self) {
        let header = FrameHeader {
            magic: 0x0BAD_F00D,
            msg_type: MsgType::Pong as u32,
            length: 0,
        };
        let mut header_bytes = Vec::with_capacity(HEADER_LEN);
        header.encode(&mut header_bytes);
        self.tx.write_vectored(&[&header_bytes]).unwrap();
    }
}

/// A device wired to a fake firmware.
pub struct Rig {
    pub device: Device,
    pub fw: FakeFirmware,
    pub doorbell: Arc<CountingDoorbell>,
    pub reset: Arc<MockReset>,
}

/// Shareable handle to the reset mock that still implements `Reset`.
struct ResetHandle(Arc<MockReset>);

impl Reset for ResetHandle {
    fn assert_reset(&self) -> Result<()> {
        self.0.assert_reset()
    }

    fn deassert(&self) -> Result<()> {
        self.0.deassert()
    }
}

impl Rig {
    pub fn new(config: DeviceConfig) -> Self {
        let region_len = HEADER_LEN + QUEUE_PAYLOAD as usize;
        let (host_tx, fw_rx, boot_view) = shared_pair(region_len);
        let (host_rx, fw_tx, _) = shared_pair(region_len);

        let host_tx = RingQueue::new(host_tx).unwrap();
        let host_rx = RingQueue::new(host_rx).unwrap();
        let fw_rx = RingQueue::new(fw_rx).unwrap();
        let fw_tx = RingQueue::new(fw_tx).unwrap();
        let boot_view = RingQueue::new(boot_view).unwrap();

        host_tx.init_empty(QUEUE_PAYLOAD).unwrap();
        host_rx.init_empty(QUEUE_PAYLOAD).unwrap();

        let doorbell = Arc::new(CountingDoorbell::default());
        let reset = Arc::new(MockReset::new(boot_view));

        let device = Device::new(
            host_tx,
            host_rx,
            Arc::clone(&doorbell) as Arc<dyn Doorbell>,
            Box::new(ResetHandle(Arc::clone(&reset))),
            Arc::new(HeapAllocator::default()),
            config,
        );

        Self {
            device,
            fw: FakeFirmware {
                rx: fw_rx,
                tx: fw_tx,
            },
            doorbell,
            reset,
        }
    }

    /// Rig with generous timeouts for tests that never exercise them.
    pub fn with_defaults() -> Self {
        Self::new(DeviceConfig {
            watchdog_timeout: Duration::from_secs(60),
            ..DeviceConfig::default()
        })
    }
}

/// Copy a model blob into a fresh buffer and set its window over it.
pub fn load_model_buffer(device: &Device, model: &[u8]) -> Arc<muon_driver::Buffer> {
    let buffer = device.buffer_create(model.len() as u32).unwrap();
    // SAFETY: freshly allocated host buffer, nothing else references it yet.
    unsafe {
        std::ptr::copy_nonoverlapping(model.as_ptr(), buffer.data_ptr(), model.len());
    }
    buffer.set_window(0, model.len() as u32).unwrap();
    buffer
}
