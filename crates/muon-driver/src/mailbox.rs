//! Mailbox engine: framed message transport plus in-flight bookkeeping.
//!
//! Composes the two ring queues, the correlation-id registry and the
//! watchdog. Every request that expects a reply is registered first and
//! carries its id as `user_arg`; the watchdog is incremented for message
//! types the accounting table says expect a reply (`PING`, `INFERENCE_REQ`)
//! and decremented when the matching reply is pulled off the inbound queue.

use crate::buffer::Buffer;
use crate::cancel::CancelRequest;
use crate::capabilities::CapabilitiesRequest;
use crate::error::{MuonError, Result};
use crate::inference::{Inference, PmuConfig};
use crate::network_info::NetworkInfoRequest;
use crate::queue::{ReadOutcome, RingQueue};
use crate::registry::Registry;
use crate::watchdog::Watchdog;
use muon_proto::{
    CancelInferenceReq, CapabilitiesReq, CoreBuffer, FrameHeader, InferenceReq, MsgType,
    NetworkInfoReq, NetworkRef, MAGIC, MAX_FEATURE_MAPS,
};
use std::sync::Arc;

/// Host-to-firmware wakeup line. The firmware-side counterpart invokes
/// [`crate::Device::process_incoming`] through the platform shim.
pub trait Doorbell: Send + Sync {
    /// Tell the firmware the outbound queue has new data.
    fn notify(&self);
}

/// An in-flight message awaiting its response, stored in the registry under
/// its correlation id. Each variant knows how to fail itself when the
/// firmware is declared dead and how to resend itself after a reset.
#[derive(Clone)]
pub(crate) enum PendingMsg {
    Inference(Arc<Inference>),
    Capabilities(Arc<CapabilitiesRequest>),
    NetworkInfo(Arc<NetworkInfoRequest>),
    Cancel(Arc<CancelRequest>),
}

impl PendingMsg {
    /// Firmware died: push the owner into its failed state.
    pub fn fail(&self) {
        match self {
            Self::Inference(inf) => inf.mark_failed(),
            Self::Capabilities(req) => req.fail(),
            Self::NetworkInfo(req) => req.fail(),
            Self::Cancel(req) => req.fail(),
        }
    }

    /// Firmware restarted: replay the request under the same id.
    ///
    /// # Errors
    ///
    /// An error means the entry could not be replayed; the caller fails it.
    pub fn resend(&self, id: u32, mbox: &mut Mailbox) -> Result<()> {
        match self {
            Self::Inference(inf) => inf.resend(id, mbox),
            Self::Capabilities(req) => {
                if req.is_done() {
                    Ok(())
                } else {
                    mbox.capabilities_request(id)
                }
            }
            Self::NetworkInfo(req) => {
                if req.is_done() {
                    Ok(())
                } else {
                    mbox.network_info_request(id, req.network())
                }
            }
            // A cancellation is never replayed: the restart aborted the
            // whole firmware, so the target's fate is already decided.
            Self::Cancel(req) => {
                req.complete_from_target();
                Ok(())
            }
        }
    }
}

/// The message transport owned by the device, mutated only under the device
/// mutex.
pub(crate) struct Mailbox {
    tx: RingQueue,
    rx: RingQueue,
    doorbell: Arc<dyn Doorbell>,
    wdog: Arc<Watchdog>,
    pub registry: Registry<PendingMsg>,
    pub ping_count: i32,
}

impl Mailbox {
    pub fn new(
        tx: RingQueue,
        rx: RingQueue,
        doorbell: Arc<dyn Doorbell>,
        wdog: Arc<Watchdog>,
    ) -> Self {
        Self {
            tx,
            rx,
            doorbell,
            wdog,
            registry: Registry::default(),
            ping_count: 0,
        }
    }

    fn write_msg(&mut self, msg_type: MsgType, payload: &[u8]) -> Result<()> {
        let header = FrameHeader {
            magic: MAGIC,
            msg_type: msg_type as u32,
            length: u32::try_from(payload.len())
                .map_err(|_| MuonError::invalid_argument("payload too large"))?,
        };
        let mut header_bytes = Vec::with_capacity(FrameHeader::WIRE_SIZE);
        header.encode(&mut header_bytes);

        self.tx.write_vectored(&[&header_bytes, payload])?;
        self.account_sent(msg_type);
        self.doorbell.notify();

        tracing::debug!(
            "mbox: sent type={msg_type:?}, length={}",
            payload.len()
        );
        Ok(())
    }

    fn account_sent(&mut self, msg_type: MsgType) {
        match msg_type {
            MsgType::Ping => {
                self.ping_count += 1;
                self.wdog.inc();
            }
            MsgType::InferenceReq => self.wdog.inc(),
            _ => {}
        }
    }

    fn account_received(&mut self, msg_type: MsgType) {
        match msg_type {
            MsgType::Pong => {
                self.ping_count -= 1;
                self.wdog.dec();
            }
            MsgType::InferenceRsp => self.wdog.dec(),
            _ => {}
        }
    }

    /// Send a liveness probe.
    pub fn ping(&mut self) -> Result<()> {
        self.write_msg(MsgType::Ping, &[])
    }

    /// Answer a firmware liveness probe.
    pub fn pong(&mut self) -> Result<()> {
        self.write_msg(MsgType::Pong, &[])
    }

    /// Ask the firmware for its protocol version. The response is only
    /// logged, so no registration is needed.
    pub fn version_request(&mut self) -> Result<()> {
        self.write_msg(MsgType::VersionReq, &[])
    }

    /// Send a capability query under a registered id.
    pub fn capabilities_request(&mut self, id: u32) -> Result<()> {
        let req = CapabilitiesReq {
            user_arg: u64::from(id),
        };
        let mut payload = Vec::with_capacity(CapabilitiesReq::WIRE_SIZE);
        req.encode(&mut payload);
        self.write_msg(MsgType::CapabilitiesReq, &payload)
    }

    /// Compose and send an inference request. IFM entries carry the window
    /// `(dma + offset, size)`; OFM entries carry the remaining capacity after
    /// the window, which is where the firmware writes its output.
    #[allow(clippy::cast_possible_truncation)] // counts bounded by 16 above
    pub fn inference_request(
        &mut self,
        id: u32,
        ifm: &[Arc<Buffer>],
        ofm: &[Arc<Buffer>],
        network: NetworkRef,
        pmu: PmuConfig,
    ) -> Result<()> {
        if ifm.len() > MAX_FEATURE_MAPS || ofm.len() > MAX_FEATURE_MAPS {
            return Err(MuonError::invalid_argument("feature map count above 16"));
        }

        let mut req = InferenceReq {
            user_arg: u64::from(id),
            ifm_count: ifm.len() as u32,
            ifm: [CoreBuffer::default(); MAX_FEATURE_MAPS],
            ofm_count: ofm.len() as u32,
            ofm: [CoreBuffer::default(); MAX_FEATURE_MAPS],
            network,
            pmu_event_config: pmu.events,
            pmu_cycle_counter_enable: u32::from(pmu.cycle_counter),
        };
        for (slot, buf) in req.ifm.iter_mut().zip(ifm) {
            *slot = buf.wire_window();
        }
        for (slot, buf) in req.ofm.iter_mut().zip(ofm) {
            *slot = buf.wire_remaining();
        }

        let mut payload = Vec::with_capacity(InferenceReq::WIRE_SIZE);
        req.encode(&mut payload);
        self.write_msg(MsgType::InferenceReq, &payload)
    }

    /// Send a model dimension query under a registered id.
    pub fn network_info_request(&mut self, id: u32, network: NetworkRef) -> Result<()> {
        let req = NetworkInfoReq {
            user_arg: u64::from(id),
            network,
        };
        let mut payload = Vec::with_capacity(NetworkInfoReq::WIRE_SIZE);
        req.encode(&mut payload);
        self.write_msg(MsgType::NetworkInfoReq, &payload)
    }

    /// Ask the firmware to abort the inference registered under
    /// `inference_id`.
    pub fn cancel_inference(&mut self, id: u32, inference_id: u32) -> Result<()> {
        let req = CancelInferenceReq {
            user_arg: u64::from(id),
            inference_handle: u64::from(inference_id),
        };
        let mut payload = Vec::with_capacity(CancelInferenceReq::WIRE_SIZE);
        req.encode(&mut payload);
        self.write_msg(MsgType::CancelInferenceReq, &payload)
    }

    /// Pull the next frame off the inbound queue.
    ///
    /// `Ok(None)` means the queue is drained. A frame that fails validation
    /// (bad magic, oversized payload, payload missing) returns an
    /// `InvalidFrame` error; the caller resets the inbound queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFrame` as described above.
    pub fn read_msg(&mut self, payload_buf: &mut [u8]) -> Result<Option<(FrameHeader, usize)>> {
        let mut header_bytes = [0u8; FrameHeader::WIRE_SIZE];
        match self.rx.read_bytes(&mut header_bytes) {
            ReadOutcome::Empty => return Ok(None),
            ReadOutcome::Truncated => {
                return Err(MuonError::invalid_frame("partial message header"));
            }
            ReadOutcome::Ok => {}
        }

        let header = FrameHeader::decode(&header_bytes)
            .map_err(|e| MuonError::invalid_frame(e.to_string()))?;

        if header.magic != MAGIC {
            return Err(MuonError::invalid_frame(format!(
                "bad magic {:#010x}, expected {MAGIC:#010x}",
                header.magic
            )));
        }

        let length = header.length as usize;
        if length > payload_buf.len() {
            return Err(MuonError::invalid_frame(format!(
                "payload of {length} bytes exceeds receive buffer"
            )));
        }

        match self.rx.read_bytes(&mut payload_buf[..length]) {
            ReadOutcome::Ok => {}
            ReadOutcome::Empty | ReadOutcome::Truncated => {
                return Err(MuonError::invalid_frame("payload missing from queue"));
            }
        }

        tracing::debug!(
            "mbox: read type={}, length={length}",
            header.msg_type
        );

        if let Some(msg_type) = MsgType::from_wire(header.msg_type) {
            self.account_received(msg_type);
        }

        Ok(Some((header, length)))
    }

    /// Discard everything pending on the inbound queue.
    pub fn reset_rx(&self) {
        self.rx.reset();
    }

    /// Write the boot sentinel into the outbound queue header ahead of a
    /// firmware reset.
    pub fn prepare_reboot(&self) {
        self.tx.prepare_sentinel();
    }

    /// Whether the firmware has republished a valid outbound queue header.
    pub fn firmware_booted(&self) -> bool {
        self.tx.firmware_ready()
    }

    /// Fail every outstanding message. Entries stay registered; their owners
    /// deregister on their own paths.
    pub fn fail_all(&mut self) {
        for id in self.registry.ids() {
            if let Some(entry) = self.registry.find(id).cloned() {
                tracing::debug!("mbox: failing msg id={id}");
                entry.fail();
            }
        }
    }

    /// Replay every outstanding message in id order. An entry whose resend
    /// fails is failed before moving on.
    pub fn resend_all(&mut self) {
        for id in self.registry.ids() {
            let Some(entry) = self.registry.find(id).cloned() else {
                continue;
            };
            if let Err(e) = entry.resend(id, self) {
                tracing::warn!("mbox: failed to resend msg id={id}: {e}");
                entry.fail();
            }
        }
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("outstanding", &self.registry.len())
            .field("ping_count", &self.ping_count)
            .finish()
    }
}
