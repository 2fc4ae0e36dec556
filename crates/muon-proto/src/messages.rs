//! Typed message payloads and their wire codecs.
//!
//! Every struct here has a fixed `WIRE_SIZE`. `encode` always emits exactly
//! that many bytes (unused array slots are zero-filled) and `decode` requires
//! exactly that many, so a frame whose header length disagrees with the
//! payload type is rejected before any field is read.

use crate::{DecodeError, DESC_LEN, ERR_MSG_LEN, MAX_FEATURE_MAPS, PMU_EVENTS};
use bytes::{Buf, BufMut};

/// Frame header preceding every payload on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Must equal [`crate::MAGIC`].
    pub magic: u32,
    /// Raw message type; see [`crate::MsgType`].
    pub msg_type: u32,
    /// Payload length in bytes.
    pub length: u32,
}

impl FrameHeader {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 12;

    /// Append the header to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.msg_type);
        buf.put_u32_le(self.length);
    }

    /// Decode a header from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a short slice. Magic and type
    /// validation is the receiver's policy, not the codec's.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        Ok(Self {
            magic: buf.get_u32_le(),
            msg_type: buf.get_u32_le(),
            length: buf.get_u32_le(),
        })
    }
}

/// A firmware-visible buffer view: DMA address (with window offset applied)
/// and size in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreBuffer {
    /// Device address of the first byte.
    pub ptr: u32,
    /// Length in bytes.
    pub size: u32,
}

impl CoreBuffer {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 8;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.ptr);
        buf.put_u32_le(self.size);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Self {
            ptr: buf.get_u32_le(),
            size: buf.get_u32_le(),
        }
    }
}

const NETWORK_KIND_BUFFER: u32 = 0;
const NETWORK_KIND_INDEX: u32 = 1;

/// Where the firmware finds the model for a request: a host buffer holding
/// model bytes, or the index of a model baked into the firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRef {
    /// Model bytes live in a host buffer.
    Buffer(CoreBuffer),
    /// Firmware-resident model index.
    Index(u32),
}

impl NetworkRef {
    /// Encoded size in bytes: kind discriminant plus an 8-byte body.
    pub const WIRE_SIZE: usize = 12;

    fn encode(&self, buf: &mut impl BufMut) {
        match *self {
            Self::Buffer(cbuf) => {
                buf.put_u32_le(NETWORK_KIND_BUFFER);
                cbuf.encode(buf);
            }
            Self::Index(index) => {
                buf.put_u32_le(NETWORK_KIND_INDEX);
                buf.put_u32_le(index);
                buf.put_u32_le(0);
            }
        }
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        let kind = buf.get_u32_le();
        match kind {
            NETWORK_KIND_BUFFER => Ok(Self::Buffer(CoreBuffer::decode(buf))),
            NETWORK_KIND_INDEX => {
                let index = buf.get_u32_le();
                let _pad = buf.get_u32_le();
                Ok(Self::Index(index))
            }
            _ => Err(DecodeError::BadNetworkKind { kind }),
        }
    }
}

/// Firmware protocol version report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionRsp {
    /// Major version; a mismatch here means incompatible layouts.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
    /// Reserved, written as zero.
    pub reserved: u8,
}

impl VersionRsp {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 4;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        buf.put_u8(self.patch);
        buf.put_u8(self.reserved);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        Ok(Self {
            major: buf.get_u8(),
            minor: buf.get_u8(),
            patch: buf.get_u8(),
            reserved: buf.get_u8(),
        })
    }
}

/// Firmware fault report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrMsg {
    /// Firmware-defined fault class.
    pub err_type: u32,
    /// NUL-padded fault description.
    pub msg: [u8; ERR_MSG_LEN],
}

impl Default for ErrMsg {
    fn default() -> Self {
        Self {
            err_type: 0,
            msg: [0; ERR_MSG_LEN],
        }
    }
}

impl ErrMsg {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 4 + ERR_MSG_LEN;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.err_type);
        buf.put_slice(&self.msg);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        let err_type = buf.get_u32_le();
        let mut msg = [0u8; ERR_MSG_LEN];
        buf.copy_to_slice(&mut msg);
        Ok(Self { err_type, msg })
    }

    /// The description up to the first NUL, lossily decoded.
    pub fn message(&self) -> String {
        let end = self.msg.iter().position(|&b| b == 0).unwrap_or(ERR_MSG_LEN);
        String::from_utf8_lossy(&self.msg[..end]).into_owned()
    }
}

/// Capability query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitiesReq {
    /// Correlation id echoed back in the response.
    pub user_arg: u64,
}

impl CapabilitiesReq {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 8;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        Ok(Self {
            user_arg: buf.get_u64_le(),
        })
    }
}

/// Capability reply: hardware identity and configuration plus the firmware
/// driver version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitiesRsp {
    /// Correlation id from the request.
    pub user_arg: u64,
    /// Hardware version field status.
    pub version_status: u8,
    /// Hardware minor version.
    pub version_minor: u8,
    /// Hardware major version.
    pub version_major: u8,
    /// Product major version.
    pub product_major: u8,
    /// Architecture patch revision.
    pub arch_patch_rev: u32,
    /// Architecture minor revision.
    pub arch_minor_rev: u32,
    /// Architecture major revision.
    pub arch_major_rev: u32,
    /// Firmware driver patch revision.
    pub driver_patch_rev: u32,
    /// Firmware driver minor revision.
    pub driver_minor_rev: u32,
    /// Firmware driver major revision.
    pub driver_major_rev: u32,
    /// MAC units per clock cycle.
    pub macs_per_cc: u8,
    /// Command stream version.
    pub cmd_stream_version: u8,
    /// Non-zero when the custom DMA engine is fitted.
    pub custom_dma: u8,
}

impl CapabilitiesRsp {
    /// Encoded size in bytes (one trailing pad byte keeps 32-bit alignment).
    pub const WIRE_SIZE: usize = 40;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
        buf.put_u8(self.version_status);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.version_major);
        buf.put_u8(self.product_major);
        buf.put_u32_le(self.arch_patch_rev);
        buf.put_u32_le(self.arch_minor_rev);
        buf.put_u32_le(self.arch_major_rev);
        buf.put_u32_le(self.driver_patch_rev);
        buf.put_u32_le(self.driver_minor_rev);
        buf.put_u32_le(self.driver_major_rev);
        buf.put_u8(self.macs_per_cc);
        buf.put_u8(self.cmd_stream_version);
        buf.put_u8(self.custom_dma);
        buf.put_u8(0);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        let rsp = Self {
            user_arg: buf.get_u64_le(),
            version_status: buf.get_u8(),
            version_minor: buf.get_u8(),
            version_major: buf.get_u8(),
            product_major: buf.get_u8(),
            arch_patch_rev: buf.get_u32_le(),
            arch_minor_rev: buf.get_u32_le(),
            arch_major_rev: buf.get_u32_le(),
            driver_patch_rev: buf.get_u32_le(),
            driver_minor_rev: buf.get_u32_le(),
            driver_major_rev: buf.get_u32_le(),
            macs_per_cc: buf.get_u8(),
            cmd_stream_version: buf.get_u8(),
            custom_dma: buf.get_u8(),
        };
        let _pad = buf.get_u8();
        Ok(rsp)
    }
}

/// Inference request: feature-map buffer lists, model reference and PMU
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceReq {
    /// Correlation id echoed back in the response.
    pub user_arg: u64,
    /// Number of valid entries in `ifm`.
    pub ifm_count: u32,
    /// Input feature maps: `(dma + offset, size)` per buffer window.
    pub ifm: [CoreBuffer; MAX_FEATURE_MAPS],
    /// Number of valid entries in `ofm`.
    pub ofm_count: u32,
    /// Output feature maps: `(dma + offset + size, remaining capacity)`.
    pub ofm: [CoreBuffer; MAX_FEATURE_MAPS],
    /// Model to execute.
    pub network: NetworkRef,
    /// PMU event ids to count during execution.
    pub pmu_event_config: [u8; PMU_EVENTS],
    /// Non-zero to run the cycle counter.
    pub pmu_cycle_counter_enable: u32,
}

impl InferenceReq {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize =
        8 + 4 + MAX_FEATURE_MAPS * CoreBuffer::WIRE_SIZE + 4 + MAX_FEATURE_MAPS
            * CoreBuffer::WIRE_SIZE + NetworkRef::WIRE_SIZE + PMU_EVENTS + 4;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
        buf.put_u32_le(self.ifm_count);
        for cbuf in &self.ifm {
            cbuf.encode(buf);
        }
        buf.put_u32_le(self.ofm_count);
        for cbuf in &self.ofm {
            cbuf.encode(buf);
        }
        self.network.encode(buf);
        buf.put_slice(&self.pmu_event_config);
        buf.put_u32_le(self.pmu_cycle_counter_enable);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch,
    /// [`DecodeError::CountOutOfRange`] when a count exceeds
    /// [`MAX_FEATURE_MAPS`] and [`DecodeError::BadNetworkKind`] for an
    /// unknown model reference.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        let user_arg = buf.get_u64_le();
        let ifm_count = checked_count(buf.get_u32_le(), "ifm_count")?;
        let mut ifm = [CoreBuffer::default(); MAX_FEATURE_MAPS];
        for slot in &mut ifm {
            *slot = CoreBuffer::decode(&mut buf);
        }
        let ofm_count = checked_count(buf.get_u32_le(), "ofm_count")?;
        let mut ofm = [CoreBuffer::default(); MAX_FEATURE_MAPS];
        for slot in &mut ofm {
            *slot = CoreBuffer::decode(&mut buf);
        }
        let network = NetworkRef::decode(&mut buf)?;
        let mut pmu_event_config = [0u8; PMU_EVENTS];
        buf.copy_to_slice(&mut pmu_event_config);
        let pmu_cycle_counter_enable = buf.get_u32_le();
        Ok(Self {
            user_arg,
            ifm_count,
            ifm,
            ofm_count,
            ofm,
            network,
            pmu_event_config,
            pmu_cycle_counter_enable,
        })
    }
}

/// Inference result: produced OFM sizes, terminal status and PMU readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceRsp {
    /// Correlation id from the request.
    pub user_arg: u64,
    /// Number of valid entries in `ofm_size`.
    pub ofm_count: u32,
    /// Bytes produced into each OFM buffer.
    pub ofm_size: [u32; MAX_FEATURE_MAPS],
    /// Raw [`crate::FirmwareStatus`].
    pub status: u32,
    /// PMU event ids that were counted.
    pub pmu_event_config: [u8; PMU_EVENTS],
    /// Final PMU event counts.
    pub pmu_event_count: [u32; PMU_EVENTS],
    /// Whether the cycle counter ran.
    pub pmu_cycle_counter_enable: u32,
    /// Final cycle counter value.
    pub pmu_cycle_counter_count: u64,
}

impl Default for InferenceRsp {
    fn default() -> Self {
        Self {
            user_arg: 0,
            ofm_count: 0,
            ofm_size: [0; MAX_FEATURE_MAPS],
            status: 0,
            pmu_event_config: [0; PMU_EVENTS],
            pmu_event_count: [0; PMU_EVENTS],
            pmu_cycle_counter_enable: 0,
            pmu_cycle_counter_count: 0,
        }
    }
}

impl InferenceRsp {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize =
        8 + 4 + MAX_FEATURE_MAPS * 4 + 4 + PMU_EVENTS + PMU_EVENTS * 4 + 4 + 8;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
        buf.put_u32_le(self.ofm_count);
        for size in &self.ofm_size {
            buf.put_u32_le(*size);
        }
        buf.put_u32_le(self.status);
        buf.put_slice(&self.pmu_event_config);
        for count in &self.pmu_event_count {
            buf.put_u32_le(*count);
        }
        buf.put_u32_le(self.pmu_cycle_counter_enable);
        buf.put_u64_le(self.pmu_cycle_counter_count);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch and
    /// [`DecodeError::CountOutOfRange`] when `ofm_count` exceeds
    /// [`MAX_FEATURE_MAPS`].
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        let user_arg = buf.get_u64_le();
        let ofm_count = checked_count(buf.get_u32_le(), "ofm_count")?;
        let mut ofm_size = [0u32; MAX_FEATURE_MAPS];
        for slot in &mut ofm_size {
            *slot = buf.get_u32_le();
        }
        let status = buf.get_u32_le();
        let mut pmu_event_config = [0u8; PMU_EVENTS];
        buf.copy_to_slice(&mut pmu_event_config);
        let mut pmu_event_count = [0u32; PMU_EVENTS];
        for slot in &mut pmu_event_count {
            *slot = buf.get_u32_le();
        }
        let pmu_cycle_counter_enable = buf.get_u32_le();
        let pmu_cycle_counter_count = buf.get_u64_le();
        Ok(Self {
            user_arg,
            ofm_count,
            ofm_size,
            status,
            pmu_event_config,
            pmu_event_count,
            pmu_cycle_counter_enable,
            pmu_cycle_counter_count,
        })
    }
}

/// Model dimension query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfoReq {
    /// Correlation id echoed back in the response.
    pub user_arg: u64,
    /// Model to describe.
    pub network: NetworkRef,
}

impl NetworkInfoReq {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 8 + NetworkRef::WIRE_SIZE;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
        self.network.encode(buf);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch and
    /// [`DecodeError::BadNetworkKind`] for an unknown model reference.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        let user_arg = buf.get_u64_le();
        let network = NetworkRef::decode(&mut buf)?;
        Ok(Self { user_arg, network })
    }
}

/// Model dimension reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfoRsp {
    /// Correlation id from the request.
    pub user_arg: u64,
    /// NUL-padded model description.
    pub desc: [u8; DESC_LEN],
    /// Number of valid entries in `ifm_size`.
    pub ifm_count: u32,
    /// Input feature map sizes in bytes.
    pub ifm_size: [u32; MAX_FEATURE_MAPS],
    /// Number of valid entries in `ofm_size`.
    pub ofm_count: u32,
    /// Output feature map sizes in bytes.
    pub ofm_size: [u32; MAX_FEATURE_MAPS],
    /// Raw [`crate::FirmwareStatus`].
    pub status: u32,
}

impl Default for NetworkInfoRsp {
    fn default() -> Self {
        Self {
            user_arg: 0,
            desc: [0; DESC_LEN],
            ifm_count: 0,
            ifm_size: [0; MAX_FEATURE_MAPS],
            ofm_count: 0,
            ofm_size: [0; MAX_FEATURE_MAPS],
            status: 0,
        }
    }
}

impl NetworkInfoRsp {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize =
        8 + DESC_LEN + 4 + MAX_FEATURE_MAPS * 4 + 4 + MAX_FEATURE_MAPS * 4 + 4;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
        buf.put_slice(&self.desc);
        buf.put_u32_le(self.ifm_count);
        for size in &self.ifm_size {
            buf.put_u32_le(*size);
        }
        buf.put_u32_le(self.ofm_count);
        for size in &self.ofm_size {
            buf.put_u32_le(*size);
        }
        buf.put_u32_le(self.status);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// Counts are returned raw: a count above [`MAX_FEATURE_MAPS`] is a
    /// request-level failure for the waiting caller, not a malformed frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        let user_arg = buf.get_u64_le();
        let mut desc = [0u8; DESC_LEN];
        buf.copy_to_slice(&mut desc);
        let ifm_count = buf.get_u32_le();
        let mut ifm_size = [0u32; MAX_FEATURE_MAPS];
        for slot in &mut ifm_size {
            *slot = buf.get_u32_le();
        }
        let ofm_count = buf.get_u32_le();
        let mut ofm_size = [0u32; MAX_FEATURE_MAPS];
        for slot in &mut ofm_size {
            *slot = buf.get_u32_le();
        }
        let status = buf.get_u32_le();
        Ok(Self {
            user_arg,
            desc,
            ifm_count,
            ifm_size,
            ofm_count,
            ofm_size,
            status,
        })
    }

    /// The description up to the first NUL, lossily decoded.
    pub fn description(&self) -> String {
        let end = self.desc.iter().position(|&b| b == 0).unwrap_or(DESC_LEN);
        String::from_utf8_lossy(&self.desc[..end]).into_owned()
    }
}

/// Abort request for a running inference, addressed by the correlation id the
/// inference was registered under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelInferenceReq {
    /// Correlation id echoed back in the response.
    pub user_arg: u64,
    /// Correlation id of the inference to abort.
    pub inference_handle: u64,
}

impl CancelInferenceReq {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 16;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
        buf.put_u64_le(self.inference_handle);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        Ok(Self {
            user_arg: buf.get_u64_le(),
            inference_handle: buf.get_u64_le(),
        })
    }
}

/// Cancellation outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelInferenceRsp {
    /// Correlation id from the request.
    pub user_arg: u64,
    /// Raw [`crate::FirmwareStatus`]: `Ok` when the inference was stopped.
    pub status: u32,
}

impl CancelInferenceRsp {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 12;

    /// Append the payload to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.user_arg);
        buf.put_u32_le(self.status);
    }

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] on a size mismatch.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = check_len(payload, Self::WIRE_SIZE)?;
        Ok(Self {
            user_arg: buf.get_u64_le(),
            status: buf.get_u32_le(),
        })
    }
}

fn check_len(payload: &[u8], expected: usize) -> Result<&[u8], DecodeError> {
    if payload.len() == expected {
        Ok(payload)
    } else {
        Err(DecodeError::Truncated {
            expected,
            got: payload.len(),
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn checked_count(value: u32, field: &'static str) -> Result<u32, DecodeError> {
    if value as usize > MAX_FEATURE_MAPS {
        return Err(DecodeError::CountOutOfRange {
            field,
            value,
            max: MAX_FEATURE_MAPS as u32,
        });
    }
    Ok(value)
}
