//! Wire protocol shared between the Muon NPU firmware and the host driver.
//!
//! The host and the firmware exchange framed messages over two shared-memory
//! ring queues, one per direction. Every frame starts with a [`FrameHeader`]
//! (magic, type, payload length) followed by `length` payload bytes. Request
//! payloads lead with a `user_arg` correlation id minted by the host; the
//! firmware echoes it back in the matching response.
//!
//! All integers are little-endian on the wire. Struct layouts in
//! [`messages`] are fixed and shared with the firmware build; changing a
//! field is an ABI break and requires a protocol version bump.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod messages;

pub use messages::{
    CancelInferenceReq, CancelInferenceRsp, CapabilitiesReq, CapabilitiesRsp, CoreBuffer, ErrMsg,
    FrameHeader, InferenceReq, InferenceRsp, NetworkInfoReq, NetworkInfoRsp, NetworkRef,
    VersionRsp,
};

use thiserror::Error;

/// Frame magic, ASCII "MUON" read as a little-endian word.
pub const MAGIC: u32 = 0x4E4F_554D;

/// Protocol version compiled into this driver. The firmware reports its own
/// via `VERSION_RSP`; a mismatch is logged but never fails requests.
pub const VERSION_MAJOR: u8 = 1;
/// Protocol minor version.
pub const VERSION_MINOR: u8 = 0;
/// Protocol patch version.
pub const VERSION_PATCH: u8 = 0;

/// Maximum number of IFM or OFM buffers per inference.
pub const MAX_FEATURE_MAPS: usize = 16;

/// Number of PMU event counters carried with an inference.
pub const PMU_EVENTS: usize = 4;

/// Length of the network description string in `NETWORK_INFO_RSP`.
pub const DESC_LEN: usize = 32;

/// Length of the message carried by an `ERR` frame.
pub const ERR_MSG_LEN: usize = 128;

/// Largest payload the host will accept on the inbound queue.
pub const MAX_PAYLOAD: usize = 512;

/// Sentinel value written to the queue header `read`/`write` indices before a
/// firmware reset. The firmware overwrites the whole header during boot, so
/// observing non-sentinel values means initialization has completed.
pub const QUEUE_SENTINEL_INDEX: u32 = 0x00ff_ffff;

/// Message types carried in [`FrameHeader::msg_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    /// Host or firmware liveness probe.
    Ping = 1,
    /// Reply to a `Ping`.
    Pong = 2,
    /// Firmware fault report; payload is [`ErrMsg`].
    Err = 3,
    /// Ask the firmware for its protocol version.
    VersionReq = 4,
    /// Firmware protocol version; payload is [`VersionRsp`].
    VersionRsp = 5,
    /// Hardware capability query; payload is [`CapabilitiesReq`].
    CapabilitiesReq = 6,
    /// Capability reply; payload is [`CapabilitiesRsp`].
    CapabilitiesRsp = 7,
    /// Start an inference; payload is [`InferenceReq`].
    InferenceReq = 8,
    /// Inference result; payload is [`InferenceRsp`].
    InferenceRsp = 9,
    /// Query model dimensions; payload is [`NetworkInfoReq`].
    NetworkInfoReq = 10,
    /// Model dimension reply; payload is [`NetworkInfoRsp`].
    NetworkInfoRsp = 11,
    /// Abort a running inference; payload is [`CancelInferenceReq`].
    CancelInferenceReq = 12,
    /// Cancellation outcome; payload is [`CancelInferenceRsp`].
    CancelInferenceRsp = 13,
}

impl MsgType {
    /// Decode a wire type id. Unknown ids return `None`; the receiver treats
    /// them as an invalid frame.
    pub const fn from_wire(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Ping,
            2 => Self::Pong,
            3 => Self::Err,
            4 => Self::VersionReq,
            5 => Self::VersionRsp,
            6 => Self::CapabilitiesReq,
            7 => Self::CapabilitiesRsp,
            8 => Self::InferenceReq,
            9 => Self::InferenceRsp,
            10 => Self::NetworkInfoReq,
            11 => Self::NetworkInfoRsp,
            12 => Self::CancelInferenceReq,
            13 => Self::CancelInferenceRsp,
            _ => return None,
        })
    }
}

/// Status codes reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FirmwareStatus {
    /// Operation completed successfully.
    Ok = 0,
    /// Operation failed.
    Error = 1,
    /// Inference accepted and executing.
    Running = 2,
    /// Inference refused before execution started.
    Rejected = 3,
    /// Inference stopped before completing.
    Aborted = 4,
    /// Cancellation requested but not yet acknowledged.
    Aborting = 5,
}

impl FirmwareStatus {
    /// Decode a wire status. Unknown values return `None`; receivers map
    /// them to an error outcome.
    pub const fn from_wire(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::Running,
            3 => Self::Rejected,
            4 => Self::Aborted,
            5 => Self::Aborting,
            _ => return None,
        })
    }
}

/// Payload decode failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload shorter than the fixed wire size of the message.
    #[error("payload truncated: expected {expected} bytes, got {got}")]
    Truncated {
        /// Wire size of the message being decoded.
        expected: usize,
        /// Bytes actually present.
        got: usize,
    },

    /// Network reference carried an unknown kind discriminant.
    #[error("unknown network kind: {kind}")]
    BadNetworkKind {
        /// Raw kind value from the wire.
        kind: u32,
    },

    /// A count field exceeded its fixed array bound.
    #[error("{field} out of range: {value} > {max}")]
    CountOutOfRange {
        /// Field name.
        field: &'static str,
        /// Value from the wire.
        value: u32,
        /// Maximum the layout allows.
        max: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_type_round_trip() {
        for raw in 1..=13 {
            let ty = MsgType::from_wire(raw).unwrap();
            assert_eq!(ty as u32, raw);
        }
        assert!(MsgType::from_wire(0).is_none());
        assert!(MsgType::from_wire(14).is_none());
    }

    #[test]
    fn firmware_status_round_trip() {
        for raw in 0..=5 {
            let st = FirmwareStatus::from_wire(raw).unwrap();
            assert_eq!(st as u32, raw);
        }
        assert!(FirmwareStatus::from_wire(6).is_none());
    }

    #[test]
    fn magic_spells_muon() {
        assert_eq!(&MAGIC.to_le_bytes(), b"MUON");
    }
}
