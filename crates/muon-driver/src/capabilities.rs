//! Hardware capability query.
//!
//! A short-lived RPC: register, send `CAPABILITIES_REQ`, release the device
//! mutex, block on the completion, deregister. The firmware's reply is
//! unpacked into [`DeviceCapabilities`].

use crate::completion::Completion;
use crate::error::{MuonError, Result};
use muon_proto::CapabilitiesRsp;

/// Hardware identity bundle reported by the firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareId {
    /// Version field status flag.
    pub version_status: u8,
    /// Hardware major version.
    pub version_major: u8,
    /// Hardware minor version.
    pub version_minor: u8,
    /// Product major version.
    pub product_major: u8,
    /// Architecture major revision.
    pub arch_major_rev: u32,
    /// Architecture minor revision.
    pub arch_minor_rev: u32,
    /// Architecture patch revision.
    pub arch_patch_rev: u32,
}

/// Hardware configuration reported by the firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareConfig {
    /// MAC units per clock cycle.
    pub macs_per_cc: u8,
    /// Command stream version.
    pub cmd_stream_version: u8,
    /// Whether the custom DMA engine is fitted.
    pub custom_dma: bool,
}

/// Firmware driver version triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverVersion {
    /// Major revision.
    pub major: u32,
    /// Minor revision.
    pub minor: u32,
    /// Patch revision.
    pub patch: u32,
}

/// Everything a capability query reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Hardware identity.
    pub hw_id: HardwareId,
    /// Hardware configuration.
    pub hw_cfg: HardwareConfig,
    /// Firmware driver version.
    pub driver: DriverVersion,
}

impl From<&CapabilitiesRsp> for DeviceCapabilities {
    fn from(rsp: &CapabilitiesRsp) -> Self {
        Self {
            hw_id: HardwareId {
                version_status: rsp.version_status,
                version_major: rsp.version_major,
                version_minor: rsp.version_minor,
                product_major: rsp.product_major,
                arch_major_rev: rsp.arch_major_rev,
                arch_minor_rev: rsp.arch_minor_rev,
                arch_patch_rev: rsp.arch_patch_rev,
            },
            hw_cfg: HardwareConfig {
                macs_per_cc: rsp.macs_per_cc,
                cmd_stream_version: rsp.cmd_stream_version,
                custom_dma: rsp.custom_dma != 0,
            },
            driver: DriverVersion {
                major: rsp.driver_major_rev,
                minor: rsp.driver_minor_rev,
                patch: rsp.driver_patch_rev,
            },
        }
    }
}

/// Pending capability query control block.
pub(crate) struct CapabilitiesRequest {
    completion: Completion<Result<DeviceCapabilities>>,
}

impl CapabilitiesRequest {
    pub fn new() -> Self {
        Self {
            completion: Completion::default(),
        }
    }

    /// Apply the firmware's reply.
    pub fn apply_rsp(&self, rsp: &CapabilitiesRsp) {
        self.completion.complete(Ok(DeviceCapabilities::from(rsp)));
    }

    /// Firmware died before replying.
    pub fn fail(&self) {
        self.completion
            .complete(Err(MuonError::faulted("firmware died during query")));
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn completion(&self) -> &Completion<Result<DeviceCapabilities>> {
        &self.completion
    }
}
