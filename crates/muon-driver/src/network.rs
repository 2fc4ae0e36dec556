//! Networks: models an inference can execute.
//!
//! A network is backed either by a host buffer holding a TFLite model or by
//! the index of a model baked into the firmware image. Its IFM/OFM dimension
//! vectors are populated at creation: buffer-backed networks parse the model
//! header on the host, index-backed ones ask the firmware via a synchronous
//! `NETWORK_INFO` round-trip (see the device constructor).

use crate::buffer::Buffer;
use crate::error::Result;
use crate::network_info::NetworkInfo;
use muon_proto::NetworkRef;
use std::sync::Arc;

/// Where the model bytes live.
#[derive(Debug, Clone)]
pub enum NetworkSource {
    /// Host buffer whose window contains the model.
    Buffer(Arc<Buffer>),
    /// Firmware-resident model index.
    Index(u32),
}

/// A model bound to the device, referenced by inferences.
#[derive(Debug)]
pub struct Network {
    source: NetworkSource,
    ifm_dims: Vec<u32>,
    ofm_dims: Vec<u32>,
    description: Option<String>,
}

impl Network {
    /// Build a buffer-backed network, deriving the dimension vectors from
    /// the model bytes in the buffer's window.
    ///
    /// # Errors
    ///
    /// Fails when the window does not hold a parseable model.
    pub(crate) fn from_buffer(buffer: Arc<Buffer>) -> Result<Self> {
        // SAFETY: the model buffer is host-owned at creation time; the
        // firmware only reads it once an inference is submitted.
        let dims = unsafe { buffer.with_window_bytes(muon_models::model_dims) }?;

        tracing::debug!(
            "Network create. ifm={:?}, ofm={:?}",
            dims.ifm,
            dims.ofm
        );

        Ok(Self {
            source: NetworkSource::Buffer(buffer),
            ifm_dims: dims.ifm,
            ofm_dims: dims.ofm,
            description: None,
        })
    }

    /// Build an index-backed network from the firmware's own description of
    /// the model.
    pub(crate) fn from_firmware_info(index: u32, info: &NetworkInfo) -> Self {
        Self {
            source: NetworkSource::Index(index),
            ifm_dims: info.ifm_sizes.clone(),
            ofm_dims: info.ofm_sizes.clone(),
            description: Some(info.description.clone()),
        }
    }

    /// Input feature map sizes in bytes.
    pub fn ifm_dims(&self) -> &[u32] {
        &self.ifm_dims
    }

    /// Output feature map sizes in bytes.
    pub fn ofm_dims(&self) -> &[u32] {
        &self.ofm_dims
    }

    /// Firmware-provided description, present on index-backed networks.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The model source.
    pub fn source(&self) -> &NetworkSource {
        &self.source
    }

    /// Wire reference for request composition. Buffer-backed networks take
    /// the buffer's window at call time, so a replayed request sees the same
    /// bytes the original did as long as the window is unchanged.
    pub(crate) fn wire_ref(&self) -> NetworkRef {
        match &self.source {
            NetworkSource::Buffer(buffer) => NetworkRef::Buffer(buffer.wire_window()),
            NetworkSource::Index(index) => NetworkRef::Index(*index),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts_for_tests(index: u32, ifm: Vec<u32>, ofm: Vec<u32>) -> Self {
        Self {
            source: NetworkSource::Index(index),
            ifm_dims: ifm,
            ofm_dims: ofm,
            description: None,
        }
    }
}
